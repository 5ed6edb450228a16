use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};

use crate::{Error, Result, argo, metrics::Metrics};

/// Everything needed to talk to the cluster Argo Events runs in.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Namespace all `EventSource`s are read from and written to.
    pub namespace: String,
    pub config: kube::Config,
}

/// Operations on Argo Events `EventSource`s within a single namespace.
#[async_trait]
pub trait EventSourceClient: Send + Sync {
    async fn list(&self, params: &ListParams) -> Result<Vec<argo::EventSource>, kube::Error>;

    async fn get(&self, name: &str) -> Result<argo::EventSource, kube::Error>;

    async fn create(&self, object: &argo::EventSource) -> Result<argo::EventSource, kube::Error>;

    async fn replace(&self, object: &argo::EventSource)
    -> Result<argo::EventSource, kube::Error>;

    async fn delete(&self, name: &str) -> Result<(), kube::Error>;
}

pub struct KubeEventSourceClient {
    api: kube::Api<argo::EventSource>,
    metrics: Metrics,
}

impl KubeEventSourceClient {
    #[must_use]
    pub fn new(client: kube::Client, namespace: &str, metrics: &Metrics) -> Self {
        Self {
            api: kube::Api::namespaced(client, namespace),
            metrics: metrics.clone(),
        }
    }
}

#[async_trait]
impl EventSourceClient for KubeEventSourceClient {
    async fn list(&self, params: &ListParams) -> Result<Vec<argo::EventSource>, kube::Error> {
        self.metrics.external_api_usage_count("list");
        self.api.list(params).await.map(|list| list.items)
    }

    async fn get(&self, name: &str) -> Result<argo::EventSource, kube::Error> {
        self.metrics.external_api_usage_count("get");
        self.api.get(name).await
    }

    async fn create(&self, object: &argo::EventSource) -> Result<argo::EventSource, kube::Error> {
        self.metrics.external_api_usage_count("create");
        self.api.create(&PostParams::default(), object).await
    }

    async fn replace(
        &self,
        object: &argo::EventSource,
    ) -> Result<argo::EventSource, kube::Error> {
        self.metrics.external_api_usage_count("replace");
        let name = object.metadata.name.as_deref().unwrap_or_default();
        self.api.replace(name, &PostParams::default(), object).await
    }

    async fn delete(&self, name: &str) -> Result<(), kube::Error> {
        self.metrics.external_api_usage_count("delete");
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

/// Builds a client for the cluster described by `options`.
///
/// # Errors
///
/// Will return `Err` if the HTTP client could not be constructed from the
/// configuration.
pub fn new_event_source_client(
    options: ClientOptions,
    metrics: &Metrics,
) -> Result<Box<dyn EventSourceClient>> {
    let client = kube::Client::try_from(options.config).map_err(Error::ClientCreation)?;

    Ok(Box::new(KubeEventSourceClient::new(
        client,
        &options.namespace,
        metrics,
    )))
}

#[must_use]
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

#[cfg(test)]
mod tests {
    use crate::testing::api_error;

    use super::is_not_found;

    #[test]
    fn not_found_is_detected_by_status_code() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(409)));
    }
}

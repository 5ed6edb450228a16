use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::{
    api::core::v1::Secret,
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    apimachinery::pkg::apis::meta::v1::Condition,
};
use kube::{
    Client, CustomResource, CustomResourceExt, ResourceExt,
    api::ListParams,
    config::{KubeConfigOptions, Kubeconfig},
    runtime::{
        Controller,
        controller::Action,
        reflector::ObjectRef,
        watcher::Config as WatcherConfig,
    },
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    client::ClientOptions,
    kubernetes::{
        self, Api, ConditionsExt, Object, Resource as _, error_policy, in_use, unused,
        constants::{ARGO_CROSSPLANE_IO_PROVIDER_CONFIG_KEY, FINALIZER_IN_USE},
    },
    managed::Managed,
    metrics::Metrics,
    usage::ProviderConfigUsage,
};

/*
 * ============================================================================
 * Custom Resource Definition
 * ============================================================================
 */
/// # Provider Config
///
/// Describes how to reach the cluster Argo Events runs in and which
/// namespace managed `EventSource`s are written to.
///
/// Managed resources select a Provider Config through
/// `.spec.providerConfigRef.name`, which defaults to `default`.
#[allow(clippy::module_name_repetitions)]
#[derive(CustomResource, JsonSchema, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[kube(
    group = "argo.crossplane.io",
    version = "v1alpha1",
    kind = "ProviderConfig",
    category = "crossplane",
    category = "provider",
    category = "argo",
    printcolumn = r#"{"name":"Namespace", "type":"string", "description":"Namespace event sources are written to", "jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Users", "type":"integer", "description":"Number of managed resources using this config", "jsonPath":".status.users"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    status = "ProviderConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigSpec {
    /// Namespace in the target cluster Argo Events `EventSource`s live in.
    pub namespace: String,

    /// Credentials used to connect to the target cluster.
    #[serde(default)]
    pub credentials: ProviderCredentials,
}

#[derive(JsonSchema, Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    /// Where the credentials come from.
    #[serde(default)]
    pub source: CredentialsSource,

    /// Secret holding a kubeconfig, required when `source` is `Secret`.
    pub secret_ref: Option<SecretKeySelector>,
}

#[derive(JsonSchema, Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsSource {
    /// Use the identity the provider runs with.
    #[default]
    None,

    /// Read a kubeconfig from a secret.
    Secret,

    /// Use the identity injected into the provider pod.
    InjectedIdentity,
}

#[derive(JsonSchema, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SecretKeySelector {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

#[allow(clippy::module_name_repetitions)]
#[derive(JsonSchema, Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub struct ProviderConfigStatus {
    /// Ready condition reflecting whether the config is in use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Number of managed resources using this config.
    pub users: Option<i64>,
}

impl Object for ProviderConfig {
    const APP_KUBERNETES_IO_COMPONENT_VALUE: &'static str = "provider-config";

    type Status = ProviderConfigStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        self.status.get_or_insert_with(Default::default)
    }
}

#[must_use]
pub fn generate_custom_resource_definition() -> CustomResourceDefinition {
    ProviderConfig::crd()
}

/*
 * ============================================================================
 * Reader
 * ============================================================================
 */
/// Read access to provider configs and the secrets they reference.
#[async_trait]
pub trait ProviderConfigReader: Send + Sync {
    async fn get_provider_config(&self, name: &str) -> Result<ProviderConfig>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;
}

pub struct KubeProviderConfigReader {
    client: Client,
    metrics: Metrics,
}

impl KubeProviderConfigReader {
    #[must_use]
    pub fn new(client: Client, metrics: &Metrics) -> Self {
        Self {
            client,
            metrics: metrics.clone(),
        }
    }
}

#[async_trait]
impl ProviderConfigReader for KubeProviderConfigReader {
    async fn get_provider_config(&self, name: &str) -> Result<ProviderConfig> {
        self.metrics
            .kubernetes_api_usage_count::<ProviderConfig>("get");
        kube::Api::<ProviderConfig>::all(self.client.clone())
            .get(name)
            .await
            .map_err(Error::GetProviderConfig)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.metrics.kubernetes_api_usage_count::<Secret>("get");
        kube::Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| Error::Credentials(Box::new(e)))
    }
}

/*
 * ============================================================================
 * Resolver
 * ============================================================================
 */
/// Resolves the namespace and cluster configuration a managed resource is
/// reconciled against.
///
/// # Errors
///
/// Will return `Err` if the managed resource has no provider config
/// reference, the provider config could not be read, or its credentials are
/// unusable.
pub async fn resolve_config<M: Managed>(
    reader: &dyn ProviderConfigReader,
    mg: &M,
) -> Result<ClientOptions> {
    let reference = mg
        .provider_config_reference()
        .ok_or(Error::Configuration("providerConfigRef is not given"))?;

    let provider_config = reader.get_provider_config(&reference.name).await?;

    let config = match provider_config.spec.credentials.source {
        CredentialsSource::Secret => {
            let selector = provider_config
                .spec
                .credentials
                .secret_ref
                .as_ref()
                .ok_or(Error::Configuration(
                    "credentials secretRef is required when source is Secret",
                ))?;
            kubeconfig_from_secret(reader, selector).await?
        }
        CredentialsSource::None | CredentialsSource::InjectedIdentity => kube::Config::infer()
            .await
            .map_err(|e| Error::Credentials(Box::new(e)))?,
    };

    Ok(ClientOptions {
        namespace: provider_config.spec.namespace,
        config,
    })
}

async fn kubeconfig_from_secret(
    reader: &dyn ProviderConfigReader,
    selector: &SecretKeySelector,
) -> Result<kube::Config> {
    let secret = reader
        .get_secret(&selector.namespace, &selector.name)
        .await?;

    let data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&selector.key))
        .ok_or_else(|| {
            Error::Credentials(
                format!(
                    "secret {}/{} has no key {}",
                    selector.namespace, selector.name, selector.key
                )
                .into(),
            )
        })?;

    let yaml = std::str::from_utf8(&data.0).map_err(|e| Error::Credentials(Box::new(e)))?;
    let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| Error::Credentials(Box::new(e)))?;

    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::Credentials(Box::new(e)))
}

/*
 * ============================================================================
 * Controller
 * ============================================================================
 */
pub async fn run_controller(client: Client, metrics: Metrics) {
    metrics.kubernetes_api_usage_count::<ProviderConfig>("watch");
    metrics.kubernetes_api_usage_count::<ProviderConfigUsage>("watch");
    Controller::new(
        kube::Api::<ProviderConfig>::all(client.clone()),
        WatcherConfig::default(),
    )
    .watches(
        kube::Api::<ProviderConfigUsage>::all(client.clone()),
        WatcherConfig::default(),
        |usage| {
            usage
                .labels()
                .get(ARGO_CROSSPLANE_IO_PROVIDER_CONFIG_KEY)
                .map(|name| ObjectRef::new(name))
        },
    )
    .shutdown_on_signal()
    .run(
        reconciler,
        error_policy::<ProviderConfig, Context>,
        Arc::new(Context { client, metrics }),
    )
    .for_each(|_| async {})
    .await;
}

/*
 * ============================================================================
 * Context
 * ============================================================================
 */
struct Context {
    client: Client,
    metrics: Metrics,
}

impl kubernetes::Context for Context {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/*
 * ============================================================================
 * Reconciler
 * ============================================================================
 */
#[tracing::instrument(skip(object, ctx), fields(name = %object.name_any()))]
async fn reconciler(object: Arc<ProviderConfig>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx
        .metrics
        .count_and_measure(ProviderConfig::APP_KUBERNETES_IO_COMPONENT_VALUE);
    tracing::info!("reconciling");

    let name = object.try_name()?;

    let users = Api::<ProviderConfigUsage>::new(kube::Api::all(ctx.client.clone()), &ctx.metrics)
        .list(&ListParams::default().labels(&format!(
            "{ARGO_CROSSPLANE_IO_PROVIDER_CONFIG_KEY}={name}"
        )))
        .await?
        .len();

    let api = Api::<ProviderConfig>::new(kube::Api::all(ctx.client.clone()), &ctx.metrics);

    api.update_status(&object, generate_status(&object, users))
        .await?;

    if object.is_deleting() {
        if users > 0 {
            tracing::info!(users, "waiting for usages to be removed");
            return Ok(Action::requeue(Duration::from_secs(30)));
        }

        if object.has_finalizer(FINALIZER_IN_USE) {
            let finalizers: Vec<_> = object
                .finalizers()
                .iter()
                .filter(|finalizer| *finalizer != FINALIZER_IN_USE)
                .cloned()
                .collect();
            api.patch_metadata(
                &name,
                serde_json::json!({
                    "finalizers": finalizers,
                    "resourceVersion": object.metadata.resource_version,
                }),
            )
            .await?;
        }

        tracing::info!("reconciled");
        return Ok(Action::await_change());
    }

    if !object.has_finalizer(FINALIZER_IN_USE) {
        let mut finalizers = object.finalizers().to_vec();
        finalizers.push(FINALIZER_IN_USE.into());
        api.patch_metadata(
            &name,
            serde_json::json!({
                "finalizers": finalizers,
                "resourceVersion": object.metadata.resource_version,
            }),
        )
        .await?;
    }

    tracing::info!("reconciled");

    Ok(Action::await_change())
}

fn generate_status(object: &ProviderConfig, users: usize) -> ProviderConfigStatus {
    let existing = object.status().cloned().unwrap_or_default();

    let condition = if users == 0 { unused() } else { in_use(users) };

    ProviderConfigStatus {
        conditions: existing.conditions.merge_from(&vec![condition]),
        users: Some(i64::try_from(users).unwrap_or(i64::MAX)),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use http::Method;
    use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::Utc};
    use kube::runtime::controller::Action;
    use serde_json::json;

    use crate::{
        Error,
        managed::ProviderConfigReference,
        testing::{
            Expect, FakeProviderConfigReader, kubeconfig_secret, managed_event_source, metrics,
            mock_client, patched_condition, provider_config, verified,
        },
    };

    use super::{
        Context, CredentialsSource, ProviderConfig, ProviderCredentials, SecretKeySelector,
        generate_status, reconciler, resolve_config,
    };

    const PATH: &str = "/apis/argo.crossplane.io/v1alpha1/providerconfigs/default";
    const STATUS_PATH: &str = "/apis/argo.crossplane.io/v1alpha1/providerconfigs/default/status";
    const USAGES_PATH: &str = "/apis/argo.crossplane.io/v1alpha1/providerconfigusages";

    fn deleting_provider_config() -> ProviderConfig {
        let mut object =
            provider_config("default", "argo-events", ProviderCredentials::default());
        object.metadata.finalizers = Some(vec!["in-use.crossplane.io".into()]);
        object.metadata.resource_version = Some("1".into());
        object.metadata.deletion_timestamp = Some(Time(Utc::now()));
        object
    }

    fn usages(names: &[&str]) -> serde_json::Value {
        let items: Vec<_> = names
            .iter()
            .map(|name| {
                json!({
                    "apiVersion": "argo.crossplane.io/v1alpha1",
                    "kind": "ProviderConfigUsage",
                    "metadata": {
                        "name": format!("{name}-uid"),
                        "labels": { "argo.crossplane.io/provider-config": "default" },
                    },
                    "spec": {
                        "providerConfigRef": { "name": "default" },
                        "resourceRef": {
                            "apiVersion": "events.argo.crossplane.io/v1alpha1",
                            "kind": "EventSource",
                            "name": name,
                            "uid": format!("{name}-uid"),
                        },
                    },
                })
            })
            .collect();

        json!({
            "apiVersion": "argo.crossplane.io/v1alpha1",
            "kind": "ProviderConfigUsageList",
            "metadata": { "resourceVersion": "1" },
            "items": items,
        })
    }

    fn context(client: kube::Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: metrics(),
        })
    }

    fn secret_credentials() -> ProviderCredentials {
        ProviderCredentials {
            source: CredentialsSource::Secret,
            secret_ref: Some(SecretKeySelector {
                name: "argo-kubeconfig".into(),
                namespace: "crossplane-system".into(),
                key: "kubeconfig".into(),
            }),
        }
    }

    #[tokio::test]
    async fn missing_reference_is_a_configuration_error() {
        // arrange
        let reader = FakeProviderConfigReader::default();
        let mut mg = managed_event_source("es-1");
        mg.spec.provider_config_ref = None;

        // act
        let error = resolve_config(&reader, &mg).await.unwrap_err();

        // assert
        assert!(matches!(error, Error::Configuration(_)));
        assert_eq!("providerConfigRef is not given", error.to_string());
        assert!(reader.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_provider_config_is_reported() {
        // arrange
        let reader = FakeProviderConfigReader::default();
        let mg = managed_event_source("es-1");

        // act
        let error = resolve_config(&reader, &mg).await.unwrap_err();

        // assert
        assert!(matches!(error, Error::GetProviderConfig(_)));
        assert!(error.to_string().starts_with("cannot get ProviderConfig"));
    }

    #[tokio::test]
    async fn secret_credentials_are_parsed_as_kubeconfig() {
        // arrange
        let reader = FakeProviderConfigReader::default()
            .with_provider_config(provider_config("default", "argo-events", secret_credentials()))
            .with_secret(kubeconfig_secret("argo-kubeconfig", "crossplane-system", "kubeconfig"));
        let mg = managed_event_source("es-1");

        // act
        let options = resolve_config(&reader, &mg).await.unwrap();

        // assert
        assert_eq!("argo-events", options.namespace);
        assert_eq!(Some("argo.example.com"), options.config.cluster_url.host());
        assert_eq!(Some(6443), options.config.cluster_url.port_u16());
    }

    #[tokio::test]
    async fn secret_without_key_is_a_credentials_error() {
        // arrange
        let reader = FakeProviderConfigReader::default()
            .with_provider_config(provider_config("default", "argo-events", secret_credentials()))
            .with_secret(kubeconfig_secret("argo-kubeconfig", "crossplane-system", "config"));
        let mg = managed_event_source("es-1");

        // act
        let error = resolve_config(&reader, &mg).await.unwrap_err();

        // assert
        assert_eq!(
            "cannot get credentials: secret crossplane-system/argo-kubeconfig has no key kubeconfig",
            error.to_string()
        );
    }

    #[tokio::test]
    async fn referenced_provider_config_is_read_by_name() {
        // arrange
        let reader = FakeProviderConfigReader::default();
        let mut mg = managed_event_source("es-1");
        mg.spec.provider_config_ref = Some(ProviderConfigReference {
            name: "cluster-a".into(),
        });

        // act
        let _ = resolve_config(&reader, &mg).await;

        // assert
        assert_eq!(vec!["cluster-a".to_string()], reader.requests());
    }

    #[test]
    fn status_counts_users() {
        // arrange
        let object = provider_config("default", "argo-events", ProviderCredentials::default());

        // act
        let in_use = generate_status(&object, 2);
        let unused = generate_status(&object, 0);

        // assert
        assert_eq!(Some(2), in_use.users);
        assert_eq!("InUse", in_use.conditions[0].reason);
        assert_eq!(Some(0), unused.users);
        assert_eq!("Unused", unused.conditions[0].reason);
    }

    #[tokio::test]
    async fn provider_config_in_use_is_not_released() {
        // arrange
        let (client, verifier) = mock_client();
        let object = deleting_provider_config();
        let response = serde_json::to_value(&object).unwrap();
        let server = verifier.run(vec![
            Expect::new(Method::GET, USAGES_PATH).respond(usages(&["es-1"])),
            Expect::new(Method::PATCH, STATUS_PATH).respond(response),
        ]);

        // act
        let action = reconciler(Arc::new(object), context(client)).await.unwrap();

        // assert
        let bodies = verified(server).await;
        assert_eq!(Action::requeue(Duration::from_secs(30)), action);
        assert_eq!(json!(1), bodies[1]["status"]["users"]);
        assert_eq!(("True", "InUse"), patched_condition(&bodies[1], "Ready"));
    }

    #[tokio::test]
    async fn unused_provider_config_is_released() {
        // arrange
        let (client, verifier) = mock_client();
        let object = deleting_provider_config();
        let response = serde_json::to_value(&object).unwrap();
        let server = verifier.run(vec![
            Expect::new(Method::GET, USAGES_PATH).respond(usages(&[])),
            Expect::new(Method::PATCH, STATUS_PATH).respond(response.clone()),
            Expect::new(Method::PATCH, PATH).respond(response),
        ]);

        // act
        let action = reconciler(Arc::new(object), context(client)).await.unwrap();

        // assert
        let bodies = verified(server).await;
        assert_eq!(Action::await_change(), action);
        assert_eq!(("True", "Unused"), patched_condition(&bodies[1], "Ready"));
        assert_eq!(
            json!({ "metadata": { "finalizers": [], "resourceVersion": "1" } }),
            bodies[2]
        );
    }

    #[tokio::test]
    async fn provider_config_gets_in_use_finalizer() {
        // arrange
        let (client, verifier) = mock_client();
        let mut object = provider_config("default", "argo-events", ProviderCredentials::default());
        object.metadata.resource_version = Some("1".into());
        let response = serde_json::to_value(&object).unwrap();
        let server = verifier.run(vec![
            Expect::new(Method::GET, USAGES_PATH).respond(usages(&[])),
            Expect::new(Method::PATCH, STATUS_PATH).respond(response.clone()),
            Expect::new(Method::PATCH, PATH).respond(response),
        ]);

        // act
        let action = reconciler(Arc::new(object), context(client)).await.unwrap();

        // assert
        let bodies = verified(server).await;
        assert_eq!(Action::await_change(), action);
        assert_eq!(
            json!(["in-use.crossplane.io"]),
            bodies[2]["metadata"]["finalizers"]
        );
    }
}

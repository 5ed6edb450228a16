use kube::api::{DeleteParams, ListParams, Patch, PatchParams};

use crate::{Error, Result, client::is_not_found, metrics::Metrics};

use super::{Object, Resource, constants::APP_KUBERNETES_IO_MANAGED_BY_VALUE};

pub struct Api<K> {
    api: kube::Api<K>,
    metrics: Metrics,
}

impl<K> Api<K> {
    pub fn new(api: kube::Api<K>, metrics: &Metrics) -> Self {
        Self {
            api,
            metrics: metrics.clone(),
        }
    }
}

impl<K> Api<K>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + serde::Serialize,
{
    /// Server side applies `resource`, taking ownership of conflicting fields.
    pub async fn apply(&self, resource: &K) -> Result<K> {
        let name = resource.try_name()?;

        self.metrics.kubernetes_api_usage_count::<K>("patch");
        self.api
            .patch(
                &name,
                &PatchParams::apply(APP_KUBERNETES_IO_MANAGED_BY_VALUE).force(),
                &Patch::Apply(resource),
            )
            .await
            .map_err(Error::Kube)
    }

    /// Deletes `name`, treating an already missing resource as deleted.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.metrics.kubernetes_api_usage_count::<K>("delete");
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(Error::Kube(error)),
        }
    }

    pub async fn get_opt(&self, name: &str) -> Result<Option<K>> {
        self.metrics.kubernetes_api_usage_count::<K>("get");
        self.api.get_opt(name).await.map_err(Error::Kube)
    }

    pub async fn list(&self, params: &ListParams) -> Result<Vec<K>> {
        self.metrics.kubernetes_api_usage_count::<K>("list");
        self.api
            .list(params)
            .await
            .map(|list| list.items)
            .map_err(Error::Kube)
    }

    /// Merge patches `.metadata`. Callers include `resourceVersion` when the
    /// patch replaces a list such as `finalizers`.
    pub async fn patch_metadata(&self, name: &str, metadata: serde_json::Value) -> Result<K> {
        self.metrics.kubernetes_api_usage_count::<K>("patch");
        self.api
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(serde_json::json!({ "metadata": metadata })),
            )
            .await
            .map_err(Error::Kube)
    }
}

impl<K> Api<K>
where
    K: Object
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + serde::Serialize,
{
    /// Patches `.status` only when it differs from what `object` already
    /// carries.
    pub async fn update_status(&self, object: &K, status: K::Status) -> Result<()> {
        match object.status() {
            Some(api_status) if &status == api_status => {}
            _ => {
                self.metrics.kubernetes_api_usage_count::<K>("patch");
                self.api
                    .patch_status(
                        &object.try_name()?,
                        &object.patch_status_params(),
                        &object.patch_status(status),
                    )
                    .await
                    .map_err(Error::Kube)?;
            }
        }

        Ok(())
    }
}

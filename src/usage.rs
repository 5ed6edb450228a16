use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Client, CustomResource, CustomResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    kubernetes::{
        Api, Resource as _, Subset,
        constants::{
            APP_KUBERNETES_IO_MANAGED_BY_KEY, APP_KUBERNETES_IO_MANAGED_BY_VALUE,
            ARGO_CROSSPLANE_IO_PROVIDER_CONFIG_KEY,
        },
    },
    managed::{Managed, ProviderConfigReference},
    metrics::Metrics,
};

/*
 * ============================================================================
 * Custom Resource Definition
 * ============================================================================
 */
/// # Provider Config Usage
///
/// Records that a managed resource uses a `ProviderConfig`. A
/// `ProviderConfig` cannot be deleted while usages of it exist.
#[allow(clippy::module_name_repetitions)]
#[derive(CustomResource, JsonSchema, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[kube(
    group = "argo.crossplane.io",
    version = "v1alpha1",
    kind = "ProviderConfigUsage",
    category = "crossplane",
    category = "provider",
    category = "argo",
    printcolumn = r#"{"name":"Config-Name", "type":"string", "jsonPath":".spec.providerConfigRef.name"}"#,
    printcolumn = r#"{"name":"Resource-Kind", "type":"string", "jsonPath":".spec.resourceRef.kind"}"#,
    printcolumn = r#"{"name":"Resource-Name", "type":"string", "jsonPath":".spec.resourceRef.name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigUsageSpec {
    /// The `ProviderConfig` in use.
    pub provider_config_ref: ProviderConfigReference,

    /// The managed resource using it.
    pub resource_ref: TypedReference,
}

#[derive(JsonSchema, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Option<String>,
}

#[must_use]
pub fn generate_custom_resource_definition() -> CustomResourceDefinition {
    ProviderConfigUsage::crd()
}

/*
 * ============================================================================
 * Tracker
 * ============================================================================
 */
/// Records which `ProviderConfig` a managed resource uses.
#[async_trait]
pub trait Tracker<M: Managed>: Send + Sync {
    async fn track(&self, mg: &M) -> Result<()>;
}

pub struct ProviderConfigUsageTracker {
    client: Client,
    metrics: Metrics,
}

impl ProviderConfigUsageTracker {
    #[must_use]
    pub fn new(client: Client, metrics: &Metrics) -> Self {
        Self {
            client,
            metrics: metrics.clone(),
        }
    }
}

#[async_trait]
impl<M: Managed> Tracker<M> for ProviderConfigUsageTracker {
    async fn track(&self, mg: &M) -> Result<()> {
        let Some(usage) = generate_usage(mg)? else {
            return Ok(());
        };

        let api = Api::<ProviderConfigUsage>::new(
            kube::Api::all(self.client.clone()),
            &self.metrics,
        );

        let existing = api.get_opt(&usage.try_name()?).await?;
        if existing.is_some_and(|existing| is_tracked(&existing, &usage)) {
            return Ok(());
        }

        api.apply(&usage).await?;

        Ok(())
    }
}

fn is_tracked(existing: &ProviderConfigUsage, usage: &ProviderConfigUsage) -> bool {
    existing.spec == usage.spec
        && usage
            .metadata
            .labels
            .as_ref()
            .is_none_or(|labels| {
                existing
                    .metadata
                    .labels
                    .as_ref()
                    .is_some_and(|existing| labels.is_subset(existing))
            })
}

/// One usage per managed resource, named after its uid.
fn generate_usage<M: Managed>(mg: &M) -> Result<Option<ProviderConfigUsage>> {
    let Some(reference) = mg.provider_config_reference() else {
        return Ok(None);
    };

    let uid = mg.try_uid()?;
    let owner_reference = mg
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;

    let mut usage = ProviderConfigUsage::new(
        uid,
        ProviderConfigUsageSpec {
            provider_config_ref: reference.clone(),
            resource_ref: TypedReference {
                api_version: M::api_version(&()).to_string(),
                kind: M::kind(&()).to_string(),
                name: mg.try_name()?.to_string(),
                uid: Some(uid.to_string()),
            },
        },
    );
    usage.metadata.labels = Some(BTreeMap::from([
        (
            APP_KUBERNETES_IO_MANAGED_BY_KEY.into(),
            APP_KUBERNETES_IO_MANAGED_BY_VALUE.into(),
        ),
        (
            ARGO_CROSSPLANE_IO_PROVIDER_CONFIG_KEY.into(),
            reference.name.clone(),
        ),
    ]));
    usage.metadata.owner_references = Some(vec![owner_reference]);

    Ok(Some(usage))
}

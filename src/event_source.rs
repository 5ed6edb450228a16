use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::{
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    apimachinery::pkg::apis::meta::v1::Condition,
};
use kube::{CustomResource, CustomResourceExt, api::ListParams};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, argo,
    client::{ClientOptions, EventSourceClient, is_not_found},
    kubernetes::{
        Object, Resource as _, Subset, available,
        constants::{
            APP_KUBERNETES_IO_MANAGED_BY_KEY, APP_KUBERNETES_IO_MANAGED_BY_VALUE,
            EVENTS_ARGO_CROSSPLANE_IO_LAST_APPLIED_KEY,
        },
    },
    managed::{
        ConnectionDetails, DeletionPolicy, ExternalClient, ExternalConnecter, ExternalCreation,
        ExternalObservation, ExternalUpdate, Managed, ProviderConfigReference, SecretReference,
    },
    provider_config::{ProviderConfigReader, resolve_config},
    usage::Tracker,
};

/*
 * ============================================================================
 * Custom Resource Definition
 * ============================================================================
 */
/// # Event Source
///
/// A managed Argo Events `EventSource`.
///
/// `.spec.forProvider` is written verbatim as the `.spec` of an Argo Events
/// `EventSource` in the namespace of the referenced `ProviderConfig`. The
/// external object is named after the `crossplane.io/external-name`
/// annotation, which defaults to the name of this resource.
#[allow(clippy::module_name_repetitions)]
#[derive(CustomResource, JsonSchema, Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[kube(
    group = "events.argo.crossplane.io",
    version = "v1alpha1",
    kind = "EventSource",
    category = "crossplane",
    category = "managed",
    category = "argo",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    status = "EventSourceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceSpec {
    /// Desired `.spec` of the Argo Events `EventSource`.
    #[schemars(schema_with = "crate::kubernetes::preserve_unknown_fields")]
    pub for_provider: serde_json::Map<String, serde_json::Value>,

    /// `ProviderConfig` used to connect. default: `default`.
    #[serde(default = "default_provider_config_ref")]
    pub provider_config_ref: Option<ProviderConfigReference>,

    /// What happens to the Argo Events `EventSource` when this resource is
    /// deleted. default: `Delete`.
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Secret connection details are written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,
}

#[allow(clippy::unnecessary_wraps)]
fn default_provider_config_ref() -> Option<ProviderConfigReference> {
    Some(ProviderConfigReference::default())
}

#[allow(clippy::module_name_repetitions)]
#[derive(JsonSchema, Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceStatus {
    /// `Ready` and `Synced` conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Last observed state of the Argo Events `EventSource`.
    pub at_provider: Option<EventSourceObservation>,
}

#[allow(clippy::module_name_repetitions)]
#[derive(JsonSchema, Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceObservation {
    pub uid: Option<String>,

    pub resource_version: Option<String>,

    /// `.status` reported by Argo Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::kubernetes::preserve_unknown_fields")]
    pub status: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Object for EventSource {
    const APP_KUBERNETES_IO_COMPONENT_VALUE: &'static str = "event-source";

    type Status = EventSourceStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        self.status.get_or_insert_with(Default::default)
    }
}

impl Managed for EventSource {
    fn provider_config_reference(&self) -> Option<&ProviderConfigReference> {
        self.spec.provider_config_ref.as_ref()
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy
    }

    fn write_connection_secret_to_reference(&self) -> Option<&SecretReference> {
        self.spec.write_connection_secret_to_ref.as_ref()
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map_or(&[], |status| status.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}

#[must_use]
pub fn generate_custom_resource_definition() -> CustomResourceDefinition {
    EventSource::crd()
}

/*
 * ============================================================================
 * Connector
 * ============================================================================
 */
/// Builds an [`EventSourceClient`] from resolved options.
pub type NewClientFn =
    Arc<dyn Fn(ClientOptions) -> Result<Box<dyn EventSourceClient>> + Send + Sync>;

pub struct Connector {
    reader: Arc<dyn ProviderConfigReader>,
    usage: Arc<dyn Tracker<EventSource>>,
    new_client: NewClientFn,
}

impl Connector {
    #[must_use]
    pub fn new(
        reader: Arc<dyn ProviderConfigReader>,
        usage: Arc<dyn Tracker<EventSource>>,
        new_client: NewClientFn,
    ) -> Self {
        Self {
            reader,
            usage,
            new_client,
        }
    }
}

#[async_trait]
impl ExternalConnecter<EventSource> for Connector {
    async fn connect(&self, mg: &EventSource) -> Result<Box<dyn ExternalClient<EventSource>>> {
        self.usage
            .track(mg)
            .await
            .map_err(|e| Error::Tracking(Box::new(e)))?;

        let options = resolve_config(self.reader.as_ref(), mg).await?;

        let client = (self.new_client)(options)?;

        Ok(Box::new(External { client }))
    }
}

/*
 * ============================================================================
 * External
 * ============================================================================
 */
struct External {
    client: Box<dyn EventSourceClient>,
}

#[async_trait]
impl ExternalClient<EventSource> for External {
    async fn observe(&self, mg: &mut EventSource) -> Result<ExternalObservation> {
        let Some(name) = mg.external_name().map(str::to_string) else {
            return Ok(ExternalObservation::default());
        };

        let observed = self
            .client
            .list(&ListParams::default().fields(&format!("metadata.name={name}")))
            .await
            .map_err(Error::ListFailed)?
            .into_iter()
            .find(|object| object.metadata.name.as_deref() == Some(name.as_str()));

        let Some(observed) = observed else {
            return Ok(ExternalObservation::default());
        };

        mg.set_conditions(vec![available()]);

        let resource_up_to_date = is_up_to_date(&mg.spec.for_provider, &observed);

        mg.status_mut().at_provider = Some(EventSourceObservation {
            uid: observed.metadata.uid,
            resource_version: observed.metadata.resource_version,
            status: observed.status.map(|status| status.fields),
        });

        Ok(ExternalObservation {
            resource_exists: true,
            resource_up_to_date,
            connection_details: ConnectionDetails::new(),
        })
    }

    async fn create(&self, mg: &mut EventSource) -> Result<ExternalCreation> {
        let object = generate_event_source(mg)?;

        self.client
            .create(&object)
            .await
            .map_err(Error::CreateFailed)?;

        Ok(ExternalCreation::default())
    }

    async fn update(&self, mg: &mut EventSource) -> Result<ExternalUpdate> {
        let name = external_name(mg)?;

        let mut object = self.client.get(&name).await.map_err(Error::GetFailed)?;
        object.spec.fields = mg.spec.for_provider.clone();
        record_applied_spec(&mut object, &mg.spec.for_provider);

        self.client
            .replace(&object)
            .await
            .map_err(Error::UpdateFailed)?;

        Ok(ExternalUpdate::default())
    }

    async fn delete(&self, mg: &mut EventSource) -> Result<()> {
        let name = external_name(mg)?;

        match self.client.delete(&name).await {
            Ok(()) => Ok(()),
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(Error::DeleteFailed(error)),
        }
    }
}

fn external_name(mg: &EventSource) -> Result<String> {
    match mg.external_name() {
        Some(name) => Ok(name.to_string()),
        None => mg.try_name().map(String::from),
    }
}

fn generate_event_source(mg: &EventSource) -> Result<argo::EventSource> {
    let mut object = argo::EventSource::new(
        &external_name(mg)?,
        argo::EventSourceSpec {
            fields: mg.spec.for_provider.clone(),
        },
    );
    object.metadata.labels = Some(BTreeMap::from([(
        APP_KUBERNETES_IO_MANAGED_BY_KEY.into(),
        APP_KUBERNETES_IO_MANAGED_BY_VALUE.into(),
    )]));
    record_applied_spec(&mut object, &mg.spec.for_provider);

    Ok(object)
}

/// Up to date when `desired` is what was last written and the observed spec
/// still carries all of it.
///
/// Keys the API server defaults are not drift, so the observed spec is only
/// checked for containing `desired`. Keys removed from `desired` are caught
/// by comparing against the last written spec.
fn is_up_to_date(
    desired: &serde_json::Map<String, serde_json::Value>,
    observed: &argo::EventSource,
) -> bool {
    applied_spec(observed).is_some_and(|applied| &applied == desired)
        && desired.is_subset(&observed.spec.fields)
}

fn applied_spec(object: &argo::EventSource) -> Option<serde_json::Map<String, serde_json::Value>> {
    object
        .metadata
        .annotations
        .as_ref()?
        .get(EVENTS_ARGO_CROSSPLANE_IO_LAST_APPLIED_KEY)
        .and_then(|applied| serde_json::from_str(applied).ok())
}

fn record_applied_spec(
    object: &mut argo::EventSource,
    spec: &serde_json::Map<String, serde_json::Value>,
) {
    object
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            EVENTS_ARGO_CROSSPLANE_IO_LAST_APPLIED_KEY.into(),
            serde_json::Value::Object(spec.clone()).to_string(),
        );
}

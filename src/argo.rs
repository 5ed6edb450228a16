//! The Argo Events `EventSource` as stored in the target cluster.
//!
//! Only metadata is typed. The spec and status are carried as opaque JSON so
//! that every event source type Argo Events supports passes through unchanged.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[allow(clippy::module_name_repetitions)]
#[derive(CustomResource, Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "EventSource",
    namespaced,
    schema = "disabled",
    status = "EventSourceStatus",
    derive = "Default",
    derive = "PartialEq"
)]
pub struct EventSourceSpec {
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[allow(clippy::module_name_repetitions)]
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub struct EventSourceStatus {
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

use kube::api::{Patch, PatchParams};

use super::constants::APP_KUBERNETES_IO_MANAGED_BY_VALUE;

/// A custom resource owned by this controller, with a status subresource
/// written back after every reconciliation.
pub trait Object: kube::Resource<DynamicType = ()> {
    const APP_KUBERNETES_IO_COMPONENT_VALUE: &'static str;

    type Status: Clone + Default + PartialEq + serde::Serialize + Send + Sync;

    fn patch_status(&self, status: Self::Status) -> Patch<serde_json::Value> {
        Patch::Merge(serde_json::json!({ "status": status }))
    }

    fn patch_status_params(&self) -> PatchParams {
        PatchParams::apply(APP_KUBERNETES_IO_MANAGED_BY_VALUE)
    }

    fn status(&self) -> Option<&Self::Status>;

    fn status_mut(&mut self) -> &mut Self::Status;
}

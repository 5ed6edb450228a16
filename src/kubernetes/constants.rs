pub const APP_KUBERNETES_IO_MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";
pub const APP_KUBERNETES_IO_MANAGED_BY_VALUE: &str = "provider-argo-events";

pub const ARGO_CROSSPLANE_IO_PROVIDER_CONFIG_KEY: &str = "argo.crossplane.io/provider-config";

pub const CONNECTION_CROSSPLANE_IO_SECRET_TYPE: &str = "connection.crossplane.io/v1alpha1";

pub const CROSSPLANE_IO_EXTERNAL_NAME_KEY: &str = "crossplane.io/external-name";

pub const CROSSPLANE_IO_PAUSED_KEY: &str = "crossplane.io/paused";

pub const FINALIZER_IN_USE: &str = "in-use.crossplane.io";

pub const FINALIZER_MANAGED_RESOURCE: &str = "finalizer.managedresource.crossplane.io";

pub const EVENTS_ARGO_CROSSPLANE_IO_LAST_APPLIED_KEY: &str =
    "events.argo.crossplane.io/last-applied-for-provider";

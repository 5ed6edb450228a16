#![warn(clippy::pedantic)]

pub mod argo;
pub mod cli;
pub mod client;
pub mod event_source;
pub mod http_server;
pub mod kubernetes;
pub mod managed;
pub mod metrics;
pub mod otel;
pub mod provider_config;
pub mod usage;

#[cfg(test)]
mod testing;

/*
 * ============================================================================
 * Error
 * ============================================================================
 */
#[derive(Debug)]
pub enum Error {
    ClientCreation(kube::Error),
    Configuration(&'static str),
    CreateFailed(kube::Error),
    Credentials(Box<dyn std::error::Error + Send + Sync + 'static>),
    DeleteFailed(kube::Error),
    GetFailed(kube::Error),
    GetProviderConfig(kube::Error),
    Kube(kube::Error),
    ListFailed(kube::Error),
    MissingObjectKey(&'static str),
    Tracking(Box<Error>),
    UpdateFailed(kube::Error),
}

impl Error {
    /// Short, stable label used for metrics and event reasons.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ClientCreation(_) => "client creation",
            Error::Configuration(_) => "configuration",
            Error::CreateFailed(_) => "create failed",
            Error::Credentials(_) => "credentials",
            Error::DeleteFailed(_) => "delete failed",
            Error::GetFailed(_) => "get failed",
            Error::GetProviderConfig(_) => "get provider config",
            Error::Kube(_) => "kube",
            Error::ListFailed(_) => "list failed",
            Error::MissingObjectKey(_) => "missing object key",
            Error::Tracking(_) => "tracking",
            Error::UpdateFailed(_) => "update failed",
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ClientCreation(e)
            | Error::CreateFailed(e)
            | Error::DeleteFailed(e)
            | Error::GetFailed(e)
            | Error::GetProviderConfig(e)
            | Error::Kube(e)
            | Error::ListFailed(e)
            | Error::UpdateFailed(e) => Some(e),
            Error::Credentials(e) => Some(e.as_ref()),
            Error::Tracking(e) => Some(e.as_ref()),
            Error::Configuration(_) | Error::MissingObjectKey(_) => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ClientCreation(e) => write!(f, "cannot create new Service: {e}"),
            Error::Configuration(message) => write!(f, "{message}"),
            Error::CreateFailed(e) => write!(f, "cannot create EventSource: {e}"),
            Error::Credentials(e) => write!(f, "cannot get credentials: {e}"),
            Error::DeleteFailed(e) => write!(f, "cannot delete EventSource: {e}"),
            Error::GetFailed(e) => write!(f, "cannot get EventSource: {e}"),
            Error::GetProviderConfig(e) => write!(f, "cannot get ProviderConfig: {e}"),
            Error::Kube(e) => write!(f, "kubernetes api: {e}"),
            Error::ListFailed(e) => write!(f, "cannot list EventSources: {e}"),
            Error::MissingObjectKey(key) => write!(f, "missing object key {key}"),
            Error::Tracking(e) => write!(f, "cannot track ProviderConfig usage: {e}"),
            Error::UpdateFailed(e) => write!(f, "cannot update EventSource: {e}"),
        }
    }
}

/*
 * ============================================================================
 * Result
 * ============================================================================
 */
pub type Result<T, E = Error> = std::result::Result<T, E>;

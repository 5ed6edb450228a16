mod api;
mod conditions;
pub mod constants;
mod context;
mod error_policy;
mod object;
mod resource;
mod schema;
mod subset;

pub use api::Api;
pub use conditions::{
    ConditionsExt, available, creating, deleting, in_use, reconcile_error, reconcile_paused,
    reconcile_success, unused,
};
pub use context::Context;
pub use error_policy::error_policy;
pub use object::Object;
pub use resource::Resource;
pub use schema::preserve_unknown_fields;
pub use subset::Subset;

use crate::{Error, Result};

/// Accessors for metadata every object handled here is expected to carry.
pub trait Resource: kube::Resource<DynamicType = ()> {
    fn try_name(&self) -> Result<&str> {
        self.meta()
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))
    }

    fn try_uid(&self) -> Result<&str> {
        self.meta()
            .uid
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.uid"))
    }

    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.meta()
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
    }
}

impl<K> Resource for K where K: kube::Resource<DynamicType = ()> {}

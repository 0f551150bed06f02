//! Error types for pool construction, leasing and return

use crate::factory::ResourceClassId;
use crate::scope::ScopeId;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by factory callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared form of a factory error, kept `Clone` for [`PoolError`]
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// Malformed factory configuration; fatal at startup
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A discovery-capable provider could not be reached while building the registry
    #[error("Factory '{factory}' failed to discover its resource classes: {source}")]
    Discovery {
        factory: String,
        #[source]
        source: SharedError,
    },

    #[error("No execution scope is active for this lease request")]
    NoAmbientScope,

    #[error("Scope {0} is already closed")]
    ScopeClosed(ScopeId),

    #[error("No resources available - no default resource class is configured")]
    NoDefaultResource,

    #[error("Unknown resource class '{0}'")]
    UnknownResourceClass(ResourceClassId),

    #[error("Pool '{resource_class}' exhausted - no instance freed within {timeout:?}")]
    ResourceExhausted {
        resource_class: ResourceClassId,
        timeout: Duration,
    },

    #[error("Failed to create an instance for '{resource_class}': {source}")]
    ResourceConstruction {
        resource_class: ResourceClassId,
        #[source]
        source: SharedError,
    },

    /// Lease token unknown to the pool; it was already returned or never borrowed here
    #[error("Lease {token} is not outstanding in pool '{resource_class}'")]
    NotLeased {
        resource_class: ResourceClassId,
        token: u64,
    },

    #[error("Pool '{0}' has been shut down")]
    ShutDown(ResourceClassId),
}

impl PoolError {
    /// Whether a caller at a higher layer may reasonably retry the request
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PoolError::ResourceExhausted { .. } | PoolError::ResourceConstruction { .. }
        )
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        PoolError::Configuration(message.into())
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let exhausted = PoolError::ResourceExhausted {
            resource_class: ResourceClassId::from("fast"),
            timeout: Duration::from_millis(5),
        };
        assert!(exhausted.is_retriable());

        let construction = PoolError::ResourceConstruction {
            resource_class: ResourceClassId::from("fast"),
            source: Arc::from(BoxError::from("connection refused")),
        };
        assert!(construction.is_retriable());

        assert!(!PoolError::NoAmbientScope.is_retriable());
        assert!(!PoolError::NoDefaultResource.is_retriable());
        assert!(!PoolError::configuration("empty identifier").is_retriable());
    }

    #[test]
    fn test_messages_name_the_resource_class() {
        let err = PoolError::UnknownResourceClass(ResourceClassId::from("gpt-x"));
        assert_eq!(err.to_string(), "Unknown resource class 'gpt-x'");
    }
}

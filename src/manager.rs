//! Public entry point: lease a resource for the current scope

use crate::config::RegistryConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::registry::PoolRegistry;
use crate::scope::{Scope, ScopeHandle, ScopeId};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Leases pooled resources to scopes, once per scope and resource class
///
/// Construct one at startup and hand clones to whatever opens scopes.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use scoped_lease::{
///     BoxError, FactoryConfig, LeaseManager, RegistryConfiguration, ResourceClassId,
///     ResourceFactory,
/// };
/// use std::sync::Arc;
///
/// struct Echo;
///
/// #[async_trait]
/// impl ResourceFactory for Echo {
///     type Resource = String;
///
///     fn kind(&self) -> &str {
///         "echo"
///     }
///
///     fn validate_configuration(&self) -> bool {
///         true
///     }
///
///     async fn create(&self, id: &ResourceClassId) -> Result<String, BoxError> {
///         Ok(format!("client for {}", id))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = RegistryConfiguration::new().with_factory(FactoryConfig::new(Echo, ["echo-1"]));
/// let manager = LeaseManager::start(config).await.unwrap();
///
/// let scope = manager.begin_scope();
/// let first = manager.get(&scope, None).await.unwrap();
/// let again = manager.get(&scope, Some("echo-1")).await.unwrap();
/// assert!(Arc::ptr_eq(&first, &again));
///
/// drop(scope);
/// assert_eq!(manager.registry().get_pool("echo-1").unwrap().active_count(), 0);
/// # }
/// ```
pub struct LeaseManager<R: Send + Sync + 'static> {
    registry: Arc<PoolRegistry<R>>,
    next_scope: Arc<AtomicU64>,
}

impl<R: Send + Sync + 'static> Clone for LeaseManager<R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            next_scope: Arc::clone(&self.next_scope),
        }
    }
}

impl<R: Send + Sync + 'static> LeaseManager<R> {
    pub fn new(registry: Arc<PoolRegistry<R>>) -> Self {
        Self {
            registry,
            next_scope: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Build the registry and wrap it
    pub async fn start(config: RegistryConfiguration<R>) -> PoolResult<Self> {
        let registry = PoolRegistry::build(config).await?;
        Ok(Self::new(Arc::new(registry)))
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<R>> {
        &self.registry
    }

    /// Open a scope; its leases are returned when it is dropped
    pub fn begin_scope(&self) -> Scope<R> {
        let id = ScopeId::new(self.next_scope.fetch_add(1, Ordering::Relaxed));
        Scope::open(id, Arc::clone(&self.registry))
    }

    /// Lease the resource for `id` (or the default) within `scope`
    ///
    /// Repeated calls for the same class in the same scope return the same
    /// instance without borrowing again.
    ///
    /// The returned handle is only valid while `scope` is open. Closing the
    /// scope gives the instance back to its pool whether or not handles are
    /// still held, and a later scope may be leased the same instance. Handles
    /// still alive at close are logged as a warning.
    pub async fn get(&self, scope: &ScopeHandle<R>, id: Option<&str>) -> PoolResult<Arc<R>> {
        let id = self.registry.resolve(id)?;
        self.check_owner(scope)?;
        scope.lease(id).await
    }

    /// Like [`get`](Self::get), using the task's ambient scope
    ///
    /// Fails with [`PoolError::NoAmbientScope`] outside
    /// [`ScopeHandle::enter`].
    pub async fn get_current(&self, id: Option<&str>) -> PoolResult<Arc<R>> {
        let id = self.registry.resolve(id)?;
        let scope = ScopeHandle::<R>::current().ok_or(PoolError::NoAmbientScope)?;
        self.check_owner(&scope)?;
        scope.lease(id).await
    }

    fn check_owner(&self, scope: &ScopeHandle<R>) -> PoolResult<()> {
        if Arc::ptr_eq(scope.registry(), &self.registry) {
            return Ok(());
        }
        Err(PoolError::configuration(format!(
            "{} was opened by a different lease manager",
            scope.id()
        )))
    }

    /// Shut down every pool
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for LeaseManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseManager")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FactoryConfig;
    use crate::errors::BoxError;
    use crate::factory::{ResourceClassId, ResourceFactory};
    use async_trait::async_trait;

    struct Named;

    #[async_trait]
    impl ResourceFactory for Named {
        type Resource = String;

        fn kind(&self) -> &str {
            "named"
        }

        fn validate_configuration(&self) -> bool {
            true
        }

        async fn create(&self, id: &ResourceClassId) -> Result<String, BoxError> {
            Ok(id.to_string())
        }
    }

    async fn named_manager() -> LeaseManager<String> {
        let config = RegistryConfiguration::new()
            .with_factory(FactoryConfig::new(Named, ["fast", "slow"]))
            .with_default("slow");
        LeaseManager::start(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_default_and_explicit_identifiers() {
        let manager = named_manager().await;
        let scope = manager.begin_scope();

        assert_eq!(manager.get(&scope, None).await.unwrap().as_str(), "slow");
        assert_eq!(manager.get(&scope, Some("fast")).await.unwrap().as_str(), "fast");
        assert!(matches!(
            manager.get(&scope, Some("missing")).await,
            Err(PoolError::UnknownResourceClass(_))
        ));
    }

    #[tokio::test]
    async fn test_scope_ids_are_unique() {
        let manager = named_manager().await;
        let first = manager.begin_scope();
        let second = manager.clone().begin_scope();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_get_current_requires_ambient_scope() {
        let manager = named_manager().await;
        assert!(matches!(
            manager.get_current(Some("fast")).await,
            Err(PoolError::NoAmbientScope)
        ));

        let scope = manager.begin_scope();
        let leased = scope.enter(manager.get_current(None)).await.unwrap();
        let explicit = manager.get(&scope, Some("slow")).await.unwrap();
        assert!(Arc::ptr_eq(&leased, &explicit));
    }

    #[tokio::test]
    async fn test_foreign_scope_rejected() {
        let manager = named_manager().await;
        let other = named_manager().await;
        let scope = other.begin_scope();

        assert!(matches!(
            manager.get(&scope, Some("fast")).await,
            Err(PoolError::Configuration(_))
        ));
    }
}

//! Registry and pool configuration

use crate::errors::{PoolError, PoolResult};
use crate::factory::{ResourceClassId, ResourceFactory};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Bounds and behavior of every pool built from one factory entry
///
/// # Examples
///
/// ```
/// use scoped_lease::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_active(4)
///     .with_max_idle(2)
///     .with_borrow_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.max_active, 4);
/// assert_eq!(config.max_idle, 2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Maximum number of instances leased at the same time
    pub max_active: usize,

    /// Maximum number of idle instances kept for reuse
    pub max_idle: usize,

    /// How long a borrow waits for capacity before failing
    pub borrow_timeout: Duration,

    /// Instances to pre-create when the pool is built
    pub warmup_size: Option<usize>,

    /// Whether idle instances are checked with `is_valid` before reuse
    pub validate_on_borrow: bool,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_active: 8,
            max_idle: 8,
            borrow_timeout: Duration::from_secs(30),
            warmup_size: None,
            validate_on_borrow: true,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_active(mut self, count: usize) -> Self {
        self.max_active = count;
        self
    }

    pub fn with_max_idle(mut self, count: usize) -> Self {
        self.max_idle = count;
        self
    }

    pub fn with_borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    /// Pre-create up to `size` idle instances (capped by `max_idle`)
    pub fn with_warmup(mut self, size: usize) -> Self {
        self.warmup_size = Some(size);
        self
    }

    pub fn without_borrow_validation(mut self) -> Self {
        self.validate_on_borrow = false;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.max_active == 0 {
            return Err(PoolError::configuration("max_active must be greater than 0"));
        }
        if self.max_active > Semaphore::MAX_PERMITS {
            return Err(PoolError::configuration(format!(
                "max_active must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.borrow_timeout.is_zero() {
            return Err(PoolError::configuration(
                "borrow_timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Where a factory's resource classes come from
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ServedIdentifiers {
    /// Fixed list from configuration
    Static(Vec<ResourceClassId>),

    /// Ask the provider at startup
    Discover,
}

impl ServedIdentifiers {
    /// Static list, or `Discover` when the list is empty
    pub fn from_list<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceClassId>,
    {
        let ids: Vec<ResourceClassId> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            ServedIdentifiers::Discover
        } else {
            ServedIdentifiers::Static(ids)
        }
    }
}

/// One factory plus the pools it should back
pub struct FactoryConfig<R: Send + Sync + 'static> {
    pub factory: Arc<dyn ResourceFactory<Resource = R>>,
    pub identifiers: ServedIdentifiers,
    pub pool: PoolConfiguration,
}

impl<R: Send + Sync + 'static> FactoryConfig<R> {
    /// Entry serving a static list of resource classes
    pub fn new<F, I, S>(factory: F, ids: I) -> Self
    where
        F: ResourceFactory<Resource = R> + 'static,
        I: IntoIterator<Item = S>,
        S: Into<ResourceClassId>,
    {
        Self {
            factory: Arc::new(factory),
            identifiers: ServedIdentifiers::from_list(ids),
            pool: PoolConfiguration::default(),
        }
    }

    /// Entry whose resource classes are discovered from the provider
    pub fn discovering<F>(factory: F) -> Self
    where
        F: ResourceFactory<Resource = R> + 'static,
    {
        Self {
            factory: Arc::new(factory),
            identifiers: ServedIdentifiers::Discover,
            pool: PoolConfiguration::default(),
        }
    }

    /// Entry around an already shared factory
    pub fn from_shared(
        factory: Arc<dyn ResourceFactory<Resource = R>>,
        identifiers: ServedIdentifiers,
    ) -> Self {
        Self {
            factory,
            identifiers,
            pool: PoolConfiguration::default(),
        }
    }

    pub fn with_pool(mut self, pool: PoolConfiguration) -> Self {
        self.pool = pool;
        self
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for FactoryConfig<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryConfig")
            .field("kind", &self.factory.kind())
            .field("identifiers", &self.identifiers)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Everything the registry needs at startup
pub struct RegistryConfiguration<R: Send + Sync + 'static> {
    pub factories: Vec<FactoryConfig<R>>,

    /// Preferred resource class for requests that do not name one
    pub default_identifier: Option<ResourceClassId>,
}

impl<R: Send + Sync + 'static> Default for RegistryConfiguration<R> {
    fn default() -> Self {
        Self {
            factories: Vec::new(),
            default_identifier: None,
        }
    }
}

impl<R: Send + Sync + 'static> RegistryConfiguration<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, factory: FactoryConfig<R>) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn with_default(mut self, id: impl Into<ResourceClassId>) -> Self {
        self.default_identifier = Some(id.into());
        self
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for RegistryConfiguration<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfiguration")
            .field("factories", &self.factories)
            .field("default_identifier", &self.default_identifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_configuration_bounds() {
        assert!(PoolConfiguration::new().with_max_active(0).validate().is_err());
        assert!(
            PoolConfiguration::new()
                .with_borrow_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(PoolConfiguration::new().with_max_idle(0).validate().is_ok());
    }

    #[test]
    fn test_unbounded_sizes() {
        assert!(
            PoolConfiguration::new()
                .with_max_active(usize::MAX)
                .validate()
                .is_err()
        );
        assert!(
            PoolConfiguration::new()
                .with_max_active(Semaphore::MAX_PERMITS)
                .with_max_idle(usize::MAX)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_empty_static_list_means_discover() {
        let empty: Vec<&str> = Vec::new();
        assert_eq!(ServedIdentifiers::from_list(empty), ServedIdentifiers::Discover);
        assert_eq!(
            ServedIdentifiers::from_list(["fast"]),
            ServedIdentifiers::Static(vec![ResourceClassId::from("fast")])
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_configuration_from_json() {
        let pool: PoolConfiguration = serde_json::from_str(
            r#"{"max_active": 2, "borrow_timeout": {"secs": 1, "nanos": 0}}"#,
        )
        .unwrap();
        assert_eq!(pool.max_active, 2);
        assert_eq!(pool.max_idle, 8);
        assert_eq!(pool.borrow_timeout, Duration::from_secs(1));

        let ids: ServedIdentifiers = serde_json::from_str(r#"{"static": ["a", "b"]}"#).unwrap();
        assert_eq!(ids, ServedIdentifiers::from_list(["a", "b"]));

        let discover: ServedIdentifiers = serde_json::from_str(r#""discover""#).unwrap();
        assert_eq!(discover, ServedIdentifiers::Discover);
    }
}

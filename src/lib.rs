//! # scoped_lease
//!
//! Pools of expensive client handles, one pool per resource class (for
//! example one per remote model identifier), leased to request scopes and
//! returned automatically when the scope ends.
//!
//! ## Features
//!
//! - One bounded pool per resource class, built once at startup
//! - Static or provider-discovered resource classes per factory
//! - Degraded startup when no factory can be provisioned
//! - Lazy default resource class for requests that do not name one
//! - One lease per (scope, resource class), returned exactly once on scope close
//! - Borrow timeouts with a caller-visible exhausted error
//! - Explicit scope handles plus an opt-in task-local ambient scope
//! - Pool warm-up, metrics, health snapshots and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use scoped_lease::{BoxError, FactoryConfig, LeaseManager, RegistryConfiguration};
//! use scoped_lease::{ResourceClassId, ResourceFactory};
//!
//! struct ModelClient;
//!
//! #[async_trait]
//! impl ResourceFactory for ModelClient {
//!     type Resource = String;
//!
//!     fn kind(&self) -> &str {
//!         "demo"
//!     }
//!
//!     fn validate_configuration(&self) -> bool {
//!         true
//!     }
//!
//!     async fn create(&self, id: &ResourceClassId) -> Result<String, BoxError> {
//!         Ok(format!("client:{}", id))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = RegistryConfiguration::new()
//!     .with_factory(FactoryConfig::new(ModelClient, ["small", "large"]));
//! let manager = LeaseManager::start(config).await.unwrap();
//!
//! {
//!     let scope = manager.begin_scope();
//!     let client = manager.get(&scope, Some("large")).await.unwrap();
//!     println!("Got: {}", client);
//!     // Lease returned to its pool when `scope` goes out of scope
//! }
//! # }
//! ```

mod config;
mod errors;
pub mod factory;
mod health;
mod manager;
mod metrics;
mod pool;
mod registry;
mod scope;

pub use config::{FactoryConfig, PoolConfiguration, RegistryConfiguration, ServedIdentifiers};
pub use errors::{BoxError, PoolError, PoolResult, SharedError};
pub use factory::{DiscoveryError, ResourceClassId, ResourceFactory};
pub use health::{HealthStatus, RegistryHealth};
pub use manager::LeaseManager;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{Leased, ResourcePool};
pub use registry::PoolRegistry;
pub use scope::{Scope, ScopeHandle, ScopeId};

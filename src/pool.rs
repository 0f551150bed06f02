//! Bounded pool of instances for one resource class

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::factory::{ResourceClassId, ResourceFactory};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// One borrowed instance together with the token that proves the borrow
///
/// The token is fresh for every borrow, so a stale handle can never return
/// an instance that has since been leased to someone else.
pub struct Leased<R> {
    resource_class: ResourceClassId,
    token: u64,
    resource: Arc<R>,
}

impl<R> Leased<R> {
    pub fn resource_class(&self) -> &ResourceClassId {
        &self.resource_class
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }
}

impl<R> fmt::Debug for Leased<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leased")
            .field("resource_class", &self.resource_class)
            .field("token", &self.token)
            .finish()
    }
}

/// Thread-safe bounded pool serving a single resource class
///
/// At most `max_active` instances are leased at once; further borrows wait
/// up to `borrow_timeout`. Returned instances stay idle up to `max_idle`
/// and are destroyed beyond that.
pub struct ResourcePool<R: Send + Sync + 'static> {
    id: ResourceClassId,
    factory: Arc<dyn ResourceFactory<Resource = R>>,
    idle: SegQueue<Arc<R>>,
    idle_len: AtomicUsize,
    leased: DashMap<u64, ()>,
    permits: Semaphore,
    config: PoolConfiguration,
    metrics: MetricsTracker,
    next_token: AtomicU64,
    shut_down: AtomicBool,
}

impl<R: Send + Sync + 'static> ResourcePool<R> {
    pub fn new(
        id: ResourceClassId,
        factory: Arc<dyn ResourceFactory<Resource = R>>,
        config: PoolConfiguration,
    ) -> PoolResult<Self> {
        config.validate()?;
        if id.is_blank() {
            return Err(PoolError::configuration(format!(
                "factory '{}' produced an empty resource class identifier",
                factory.kind()
            )));
        }

        debug!(
            resource_class = %id,
            factory = factory.kind(),
            max_active = config.max_active,
            max_idle = config.max_idle,
            "Created resource pool"
        );

        Ok(Self {
            idle: SegQueue::new(),
            idle_len: AtomicUsize::new(0),
            leased: DashMap::new(),
            permits: Semaphore::new(config.max_active),
            metrics: MetricsTracker::new(),
            next_token: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            id,
            factory,
            config,
        })
    }

    pub fn resource_class(&self) -> &ResourceClassId {
        &self.id
    }

    pub fn factory_kind(&self) -> &str {
        self.factory.kind()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.config
    }

    /// Borrow an instance, waiting up to `borrow_timeout` for capacity
    ///
    /// Idle instances are reused after passing `is_valid`; otherwise a new
    /// one is created. Dropping the returned future releases any capacity it
    /// had reserved and parks an idle instance it was still validating.
    pub async fn borrow(&self) -> PoolResult<Leased<R>> {
        let timeout = self.config.borrow_timeout;
        let permit = match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::ShutDown(self.id.clone())),
            Err(_) => {
                MetricsTracker::bump(&self.metrics.exhausted_events);
                debug!(
                    resource_class = %self.id,
                    ?timeout,
                    "Borrow timed out waiting for capacity"
                );
                return Err(PoolError::ResourceExhausted {
                    resource_class: self.id.clone(),
                    timeout,
                });
            }
        };

        let resource = self.take_idle_or_create().await?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.leased.insert(token, ());
        // Capacity is handed back in `return_instance`, not on drop.
        permit.forget();
        MetricsTracker::bump(&self.metrics.total_borrowed);
        debug!(resource_class = %self.id, token, "Borrowed instance");

        Ok(Leased {
            resource_class: self.id.clone(),
            token,
            resource,
        })
    }

    async fn take_idle_or_create(&self) -> PoolResult<Arc<R>> {
        while let Some(candidate) = self.pop_idle() {
            if !self.config.validate_on_borrow {
                return Ok(candidate);
            }

            // Parks the candidate again if the borrow is dropped mid-check.
            let pending = Reclaim {
                pool: self,
                instance: Some(Arc::clone(&candidate)),
            };
            let valid = self.factory.is_valid(&candidate).await;
            pending.disarm();

            if valid {
                return Ok(candidate);
            }
            MetricsTracker::bump(&self.metrics.validation_failures);
            debug!(resource_class = %self.id, "Discarding invalid idle instance");
            self.destroy(candidate);
        }

        let instance = self.create_instance().await?;
        Ok(instance)
    }

    async fn create_instance(&self) -> PoolResult<Arc<R>> {
        debug!(resource_class = %self.id, "Creating new instance");
        let instance = self
            .factory
            .create(&self.id)
            .await
            .map_err(|source| PoolError::ResourceConstruction {
                resource_class: self.id.clone(),
                source: Arc::from(source),
            })?;
        MetricsTracker::bump(&self.metrics.total_created);
        Ok(Arc::new(instance))
    }

    /// Hand a leased instance back
    ///
    /// Fails with [`PoolError::NotLeased`] if the lease was already returned
    /// or belongs to another pool; nothing is changed in that case.
    pub fn return_instance(&self, lease: &Leased<R>) -> PoolResult<()> {
        if lease.resource_class != self.id || self.leased.remove(&lease.token).is_none() {
            MetricsTracker::bump(&self.metrics.return_failures);
            return Err(PoolError::NotLeased {
                resource_class: self.id.clone(),
                token: lease.token,
            });
        }
        MetricsTracker::bump(&self.metrics.total_returned);

        self.reclaim(Arc::clone(&lease.resource));
        self.permits.add_permits(1);
        debug!(resource_class = %self.id, token = lease.token, "Returned instance");
        Ok(())
    }

    /// Pre-create idle instances, capped by `max_idle`
    pub async fn warmup(&self, count: usize) -> PoolResult<usize> {
        let mut created = 0;
        for _ in 0..count.min(self.config.max_idle) {
            let instance = self.create_instance().await?;
            if let Err(instance) = self.park_idle(instance) {
                self.destroy(instance);
                break;
            }
            created += 1;
        }
        Ok(created)
    }

    /// Refuse further borrows and destroy every idle instance
    ///
    /// Leased instances are destroyed when they come back.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();
        let drained = self.drain_idle();
        if !self.leased.is_empty() {
            warn!(
                resource_class = %self.id,
                outstanding = self.leased.len(),
                "Pool shut down with instances still leased"
            );
        }
        debug!(resource_class = %self.id, drained, "Pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Keep `instance` idle, or destroy it when shut down or over `max_idle`
    fn reclaim(&self, instance: Arc<R>) {
        if self.is_shut_down() {
            self.destroy(instance);
            return;
        }
        if let Err(instance) = self.park_idle(instance) {
            debug!(resource_class = %self.id, "Idle bound reached, destroying instance");
            self.destroy(instance);
            return;
        }
        // Shutdown may have drained the queue before the push landed.
        if self.is_shut_down() {
            self.drain_idle();
        }
    }

    fn park_idle(&self, instance: Arc<R>) -> Result<(), Arc<R>> {
        let max_idle = self.config.max_idle;
        let reserved = self
            .idle_len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < max_idle).then_some(len + 1)
            });
        if reserved.is_err() {
            return Err(instance);
        }
        self.idle.push(instance);
        Ok(())
    }

    fn pop_idle(&self) -> Option<Arc<R>> {
        let instance = self.idle.pop()?;
        self.idle_len.fetch_sub(1, Ordering::AcqRel);
        Some(instance)
    }

    fn drain_idle(&self) -> usize {
        let mut drained = 0;
        while let Some(instance) = self.pop_idle() {
            self.destroy(instance);
            drained += 1;
        }
        drained
    }

    fn destroy(&self, instance: Arc<R>) {
        MetricsTracker::bump(&self.metrics.total_destroyed);
        self.factory.destroy(instance);
    }

    /// Get leased count
    pub fn active_count(&self) -> usize {
        self.leased.len()
    }

    /// Get idle count
    pub fn idle_count(&self) -> usize {
        self.idle_len.load(Ordering::Acquire)
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        self.metrics
            .get_metrics(self.active_count(), self.idle_count(), self.config.max_active)
    }

    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus::from_metrics(&self.get_metrics())
    }
}

/// Idle instance taken by an in-flight borrow
///
/// Handed back through `ResourcePool::reclaim` on drop unless disarmed.
struct Reclaim<'a, R: Send + Sync + 'static> {
    pool: &'a ResourcePool<R>,
    instance: Option<Arc<R>>,
}

impl<R: Send + Sync + 'static> Reclaim<'_, R> {
    fn disarm(mut self) {
        self.instance = None;
    }
}

impl<R: Send + Sync + 'static> Drop for Reclaim<'_, R> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            debug!(resource_class = %self.pool.id, "Borrow dropped during validation");
            self.pool.reclaim(instance);
        }
    }
}

impl<R: Send + Sync + 'static> Drop for ResourcePool<R> {
    fn drop(&mut self) {
        self.drain_idle();
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for ResourcePool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("resource_class", &self.id)
            .field("factory", &self.factory.kind())
            .field("active", &self.active_count())
            .field("idle", &self.idle_count())
            .finish()
    }
}

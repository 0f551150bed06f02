//! Execution scopes and the leases they own

use crate::errors::{PoolError, PoolResult};
use crate::factory::ResourceClassId;
use crate::pool::Leased;
use crate::registry::PoolRegistry;

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

tokio::task_local! {
    static CURRENT_SCOPE: Arc<dyn Any + Send + Sync>;
}

/// Identifier of one request, session or interaction scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// One (scope, resource class) lease; returned at most once
struct Slot<R> {
    lease: OnceCell<Leased<R>>,
    released: AtomicBool,
}

impl<R: Send + Sync + 'static> Slot<R> {
    fn new() -> Self {
        Self {
            lease: OnceCell::new(),
            released: AtomicBool::new(false),
        }
    }

    /// Hand the lease back if it exists and nobody else has
    fn release(&self, registry: &PoolRegistry<R>) -> Option<PoolResult<()>> {
        let lease = self.lease.get()?;
        if self.released.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(registry.return_instance(lease))
    }

    /// Handles to the leased instance held outside this slot
    fn outstanding_handles(&self) -> usize {
        self.lease
            .get()
            .map_or(0, |lease| Arc::strong_count(lease.resource()).saturating_sub(1))
    }
}

/// Per-scope table of leases, created on first lease
///
/// The lock only guards slot lookup; borrows run inside the slot so
/// different resource classes are leased in parallel while requests for the
/// same class wait for a single borrow.
struct LeaseTable<R> {
    slots: Mutex<HashMap<ResourceClassId, Arc<Slot<R>>>>,
}

impl<R: Send + Sync + 'static> LeaseTable<R> {
    fn slot(&self, id: &ResourceClassId) -> Arc<Slot<R>> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(id.clone()).or_insert_with(|| Arc::new(Slot::new())))
    }
}

struct ScopeInner<R: Send + Sync + 'static> {
    id: ScopeId,
    registry: Arc<PoolRegistry<R>>,
    closed: AtomicBool,
    table: OnceLock<LeaseTable<R>>,
}

impl<R: Send + Sync + 'static> ScopeInner<R> {
    fn table(&self) -> &LeaseTable<R> {
        self.table.get_or_init(|| {
            debug!(scope = %self.id, "Created scope lease table");
            LeaseTable {
                slots: Mutex::new(HashMap::new()),
            }
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn lease(&self, id: ResourceClassId) -> PoolResult<Arc<R>> {
        if self.is_closed() {
            return Err(PoolError::ScopeClosed(self.id));
        }

        let slot = self.table().slot(&id);
        let lease = slot
            .lease
            .get_or_try_init(|| self.registry.borrow(&id))
            .await?;

        // Teardown may have swept the table while this borrow was in flight.
        if self.is_closed() {
            if let Some(Err(e)) = slot.release(&self.registry) {
                warn!(
                    scope = %self.id,
                    resource_class = %id,
                    error = %e,
                    "Failed to return late lease"
                );
            }
            return Err(PoolError::ScopeClosed(self.id));
        }

        Ok(Arc::clone(lease.resource()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(table) = self.table.get() else {
            debug!(scope = %self.id, "Scope closed without leases");
            return;
        };

        let slots = std::mem::take(&mut *table.slots.lock());
        let mut returned = 0usize;
        for (id, slot) in slots {
            let held = slot.outstanding_handles();
            if held > 0 {
                warn!(
                    scope = %self.id,
                    resource_class = %id,
                    held,
                    "Leased instance still referenced after scope close"
                );
            }
            match slot.release(&self.registry) {
                Some(Ok(())) => returned += 1,
                Some(Err(e)) => {
                    warn!(
                        scope = %self.id,
                        resource_class = %id,
                        error = %e,
                        "Failed to return lease at scope close"
                    );
                }
                None => {}
            }
        }
        debug!(scope = %self.id, returned, "Scope closed");
    }
}

/// Cloneable reference to an open scope
///
/// Handles can be moved into sub-tasks of the scope's work. Leasing through
/// a handle after its [`Scope`] has closed fails with
/// [`PoolError::ScopeClosed`].
pub struct ScopeHandle<R: Send + Sync + 'static> {
    inner: Arc<ScopeInner<R>>,
}

impl<R: Send + Sync + 'static> Clone for ScopeHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Send + Sync + 'static> ScopeHandle<R> {
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Resource classes currently leased by this scope
    pub fn leased_classes(&self) -> Vec<ResourceClassId> {
        let Some(table) = self.inner.table.get() else {
            return Vec::new();
        };
        let slots = table.slots.lock();
        let mut ids: Vec<ResourceClassId> = slots
            .iter()
            .filter(|(_, slot)| slot.lease.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Run `future` with this scope as the task's ambient scope
    ///
    /// Inside it, [`LeaseManager::get_current`] leases without being handed
    /// the scope explicitly.
    ///
    /// [`LeaseManager::get_current`]: crate::LeaseManager::get_current
    pub async fn enter<F: Future>(&self, future: F) -> F::Output {
        let ambient: Arc<dyn Any + Send + Sync> = self.inner.clone();
        CURRENT_SCOPE.scope(ambient, future).await
    }

    /// The ambient scope of the current task, if it leases `R`
    pub fn current() -> Option<Self> {
        let ambient = CURRENT_SCOPE.try_with(Arc::clone).ok()?;
        let inner = ambient.downcast::<ScopeInner<R>>().ok()?;
        Some(Self { inner })
    }

    pub(crate) fn registry(&self) -> &Arc<PoolRegistry<R>> {
        &self.inner.registry
    }

    pub(crate) async fn lease(&self, id: ResourceClassId) -> PoolResult<Arc<R>> {
        self.inner.lease(id).await
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for ScopeHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owning guard of a scope; dropping it returns every lease
///
/// Teardown runs exactly once, from [`close`](Scope::close) or from `Drop`,
/// and attempts every return even when some fail.
pub struct Scope<R: Send + Sync + 'static> {
    handle: ScopeHandle<R>,
}

impl<R: Send + Sync + 'static> Scope<R> {
    pub(crate) fn open(id: ScopeId, registry: Arc<PoolRegistry<R>>) -> Self {
        Self {
            handle: ScopeHandle {
                inner: Arc::new(ScopeInner {
                    id,
                    registry,
                    closed: AtomicBool::new(false),
                    table: OnceLock::new(),
                }),
            },
        }
    }

    pub fn handle(&self) -> ScopeHandle<R> {
        self.handle.clone()
    }

    /// End the scope now
    pub fn close(self) {
        drop(self);
    }
}

impl<R: Send + Sync + 'static> Deref for Scope<R> {
    type Target = ScopeHandle<R>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<R: Send + Sync + 'static> Drop for Scope<R> {
    fn drop(&mut self) {
        self.handle.inner.close();
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for Scope<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scope").field(&self.handle.inner.id).finish()
    }
}

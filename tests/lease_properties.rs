use async_trait::async_trait;
use scoped_lease::{
    BoxError, DiscoveryError, FactoryConfig, LeaseManager, PoolConfiguration, PoolError,
    RegistryConfiguration, ResourceClassId, ResourceFactory, ServedIdentifiers,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Stand-in for a remote model client
#[derive(Debug)]
struct ModelClient {
    model: ResourceClassId,
    serial: usize,
}

#[derive(Default)]
struct Provider {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    create_delay: Option<Duration>,
    credential_missing: bool,
}

#[async_trait]
impl ResourceFactory for Provider {
    type Resource = ModelClient;

    fn kind(&self) -> &str {
        "provider"
    }

    fn validate_configuration(&self) -> bool {
        !self.credential_missing
    }

    async fn discover_served_identifiers(&self) -> Result<Vec<ResourceClassId>, DiscoveryError> {
        Ok(vec!["fast".into(), "slow".into()])
    }

    async fn create(&self, id: &ResourceClassId) -> Result<ModelClient, BoxError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ModelClient {
            model: id.clone(),
            serial: self.created.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn destroy(&self, _instance: Arc<ModelClient>) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

async fn start(provider: Arc<Provider>, pool: PoolConfiguration) -> LeaseManager<ModelClient> {
    let entry = FactoryConfig::<ModelClient>::from_shared(provider, ServedIdentifiers::Discover);
    let config = RegistryConfiguration::new().with_factory(entry.with_pool(pool));
    LeaseManager::start(config).await.unwrap()
}

#[tokio::test]
async fn test_repeated_get_in_scope_returns_same_instance() {
    let provider = Arc::new(Provider::default());
    let manager = start(provider.clone(), PoolConfiguration::default()).await;
    let pool = manager.registry().get_pool("fast").unwrap();

    let scope = manager.begin_scope();
    let first = manager.get(&scope, Some("fast")).await.unwrap();
    let second = manager.get(&scope, Some("fast")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.model, "fast");
    assert_eq!(pool.active_count(), 1);
    assert_eq!(pool.get_metrics().total_borrowed, 1);
}

#[tokio::test]
async fn test_each_lease_returned_exactly_once_on_close() {
    let provider = Arc::new(Provider::default());
    let manager = start(provider.clone(), PoolConfiguration::default()).await;

    let scope = manager.begin_scope();
    for _ in 0..3 {
        manager.get(&scope, Some("fast")).await.unwrap();
        manager.get(&scope, Some("slow")).await.unwrap();
    }
    assert_eq!(scope.leased_classes(), ["fast", "slow"]);
    scope.close();

    for id in ["fast", "slow"] {
        let metrics = manager.registry().get_pool(id).unwrap().get_metrics();
        assert_eq!(metrics.total_borrowed, 1);
        assert_eq!(metrics.total_returned, 1);
        assert_eq!(metrics.return_failures, 0);
        assert_eq!(metrics.active_instances, 0);
        assert_eq!(metrics.idle_instances, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scopes_never_share_an_instance() {
    let provider = Arc::new(Provider::default());
    let manager = start(provider.clone(), PoolConfiguration::new().with_max_active(4)).await;

    let all_leased = Arc::new(tokio::sync::Barrier::new(4));
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        let all_leased = Arc::clone(&all_leased);
        tasks.push(tokio::spawn(async move {
            let scope = manager.begin_scope();
            let client = manager.get(&scope, Some("fast")).await.unwrap();
            // every scope holds its lease at this point
            all_leased.wait().await;
            client.serial
        }));
    }

    let mut serials = Vec::new();
    for task in tasks {
        serials.push(task.await.unwrap());
    }
    serials.sort();
    serials.dedup();
    assert_eq!(serials.len(), 4);
}

#[tokio::test]
async fn test_second_scope_waits_for_first_to_close() {
    let provider = Arc::new(Provider::default());
    let pool = PoolConfiguration::new()
        .with_max_active(1)
        .with_borrow_timeout(Duration::from_secs(5));
    let manager = start(provider.clone(), pool).await;

    let first = manager.begin_scope();
    let held = manager.get(&first, Some("fast")).await.unwrap();
    let held_serial = held.serial;
    drop(held);

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let scope = manager.begin_scope();
            let client = manager.get(&scope, Some("fast")).await?;
            Ok::<_, PoolError>(client.serial)
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    first.close();
    let serial = waiter.await.unwrap().unwrap();
    assert_eq!(serial, held_serial);
    assert_eq!(provider.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_active_bound_times_out_extra_borrow() {
    let provider = Arc::new(Provider::default());
    let pool = PoolConfiguration::new()
        .with_max_active(2)
        .with_borrow_timeout(Duration::from_millis(25));
    let manager = start(provider, pool).await;

    let a = manager.begin_scope();
    let b = manager.begin_scope();
    let c = manager.begin_scope();
    manager.get(&a, Some("slow")).await.unwrap();
    manager.get(&b, Some("slow")).await.unwrap();

    let err = manager.get(&c, Some("slow")).await.unwrap_err();
    assert!(matches!(err, PoolError::ResourceExhausted { .. }));
    assert!(err.is_retriable());
    assert_eq!(manager.registry().get_pool("slow").unwrap().active_count(), 2);

    drop(a);
    assert!(manager.get(&c, Some("slow")).await.is_ok());
}

#[tokio::test]
async fn test_fan_out_within_scope_borrows_once() {
    let provider = Arc::new(Provider {
        create_delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let manager = start(provider.clone(), PoolConfiguration::default()).await;
    let scope = manager.begin_scope();

    let mut tasks = Vec::new();
    for i in 0..6 {
        let manager = manager.clone();
        let handle = scope.handle();
        let id = if i % 2 == 0 { "fast" } else { "slow" };
        tasks.push(tokio::spawn(async move { manager.get(&handle, Some(id)).await }));
    }

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap().unwrap());
    }

    assert_eq!(provider.created.load(Ordering::SeqCst), 2);
    for pair in clients.chunks(2) {
        assert_ne!(pair[0].model, pair[1].model);
    }
    assert!(Arc::ptr_eq(&clients[0], &clients[2]));
    assert!(Arc::ptr_eq(&clients[1], &clients[5]));
}

#[tokio::test]
async fn test_all_factories_invalid_still_starts() {
    let provider = Arc::new(Provider {
        credential_missing: true,
        ..Default::default()
    });
    let manager = start(provider, PoolConfiguration::default()).await;
    assert!(manager.registry().is_degraded());

    let scope = manager.begin_scope();
    assert!(matches!(
        manager.get(&scope, None).await,
        Err(PoolError::NoDefaultResource)
    ));
    assert!(matches!(
        manager.get(&scope, Some("fast")).await,
        Err(PoolError::UnknownResourceClass(_))
    ));
}

#[tokio::test]
async fn test_no_factories_means_no_default() {
    let manager = LeaseManager::<ModelClient>::start(RegistryConfiguration::new())
        .await
        .unwrap();
    let scope = manager.begin_scope();

    let err = manager.get(&scope, None).await.unwrap_err();
    assert!(matches!(err, PoolError::NoDefaultResource));
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn test_ambient_scope_required_for_get_current() {
    let provider = Arc::new(Provider::default());
    let manager = start(provider, PoolConfiguration::default()).await;

    assert!(matches!(
        manager.get_current(Some("fast")).await,
        Err(PoolError::NoAmbientScope)
    ));

    let scope = manager.begin_scope();
    let same = scope
        .enter(async {
            let a = manager.get_current(Some("fast")).await.unwrap();
            let b = manager.get_current(Some("fast")).await.unwrap();
            Arc::ptr_eq(&a, &b)
        })
        .await;
    assert!(same);
}

#[tokio::test]
async fn test_shutdown_destroys_pooled_instances() {
    let provider = Arc::new(Provider::default());
    let manager = start(provider.clone(), PoolConfiguration::default()).await;

    {
        let scope = manager.begin_scope();
        manager.get(&scope, Some("fast")).await.unwrap();
        manager.get(&scope, Some("slow")).await.unwrap();
    }

    manager.shutdown();
    assert_eq!(provider.destroyed.load(Ordering::SeqCst), 2);

    let scope = manager.begin_scope();
    assert!(matches!(
        manager.get(&scope, Some("fast")).await,
        Err(PoolError::ShutDown(_))
    ));
}

#[tokio::test]
async fn test_handle_kept_past_close_does_not_pin_the_lease() {
    let provider = Arc::new(Provider::default());
    let pool = PoolConfiguration::new().with_max_active(1);
    let manager = start(provider.clone(), pool).await;

    let first = manager.begin_scope();
    let kept = manager.get(&first, Some("fast")).await.unwrap();
    drop(first);

    let stats = manager.registry().get_pool("fast").unwrap();
    assert_eq!(stats.active_count(), 0);
    assert_eq!(stats.idle_count(), 1);

    let second = manager.begin_scope();
    let next = manager.get(&second, Some("fast")).await.unwrap();
    assert!(Arc::ptr_eq(&kept, &next));
    assert_eq!(provider.created.load(Ordering::SeqCst), 1);
}

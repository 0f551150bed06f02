//! Sub-tasks of one scope sharing its leases, plus metrics export

use async_trait::async_trait;
use scoped_lease::{
    BoxError, FactoryConfig, LeaseManager, PoolConfiguration, RegistryConfiguration,
    ResourceClassId, ResourceFactory,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct Connector {
    opened: AtomicUsize,
}

#[async_trait]
impl ResourceFactory for Connector {
    type Resource = String;

    fn kind(&self) -> &str {
        "connector"
    }

    fn validate_configuration(&self) -> bool {
        true
    }

    async fn create(&self, id: &ResourceClassId) -> Result<String, BoxError> {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}#{}", id, n))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    println!("=== scoped_lease - Fan-out Example ===\n");

    let connector = Connector {
        opened: AtomicUsize::new(0),
    };
    let config = RegistryConfiguration::new().with_factory(
        FactoryConfig::new(connector, ["search", "store"])
            .with_pool(PoolConfiguration::new().with_max_active(4).with_warmup(1)),
    );
    let manager = LeaseManager::start(config).await.unwrap();

    let scope = manager.begin_scope();
    let mut handles = vec![];
    for i in 0..6 {
        let manager = manager.clone();
        let scope = scope.handle();
        let id = if i % 2 == 0 { "search" } else { "store" };
        handles.push(tokio::spawn(async move {
            let client = manager.get(&scope, Some(id)).await.unwrap();
            println!("   Task {} using {}", i, client);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    scope.close();

    for (id, metrics) in manager.registry().metrics() {
        println!(
            "   {}: borrowed={} returned={} idle={}",
            id, metrics.total_borrowed, metrics.total_returned, metrics.idle_instances
        );
    }

    #[cfg(feature = "metrics")]
    println!("\n{}", manager.registry().export_metrics_prometheus(None).unwrap());
}

//! Basic usage examples for LeaseManager

use async_trait::async_trait;
use scoped_lease::{
    BoxError, DiscoveryError, FactoryConfig, LeaseManager, PoolConfiguration,
    RegistryConfiguration, ResourceClassId, ResourceFactory,
};
use std::time::Duration;

/// Pretend chat client for one model
struct ChatClient {
    model: ResourceClassId,
}

struct HostedProvider {
    api_key: Option<String>,
}

#[async_trait]
impl ResourceFactory for HostedProvider {
    type Resource = ChatClient;

    fn kind(&self) -> &str {
        "hosted"
    }

    fn validate_configuration(&self) -> bool {
        scoped_lease::factory::is_real_credential(self.api_key.as_deref())
    }

    async fn discover_served_identifiers(&self) -> Result<Vec<ResourceClassId>, DiscoveryError> {
        Ok(vec!["chat-small".into(), "chat-large".into()])
    }

    async fn create(&self, id: &ResourceClassId) -> Result<ChatClient, BoxError> {
        Ok(ChatClient { model: id.clone() })
    }
}

#[tokio::main]
async fn main() {
    println!("=== scoped_lease - Basic Examples ===\n");

    // Example 1: Lease within a scope
    lease_in_scope().await;

    // Example 2: Exhausted pool
    exhausted_pool().await;

    // Example 3: Degraded startup
    degraded_startup().await;
}

async fn start(api_key: &str, pool: PoolConfiguration) -> LeaseManager<ChatClient> {
    let provider = HostedProvider {
        api_key: Some(api_key.to_string()),
    };
    let config = RegistryConfiguration::new()
        .with_factory(FactoryConfig::discovering(provider).with_pool(pool))
        .with_default("chat-large");
    LeaseManager::start(config).await.unwrap()
}

async fn lease_in_scope() {
    println!("1. Lease in Scope:");
    let manager = start("sk-demo", PoolConfiguration::default()).await;

    {
        let scope = manager.begin_scope();
        let client = manager.get(&scope, None).await.unwrap();
        let again = manager.get(&scope, Some("chat-large")).await.unwrap();
        println!("   {} leased {}", scope.id(), client.model);
        println!("   Same instance on second get: {}", std::sync::Arc::ptr_eq(&client, &again));
        // Lease returned when `scope` is dropped
    }

    let pool = manager.registry().get_pool("chat-large").unwrap();
    println!("   Idle after scope close: {}\n", pool.idle_count());
}

async fn exhausted_pool() {
    println!("2. Exhausted Pool:");
    let config = PoolConfiguration::new()
        .with_max_active(1)
        .with_borrow_timeout(Duration::from_millis(100));
    let manager = start("sk-demo", config).await;

    let holder = manager.begin_scope();
    let _client = manager.get(&holder, Some("chat-small")).await.unwrap();

    let other = manager.begin_scope();
    match manager.get(&other, Some("chat-small")).await {
        Ok(_) => println!("   Got instance"),
        Err(e) => println!("   Error: {} (retriable: {})", e, e.is_retriable()),
    }

    println!();
}

async fn degraded_startup() {
    println!("3. Degraded Startup:");
    let manager = start("your-api-key", PoolConfiguration::default()).await;
    println!("   Degraded: {}", manager.registry().is_degraded());

    let scope = manager.begin_scope();
    if let Err(e) = manager.get(&scope, None).await {
        println!("   Error: {}", e);
    }
}

// scoped_lease demo binary
// Run the fuller walkthroughs with: cargo run --example basic

use async_trait::async_trait;
use scoped_lease::{
    BoxError, FactoryConfig, LeaseManager, PoolConfiguration, RegistryConfiguration,
    ResourceClassId, ResourceFactory,
};
use tracing_subscriber::EnvFilter;

struct DemoClient;

#[async_trait]
impl ResourceFactory for DemoClient {
    type Resource = String;

    fn kind(&self) -> &str {
        "demo"
    }

    fn validate_configuration(&self) -> bool {
        true
    }

    async fn create(&self, id: &ResourceClassId) -> Result<String, BoxError> {
        Ok(format!("client bound to {}", id))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== scoped_lease ===");
    println!("Run: cargo run --example basic");
    println!();

    let config = RegistryConfiguration::new().with_factory(
        FactoryConfig::new(DemoClient, ["small", "large"])
            .with_pool(PoolConfiguration::new().with_max_active(2)),
    );
    let manager = LeaseManager::start(config).await?;

    {
        let scope = manager.begin_scope();
        let client = manager.get(&scope, None).await?;
        println!("  {} leased: {}", scope.id(), client);
    }

    let pool = manager.registry().get_pool("small")?;
    println!("  Idle after scope close: {}", pool.idle_count());

    manager.shutdown();
    Ok(())
}

//! Connect to a realtime endpoint and print every event.
//!
//! ```sh
//! cargo run --example storefront_feed --features tracing -- ws://127.0.0.1:9001/realtime
//! ```

use futures::StreamExt as _;
use storefront_realtime::{Config, ConnectionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_realtime=debug".into()),
        )
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001/realtime".to_owned());

    let manager = ConnectionManager::new(Config::default());
    let mut events = Box::pin(manager.events());

    manager.connect(&endpoint).await?;
    manager.send(&serde_json::json!({"subscribe": "inventory"}))?;

    while let Some(event) = events.next().await {
        println!("{:?}", event?);
    }

    Ok(())
}

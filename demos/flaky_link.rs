//! Exercise the retry machinery against an endpoint that keeps failing.
//!
//! Point it at a port with nothing listening and watch the capped exponential
//! backoff run its budget down to the terminal `Exhausted` event.
//!
//! ```sh
//! cargo run --example flaky_link --features tracing -- ws://127.0.0.1:9/void
//! ```

use std::time::Duration;

use storefront_realtime::{Config, ConnectionManager, Event, EventKind};
use tokio::sync::mpsc;

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
        .unwrap_or_else(|| "ws://127.0.0.1:9/void".to_owned());

    let mut config = Config::default();
    config.connect_timeout = Duration::from_secs(2);
    config.reconnect.max_attempts = Some(5);
    config.reconnect.initial_backoff = Duration::from_millis(250);
    config.reconnect.max_backoff = Duration::from_secs(2);

    let manager = ConnectionManager::new(config);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let _sub = manager.on(EventKind::Connection, move |event| {
        println!("{event:?}");
        if matches!(event, Event::Exhausted { .. }) {
            drop(done_tx.send(()));
        }
    });

    if let Err(e) = manager.connect(&endpoint).await {
        println!("initial attempt failed: {e}");
    }

    done_rx.recv().await;
    println!("retry budget spent, settling disconnected");
    manager.disconnect().await;

    Ok(())
}

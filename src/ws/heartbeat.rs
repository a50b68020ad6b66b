//! Liveness probing for open connections.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use super::config::Config;

/// Outbound liveness probe envelope: `{"type":"ping","timestamp":<epoch-ms>}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum Probe {
    Ping {
        /// Epoch milliseconds at send time
        timestamp: i64,
    },
}

impl Probe {
    pub(crate) fn ping_now() -> Self {
        Self::Ping {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Whether a parsed inbound message is a pong envelope.
pub(crate) fn is_pong(value: &serde_json::Value) -> bool {
    value.get("type").and_then(serde_json::Value::as_str) == Some("pong")
}

/// Periodic ping with pong-deadline enforcement.
///
/// Runs only while the connection is open; [`HeartbeatMonitor::stop`] is called
/// on every exit from the open state. A missed or stale pong is reported on the
/// expiry channel and handled exactly like a transport-level error.
pub(crate) struct HeartbeatMonitor {
    pong_tx: watch::Sender<Instant>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub(crate) fn new() -> Self {
        let (pong_tx, _) = watch::channel(Instant::now());
        Self {
            pong_tx,
            handle: None,
        }
    }

    /// Record a pong observation.
    pub(crate) fn observe_pong(&self) {
        drop(self.pong_tx.send(Instant::now()));
    }

    /// Start probing. A second `start` while already running is a no-op, not a
    /// duplicate interval.
    pub(crate) fn start(
        &mut self,
        config: &Config,
        ping_tx: mpsc::UnboundedSender<String>,
        expired_tx: mpsc::UnboundedSender<()>,
        cancel: CancellationToken,
    ) {
        if self.handle.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let mut pong_rx = self.pong_tx.subscribe();
        let heartbeat_interval = config.heartbeat_interval;
        let heartbeat_timeout = config.heartbeat_timeout;

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(heartbeat_interval);
            // The first tick fires immediately; consume it so probing starts
            // one full interval after the connection opens.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // Mark the current pong state as seen before sending the ping,
                // so a stale pong cannot satisfy the new deadline.
                drop(pong_rx.borrow_and_update());

                let ping_sent = Instant::now();
                let Ok(probe) = serde_json::to_string(&Probe::ping_now()) else {
                    break;
                };
                if ping_tx.send(probe).is_err() {
                    // Connection loop has terminated
                    break;
                }

                match timeout(heartbeat_timeout, pong_rx.changed()).await {
                    Ok(Ok(())) => {
                        let last_pong = *pong_rx.borrow_and_update();
                        if last_pong < ping_sent {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(
                                "Pong received but older than last ping, connection may be stale"
                            );
                            drop(expired_tx.send(()));
                            break;
                        }
                    }
                    Ok(Err(_)) => {
                        // Channel closed, connection is terminating
                        break;
                    }
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            "Heartbeat timeout: no pong received within {heartbeat_timeout:?}"
                        );
                        drop(expired_tx.send(()));
                        break;
                    }
                }
            }
        }));
    }

    /// Stop probing and clear any pending deadline.
    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

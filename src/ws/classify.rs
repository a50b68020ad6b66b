//! Pure classification of transport failures.
//!
//! [`classify`] maps a raw [`Failure`] plus the ready state it occurred in to
//! a stable category, an operator-facing message and a retryability verdict.
//! It has no side effects; identical inputs always yield the identical
//! classification, which the reconnect tests rely on.

use super::transport::{Failure, ReadyState};

/// Failure category, ordered by the action required to recover.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    /// The link itself is unreliable or unreachable
    Network,
    /// The remote endpoint reported an internal problem
    Server,
    /// The remote endpoint rejected our identity; retrying cannot help
    Auth,
    /// A deadline elapsed
    Timeout,
    /// The environment cannot establish this kind of connection
    Compatibility,
    /// Nothing better could be determined
    Unknown,
}

/// Runtime environment, used as a heuristic when a close carries no reason.
///
/// In development a bare close usually means the local backend is not running;
/// in production it usually means the network dropped.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development against a backend that may not be up
    Development,
    /// Deployed environment
    #[default]
    Production,
}

/// A classified transport failure.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// Failure category
    pub category: Category,
    /// Human-readable description suitable for surfacing to an operator
    pub message: String,
    /// Whether the manager may retry automatically
    pub retryable: bool,
}

impl Classified {
    fn new<S: Into<String>>(category: Category, message: S, retryable: bool) -> Self {
        Self {
            category,
            message: message.into(),
            retryable,
        }
    }
}

/// Classify a raw transport failure.
///
/// Explicit close-reason keywords take precedence over close codes, which take
/// precedence over ready-state fallbacks.
#[must_use]
pub fn classify(failure: &Failure, ready_state: ReadyState, env: Environment) -> Classified {
    if let Some(classified) = classify_reason(reason_text(failure)) {
        return classified;
    }

    match failure {
        Failure::Timeout => Classified::new(
            Category::Timeout,
            "connection attempt timed out",
            true,
        ),
        Failure::HeartbeatExpired => Classified::new(
            Category::Timeout,
            "no pong within the heartbeat grace period",
            true,
        ),
        Failure::Unsupported(detail) => Classified::new(
            Category::Compatibility,
            format!("environment cannot establish this connection: {detail}"),
            false,
        ),
        Failure::Closed {
            code: Some(1008), ..
        } => Classified::new(
            Category::Auth,
            "remote endpoint rejected the connection policy",
            false,
        ),
        Failure::Closed {
            code: Some(1011), ..
        } => Classified::new(
            Category::Server,
            "remote endpoint reported an internal error",
            true,
        ),
        Failure::Refused(_) | Failure::Closed { .. } | Failure::Protocol(_) => {
            fallback(ready_state, env)
        }
    }
}

fn reason_text(failure: &Failure) -> &str {
    match failure {
        Failure::Refused(detail) | Failure::Protocol(detail) | Failure::Unsupported(detail) => {
            detail
        }
        Failure::Closed { reason, .. } => reason,
        Failure::Timeout | Failure::HeartbeatExpired => "",
    }
}

/// Keyword matches on close-reason or error text. Highest precedence.
fn classify_reason(reason: &str) -> Option<Classified> {
    let lower = reason.to_lowercase();

    if ["auth", "forbidden", "401", "403"]
        .iter()
        .any(|keyword| lower.contains(keyword))
    {
        return Some(Classified::new(
            Category::Auth,
            "authentication rejected by the remote endpoint",
            false,
        ));
    }

    if ["server error", "internal", "unavailable", "502", "503"]
        .iter()
        .any(|keyword| lower.contains(keyword))
    {
        return Some(Classified::new(
            Category::Server,
            "remote endpoint reported a server error",
            true,
        ));
    }

    if lower.contains("timeout") || lower.contains("timed out") {
        return Some(Classified::new(Category::Timeout, "operation timed out", true));
    }

    None
}

fn fallback(ready_state: ReadyState, env: Environment) -> Classified {
    match ready_state {
        ReadyState::Connecting => Classified::new(Category::Network, "connection failed", true),
        ReadyState::Closing | ReadyState::Closed => match env {
            Environment::Development => Classified::new(
                Category::Server,
                "connection closed; the local server may not be running",
                true,
            ),
            Environment::Production => {
                Classified::new(Category::Network, "network connection lost", true)
            }
        },
        ReadyState::Open => Classified::new(
            Category::Unknown,
            "connection errored unexpectedly",
            true,
        ),
    }
}

//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Respect `RUST_LOG` when set, config level otherwise
//!
//! # Design Decisions
//! - Every admission decision logs the matched rule or threshold so limits
//!   can be tuned offline without code changes

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "gatekeeper={log_level},tower_http=warn"
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

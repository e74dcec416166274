//! Admission-control and bot-mitigation pipeline.
//!
//! Decides, before any business logic runs, whether an inbound request is
//! automated traffic, should be throttled, or passes through. Any number of
//! process instances run the pipeline concurrently, coordinating only
//! through one shared counter store; when that store is unavailable the
//! pipeline fails open rather than blocking traffic.
//!
//! ```text
//! request → identity + user-agent → classify (may short-circuit)
//!         → rate limit → behavior check → wrapped handler
//! ```

pub mod config;
pub mod observability;
pub mod security;
pub mod store;
pub mod util;

pub use config::schema::GatekeeperConfig;
pub use security::admission::{admission_middleware, AdmissionError, AdmissionState, PolicySet};
pub use security::behavior::BehaviorDetector;
pub use security::rate_limit::RateLimiter;
pub use store::{CounterStore, MemoryStore, RedisStore};

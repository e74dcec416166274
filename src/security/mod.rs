//! Admission-control subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (derive client partition key from proxy headers)
//!     → agent.rs (pure user-agent verdict; may short-circuit here)
//!     → rate_limit.rs (fixed or sliding window against the shared store)
//!     → behavior.rs (optional anomaly heuristics)
//!     → Pass to wrapped handler
//! ```
//!
//! # Design Decisions
//! - Classification runs before any store access and short-circuits blocks
//! - The shared store is the only coordination point between instances
//! - Store failures fail open: availability over strict counting

pub mod admission;
pub mod agent;
pub mod behavior;
pub mod identity;
pub mod rate_limit;

pub use admission::{admission_middleware, AdmissionError, AdmissionState, PolicySet};
pub use agent::{classify, Classification, Confidence};
pub use behavior::{AnomalyKind, BehaviorDetector, BehaviorResult};
pub use identity::{client_id, ClientId};
pub use rate_limit::{Algorithm, RateLimitConfig, RateLimitResult, RateLimiter};

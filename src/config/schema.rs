//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! admission gate. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

use crate::security::rate_limit::Algorithm;

/// Root configuration for the admission gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Shared counter store settings.
    pub store: StoreConfig,

    /// Admission pipeline settings (default policy, per-route overrides).
    pub admission: AdmissionConfig,

    /// Behavior anomaly detection thresholds.
    pub behavior: BehaviorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Shared counter store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selection: "redis" or "memory".
    pub backend: StoreBackend,

    /// Redis connection URL.
    pub url: String,

    /// Per-operation timeout in milliseconds. On timeout the pipeline
    /// fails open rather than stalling the request.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            timeout_ms: 250,
        }
    }
}

/// Admission pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Policy applied when no route override matches.
    pub default_policy: PolicyConfig,

    /// Per-route policy overrides, matched by longest path prefix.
    pub routes: Vec<RoutePolicyConfig>,
}

/// Rate-limit policy values shared by the default policy and route
/// overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Maximum requests per window.
    pub limit: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Counting algorithm for this policy.
    pub algorithm: Algorithm,

    /// Run the (store-heavier) behavior anomaly check on this route.
    pub check_behavior: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window_secs: 60,
            algorithm: Algorithm::FixedWindow,
            check_behavior: false,
        }
    }
}

/// A per-route policy override.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutePolicyConfig {
    /// Path prefix this policy applies to (e.g., "/api/search").
    pub path_prefix: String,

    /// Stable key under which this route's counters are partitioned.
    pub endpoint_key: String,

    #[serde(flatten)]
    pub policy: PolicyConfig,
}

/// Behavior anomaly detection thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// High-frequency heuristic: detection window in seconds.
    pub frequency_window_secs: u64,

    /// High-frequency heuristic: requests per endpoint per window.
    pub frequency_threshold: u64,

    /// Scanning heuristic: detection window in seconds.
    pub scan_window_secs: u64,

    /// Scanning heuristic: distinct endpoints per window.
    pub scan_threshold: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            frequency_window_secs: 3600,
            frequency_threshold: 50,
            scan_window_secs: 60,
            scan_threshold: 20,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

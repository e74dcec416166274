//! Behavior anomaly detection.
//!
//! Two heuristics layered on the shared counter store, run concurrently per
//! request and combined by "first abnormal wins":
//!
//! - **High frequency**: a counter per (client, endpoint) over a long
//!   window. Catches sustained single-endpoint abuse that a short-burst
//!   rate limit never sees.
//! - **Scanning**: the set of distinct endpoints a client touched in a
//!   short window. Cardinality is the signal, not request count; hammering
//!   one endpoint never trips it, probing many does.
//!
//! Each heuristic fails open independently: a store failure in one must not
//! prevent the other from completing.

use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::BehaviorConfig;
use crate::observability::metrics;
use crate::security::identity::ClientId;
use crate::store::{bounded, CounterStore, StoreError};

/// Which heuristic flagged the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    HighFrequency,
    Scanning,
    None,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::HighFrequency => "high_frequency",
            AnomalyKind::Scanning => "scanning",
            AnomalyKind::None => "none",
        }
    }
}

/// Outcome of a behavior check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorResult {
    pub is_abnormal: bool,
    pub kind: AnomalyKind,
    pub count: u64,
    pub threshold: u64,
}

impl BehaviorResult {
    fn normal() -> Self {
        Self {
            is_abnormal: false,
            kind: AnomalyKind::None,
            count: 0,
            threshold: 0,
        }
    }
}

/// Store-backed anomaly detector.
pub struct BehaviorDetector {
    store: Arc<dyn CounterStore>,
    config: BehaviorConfig,
    store_timeout: Duration,
}

impl BehaviorDetector {
    pub fn new(store: Arc<dyn CounterStore>, config: BehaviorConfig, store_timeout: Duration) -> Self {
        Self {
            store,
            config,
            store_timeout,
        }
    }

    /// Run both heuristics for one request. Never errors; a failing
    /// heuristic reports normal for itself.
    pub async fn detect(&self, identifier: &ClientId, endpoint_key: &str) -> BehaviorResult {
        let (frequency, scanning) = tokio::join!(
            self.check_frequency(identifier, endpoint_key),
            self.check_scanning(identifier, endpoint_key),
        );

        let result = if frequency.is_abnormal {
            frequency
        } else if scanning.is_abnormal {
            scanning
        } else {
            BehaviorResult::normal()
        };

        if result.is_abnormal {
            tracing::warn!(
                client = %identifier,
                endpoint = %endpoint_key,
                kind = result.kind.as_str(),
                count = result.count,
                threshold = result.threshold,
                "Abnormal behavior detected"
            );
        }
        result
    }

    /// Increment-and-compare on a per-endpoint counter with a long TTL.
    async fn check_frequency(&self, identifier: &ClientId, endpoint_key: &str) -> BehaviorResult {
        let key = format!("bh:freq:{identifier}:{endpoint_key}");
        let threshold = self.config.frequency_threshold;

        let outcome: Result<u64, StoreError> = async {
            let count = bounded(self.store_timeout, self.store.incr(&key)).await?;
            if count == 1 {
                bounded(
                    self.store_timeout,
                    self.store.expire(&key, self.config.frequency_window_secs),
                )
                .await?;
            }
            Ok(count)
        }
        .await;

        match outcome {
            Ok(count) => BehaviorResult {
                is_abnormal: count > threshold,
                kind: if count > threshold {
                    AnomalyKind::HighFrequency
                } else {
                    AnomalyKind::None
                },
                count,
                threshold,
            },
            Err(err) => self.fail_open("frequency", identifier, endpoint_key, err),
        }
    }

    /// Track distinct endpoints per client; the set TTL is refreshed on
    /// every insert so the window trails the latest activity.
    async fn check_scanning(&self, identifier: &ClientId, endpoint_key: &str) -> BehaviorResult {
        let key = format!("bh:scan:{identifier}");
        let threshold = self.config.scan_threshold;

        let outcome: Result<u64, StoreError> = async {
            bounded(self.store_timeout, self.store.set_add(&key, endpoint_key)).await?;
            bounded(
                self.store_timeout,
                self.store.expire(&key, self.config.scan_window_secs),
            )
            .await?;
            bounded(self.store_timeout, self.store.set_len(&key)).await
        }
        .await;

        match outcome {
            Ok(distinct) => BehaviorResult {
                is_abnormal: distinct > threshold,
                kind: if distinct > threshold {
                    AnomalyKind::Scanning
                } else {
                    AnomalyKind::None
                },
                count: distinct,
                threshold,
            },
            Err(err) => self.fail_open("scanning", identifier, endpoint_key, err),
        }
    }

    fn fail_open(
        &self,
        operation: &'static str,
        identifier: &ClientId,
        endpoint_key: &str,
        err: StoreError,
    ) -> BehaviorResult {
        tracing::error!(
            client = %identifier,
            endpoint = %endpoint_key,
            operation = operation,
            error = %err,
            "Behavior check store failure, failing open"
        );
        metrics::record_store_failure(operation);
        BehaviorResult::normal()
    }
}

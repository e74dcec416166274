//! Admission middleware.
//!
//! Composes the pipeline in fixed order for every wrapped request:
//! identity + user-agent extraction → classification (short-circuits before
//! any store access) → rate limit → optional behavior check → inner handler.
//! Holds no long-lived state of its own; it is pure composition plus error
//! translation at the HTTP boundary.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header::USER_AGENT, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::config::schema::{AdmissionConfig, PolicyConfig};
use crate::observability::metrics;
use crate::security::agent::{classify, MatchedRule};
use crate::security::behavior::BehaviorDetector;
use crate::security::identity::{client_id, ClientId};
use crate::security::rate_limit::{Algorithm, RateLimitConfig, RateLimiter};
use crate::store::CounterStore;

/// Typed rejection raised by the pipeline. The first three kinds are cheap,
/// deterministic verdicts with no store dependency; the throttled kinds are
/// surfaced only when the store confirms a violation. Store failures are
/// handled inside the checks and never appear here.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("request carries no user-agent identity")]
    MissingIdentity,

    #[error("blocklisted agent: {reason}")]
    BlocklistedAgent { reason: String },

    #[error("unrecognized agent: {reason}")]
    UnrecognizedAgent { reason: String },

    #[error("rate limit exceeded")]
    RateLimited {
        retry_after_secs: u64,
        reset_at_ms: u64,
    },

    #[error("anomalous behavior: {kind}")]
    AnomalousBehavior {
        kind: &'static str,
        retry_after_secs: u64,
    },
}

impl AdmissionError {
    /// Stable kind label for logs, metrics, and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::MissingIdentity => "missing_identity",
            AdmissionError::BlocklistedAgent { .. } => "blocklisted_agent",
            AdmissionError::UnrecognizedAgent { .. } => "unrecognized_agent",
            AdmissionError::RateLimited { .. } => "rate_limited",
            AdmissionError::AnomalousBehavior { .. } => "anomalous_behavior",
        }
    }
}

/// Translate a typed rejection into a concrete HTTP response. Block-type
/// verdicts become 403, throttle-type verdicts 429 with retry timing.
impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = axum::Json(serde_json::json!({
            "error": { "code": kind, "message": self.to_string() }
        }));

        match self {
            AdmissionError::MissingIdentity
            | AdmissionError::BlocklistedAgent { .. }
            | AdmissionError::UnrecognizedAgent { .. } => {
                (StatusCode::FORBIDDEN, body).into_response()
            }
            AdmissionError::RateLimited {
                retry_after_secs,
                reset_at_ms,
            } => {
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                insert_header(&mut response, "retry-after", retry_after_secs);
                insert_header(&mut response, "x-ratelimit-reset", reset_at_ms / 1000);
                response
            }
            AdmissionError::AnomalousBehavior {
                retry_after_secs, ..
            } => {
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                insert_header(&mut response, "retry-after", retry_after_secs);
                response
            }
        }
    }
}

fn insert_header(response: &mut Response, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(name, value);
    }
}

/// A resolved per-route policy.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub endpoint_key: String,
    pub path_prefix: String,
    pub policy: PolicyConfig,
}

/// Route policies ordered for longest-prefix matching, with a default
/// fallback. Built once at startup from validated config.
#[derive(Debug, Clone)]
pub struct PolicySet {
    routes: Vec<RoutePolicy>,
    default: RoutePolicy,
}

impl PolicySet {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        let mut routes: Vec<RoutePolicy> = config
            .routes
            .iter()
            .map(|r| RoutePolicy {
                endpoint_key: r.endpoint_key.clone(),
                path_prefix: r.path_prefix.clone(),
                policy: r.policy.clone(),
            })
            .collect();
        // Longest prefix first so the first match wins.
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));

        Self {
            routes,
            default: RoutePolicy {
                endpoint_key: "default".to_string(),
                path_prefix: "/".to_string(),
                policy: config.default_policy.clone(),
            },
        }
    }

    pub fn resolve(&self, path: &str) -> &RoutePolicy {
        self.routes
            .iter()
            .find(|r| path.starts_with(r.path_prefix.as_str()))
            .unwrap_or(&self.default)
    }
}

/// State injected into the admission middleware.
#[derive(Clone)]
pub struct AdmissionState {
    pub limiter: Arc<RateLimiter>,
    pub detector: Arc<BehaviorDetector>,
    pub policies: Arc<PolicySet>,
    /// Used only for the fire-and-forget violation audit.
    pub store: Arc<dyn CounterStore>,
}

/// Middleware function wrapping a downstream handler with the admission
/// pipeline.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let identifier = client_id(request.headers());
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok());

    // Stage 1: classification. Pure, no store access; a blocking verdict
    // short-circuits the whole pipeline.
    let verdict = classify(user_agent);
    tracing::debug!(
        client = %identifier,
        is_bot = verdict.is_bot,
        rule = ?verdict.rule,
        reason = %verdict.reason,
        "Classified user agent"
    );
    if verdict.should_block {
        let error = match verdict.rule {
            MatchedRule::MissingHeader => AdmissionError::MissingIdentity,
            MatchedRule::NoBrowserToken => AdmissionError::UnrecognizedAgent {
                reason: verdict.reason.clone(),
            },
            _ => AdmissionError::BlocklistedAgent {
                reason: verdict.reason.clone(),
            },
        };
        return reject(&state, &identifier, "agent", error);
    }

    // Stage 2: rate limit per route policy.
    let route = state.policies.resolve(request.uri().path()).clone();
    let limit_config = match RateLimitConfig::new(
        route.policy.limit,
        route.policy.window_secs,
        identifier.clone(),
        route.endpoint_key.clone(),
    ) {
        Ok(config) => config,
        Err(err) => {
            // Policies are validated at startup; an invalid one here is a
            // wiring bug, and admission control still must not take the
            // service down.
            tracing::error!(endpoint = %route.endpoint_key, error = %err, "Invalid route policy");
            return next.run(request).await;
        }
    };

    let limit_result = state.limiter.check(&limit_config, route.policy.algorithm).await;
    if !limit_result.allowed {
        tracing::warn!(
            client = %identifier,
            endpoint = %route.endpoint_key,
            limit = route.policy.limit,
            reset_at_ms = limit_result.reset_at_ms,
            "Rate limit exceeded"
        );
        let error = AdmissionError::RateLimited {
            retry_after_secs: retry_after_secs(limit_result.reset_at_ms, &state),
            reset_at_ms: limit_result.reset_at_ms,
        };
        return reject(&state, &identifier, &route.endpoint_key, error);
    }

    // Stage 3: optional behavior check; it adds store round trips, so
    // low-risk routes leave it off.
    if route.policy.check_behavior {
        let behavior = state.detector.detect(&identifier, &route.endpoint_key).await;
        if behavior.is_abnormal {
            let error = AdmissionError::AnomalousBehavior {
                kind: behavior.kind.as_str(),
                retry_after_secs: route.policy.window_secs,
            };
            return reject(&state, &identifier, &route.endpoint_key, error);
        }
    }

    // Stage 4: run the wrapped handler and annotate the response with quota
    // metadata for client-side backoff.
    metrics::record_admitted(&route.endpoint_key);
    let mut response = next.run(request).await;
    insert_header(&mut response, "x-ratelimit-remaining", u64::from(limit_result.remaining));
    insert_header(&mut response, "x-ratelimit-reset", limit_result.reset_at_ms / 1000);
    response
}

fn retry_after_secs(reset_at_ms: u64, state: &AdmissionState) -> u64 {
    let now_ms = state.limiter.now_ms();
    (reset_at_ms.saturating_sub(now_ms) + 999) / 1000
}

/// Log the violation, record metrics, kick off the detached audit write,
/// and translate the error into a response.
fn reject(
    state: &AdmissionState,
    identifier: &ClientId,
    endpoint_key: &str,
    error: AdmissionError,
) -> Response {
    tracing::info!(
        client = %identifier,
        endpoint = %endpoint_key,
        kind = error.kind(),
        reason = %error,
        "Request rejected"
    );
    metrics::record_rejected(error.kind());
    // Classification blocks stay store-free end to end; only store-confirmed
    // violations get the best-effort audit write.
    if matches!(
        error,
        AdmissionError::RateLimited { .. } | AdmissionError::AnomalousBehavior { .. }
    ) {
        record_violation(state.store.clone(), identifier.clone(), error.kind());
    }
    error.into_response()
}

/// Best-effort violation counter, detached from the request path. The
/// admission decision is already made; failures here are logged and
/// otherwise ignored.
fn record_violation(store: Arc<dyn CounterStore>, identifier: ClientId, kind: &'static str) {
    tokio::spawn(async move {
        let key = format!("audit:viol:{identifier}");
        let outcome = async {
            store.incr(&key).await?;
            store.expire(&key, 86_400).await
        }
        .await;
        if let Err(err) = outcome {
            tracing::warn!(
                client = %identifier,
                kind = kind,
                error = %err,
                "Violation audit write failed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RoutePolicyConfig;

    fn admission_config() -> AdmissionConfig {
        AdmissionConfig {
            default_policy: PolicyConfig::default(),
            routes: vec![
                RoutePolicyConfig {
                    path_prefix: "/api".to_string(),
                    endpoint_key: "api".to_string(),
                    policy: PolicyConfig::default(),
                },
                RoutePolicyConfig {
                    path_prefix: "/api/search".to_string(),
                    endpoint_key: "search".to_string(),
                    policy: PolicyConfig {
                        limit: 10,
                        ..PolicyConfig::default()
                    },
                },
            ],
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let policies = PolicySet::from_config(&admission_config());
        assert_eq!(policies.resolve("/api/search/v2").endpoint_key, "search");
        assert_eq!(policies.resolve("/api/users").endpoint_key, "api");
        assert_eq!(policies.resolve("/health").endpoint_key, "default");
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(AdmissionError::MissingIdentity.kind(), "missing_identity");
        let throttled = AdmissionError::RateLimited {
            retry_after_secs: 30,
            reset_at_ms: 0,
        };
        assert_eq!(throttled.kind(), "rate_limited");
    }

    #[test]
    fn test_block_errors_map_to_forbidden() {
        let response = AdmissionError::BlocklistedAgent {
            reason: "automation signature \"curl\"".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_throttle_errors_carry_retry_after() {
        let response = AdmissionError::RateLimited {
            retry_after_secs: 57,
            reset_at_ms: 120_000,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "57");
        assert_eq!(response.headers()["x-ratelimit-reset"], "120");
    }
}

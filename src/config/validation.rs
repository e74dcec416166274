//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, windows > 0)
//! - Detect conflicting route policies
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: GatekeeperConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{GatekeeperConfig, PolicyConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{scope}: limit must be greater than zero")]
    ZeroLimit { scope: String },

    #[error("{scope}: window_secs must be greater than zero")]
    ZeroWindow { scope: String },

    #[error("duplicate endpoint key \"{0}\"")]
    DuplicateEndpointKey(String),

    #[error("route \"{0}\": path_prefix must start with '/'")]
    BadPathPrefix(String),

    #[error("behavior: {0} must be greater than zero")]
    ZeroBehaviorValue(&'static str),

    #[error("listener: invalid bind address \"{0}\"")]
    BadBindAddress(String),

    #[error("store: timeout_ms must be greater than zero")]
    ZeroStoreTimeout,
}

/// Validate a loaded configuration, collecting every violation.
pub fn validate_config(config: &GatekeeperConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_policy(&config.admission.default_policy, "default_policy", &mut errors);

    let mut seen_keys = Vec::new();
    for route in &config.admission.routes {
        let scope = format!("route \"{}\"", route.endpoint_key);
        check_policy(&route.policy, &scope, &mut errors);

        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::BadPathPrefix(route.endpoint_key.clone()));
        }
        if seen_keys.contains(&route.endpoint_key) {
            errors.push(ValidationError::DuplicateEndpointKey(
                route.endpoint_key.clone(),
            ));
        }
        seen_keys.push(route.endpoint_key.clone());
    }

    if config.behavior.frequency_window_secs == 0 {
        errors.push(ValidationError::ZeroBehaviorValue("frequency_window_secs"));
    }
    if config.behavior.frequency_threshold == 0 {
        errors.push(ValidationError::ZeroBehaviorValue("frequency_threshold"));
    }
    if config.behavior.scan_window_secs == 0 {
        errors.push(ValidationError::ZeroBehaviorValue("scan_window_secs"));
    }
    if config.behavior.scan_threshold == 0 {
        errors.push(ValidationError::ZeroBehaviorValue("scan_threshold"));
    }

    if config.store.timeout_ms == 0 {
        errors.push(ValidationError::ZeroStoreTimeout);
    }

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::BadBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_policy(policy: &PolicyConfig, scope: &str, errors: &mut Vec<ValidationError>) {
    if policy.limit == 0 {
        errors.push(ValidationError::ZeroLimit {
            scope: scope.to_string(),
        });
    }
    if policy.window_secs == 0 {
        errors.push(ValidationError::ZeroWindow {
            scope: scope.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RoutePolicyConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatekeeperConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_limit_and_window_rejected() {
        let mut config = GatekeeperConfig::default();
        config.admission.default_policy.limit = 0;
        config.admission.default_policy.window_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ZeroLimit { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ZeroWindow { .. })));
    }

    #[test]
    fn test_duplicate_endpoint_keys_rejected() {
        let mut config = GatekeeperConfig::default();
        for _ in 0..2 {
            config.admission.routes.push(RoutePolicyConfig {
                path_prefix: "/api".to_string(),
                endpoint_key: "api".to_string(),
                policy: PolicyConfig::default(),
            });
        }

        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateEndpointKey(_))));
    }
}

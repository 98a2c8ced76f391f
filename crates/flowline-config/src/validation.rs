// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes, such as non-empty paths and positive retry counts.

use crate::diagnostic::ConfigError;
use crate::model::FlowlineConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &FlowlineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.engine.step_budget == 0 {
        errors.push(ConfigError::Validation {
            message: "engine.step_budget must be at least 1".to_string(),
        });
    }

    if config.scheduler.poll_ms == 0 {
        errors.push(ConfigError::Validation {
            message: "scheduler.poll_ms must be positive".to_string(),
        });
    }

    if config.scheduler.batch == 0 {
        errors.push(ConfigError::Validation {
            message: "scheduler.batch must be at least 1".to_string(),
        });
    }

    if config.delivery.max_attempts == 0 {
        errors.push(ConfigError::Validation {
            message: "delivery.max_attempts must be at least 1".to_string(),
        });
    }

    if config.webhooks.max_attempts == 0 {
        errors.push(ConfigError::Validation {
            message: "webhooks.max_attempts must be at least 1".to_string(),
        });
    }

    if !config.delivery.fake_mode {
        if config.delivery.provider_token.as_deref().unwrap_or("").is_empty() {
            errors.push(ConfigError::Validation {
                message: "delivery.provider_token is required when fake_mode is off".to_string(),
            });
        }
        if config.delivery.phone_number_id.as_deref().unwrap_or("").is_empty() {
            errors.push(ConfigError::Validation {
                message: "delivery.phone_number_id is required when fake_mode is off".to_string(),
            });
        }
    }

    if let Some(url) = &config.classifier.url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(ConfigError::Validation {
                message: format!("classifier.url `{url}` must be an http(s) URL"),
            });
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FlowlineConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn real_mode_requires_provider_credentials() {
        let mut config = FlowlineConfig::default();
        config.delivery.fake_mode = false;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn zero_retry_caps_are_rejected() {
        let mut config = FlowlineConfig::default();
        config.delivery.max_attempts = 0;
        config.webhooks.max_attempts = 0;
        config.engine.step_budget = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn classifier_url_must_be_http() {
        let mut config = FlowlineConfig::default();
        config.classifier.url = Some("nlp:8000".to_string());
        assert!(validate_config(&config).is_err());
        config.classifier.url = Some("http://nlp:8000/api/nlp/intents".to_string());
        assert!(validate_config(&config).is_ok());
    }
}

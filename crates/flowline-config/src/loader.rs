// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./flowline.toml` > `~/.config/flowline/flowline.toml`
//! > `/etc/flowline/flowline.toml` with environment variable overrides via the
//! `FLOWLINE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::FlowlineConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/flowline/flowline.toml` (system-wide)
/// 3. `~/.config/flowline/flowline.toml` (user XDG config)
/// 4. `./flowline.toml` (local directory)
/// 5. `FLOWLINE_*` environment variables
pub fn load_config() -> Result<FlowlineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FlowlineConfig::default()))
        .merge(Toml::file("/etc/flowline/flowline.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("flowline/flowline.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("flowline.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<FlowlineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FlowlineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FlowlineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FlowlineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `FLOWLINE_ENGINE_MAX_RETRIES` must map to
/// `engine.max_retries`, not `engine.max.retries`.
fn env_provider() -> Env {
    Env::prefixed("FLOWLINE_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: FLOWLINE_DELIVERY_FAKE_MODE -> "delivery_fake_mode"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("log_", "log.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("engine_", "engine.", 1)
            .replacen("scheduler_", "scheduler.", 1)
            .replacen("classifier_", "classifier.", 1)
            .replacen("delivery_", "delivery.", 1)
            .replacen("webhooks_", "webhooks.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_when_no_sources() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.engine.group, "engine");
        assert_eq!(config.engine.max_retries, 2);
        assert_eq!(config.engine.step_budget, 5);
        assert!(config.delivery.fake_mode);
        assert_eq!(config.webhooks.max_attempts, 3);
        assert!(config.classifier.url.is_none());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = load_config_from_str(
            r#"
            [engine]
            max_retries = 5
            default_channel = "wa_backup"

            [scheduler]
            poll_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.engine.default_channel, "wa_backup");
        assert_eq!(config.scheduler.poll_ms, 100);
        // Untouched sections keep defaults.
        assert_eq!(config.delivery.group, "sender");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = load_config_from_str(
            r#"
            [engine]
            max_retriess = 5
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn env_var_overrides_map_to_sections() {
        // SAFETY: guarded by #[serial]; no other thread reads the
        // environment while this test runs.
        unsafe {
            std::env::set_var("FLOWLINE_ENGINE_MAX_RETRIES", "7");
            std::env::set_var("FLOWLINE_DELIVERY_FAKE_MODE", "false");
        }
        let config = load_config().unwrap();
        assert_eq!(config.engine.max_retries, 7);
        assert!(!config.delivery.fake_mode);
        unsafe {
            std::env::remove_var("FLOWLINE_ENGINE_MAX_RETRIES");
            std::env::remove_var("FLOWLINE_DELIVERY_FAKE_MODE");
        }
    }
}

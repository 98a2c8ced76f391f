// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Flowline message pipeline.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Flowline configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to values
/// suitable for local development (simulation-mode delivery, no remote
/// classifier).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowlineConfig {
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Flow interpreter settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Deferred-continuation scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Remote intent classifier settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Outbound delivery worker settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Webhook dispatcher settings.
    #[serde(default)]
    pub webhooks: WebhookConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("flowline").join("flowline.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("flowline.db"))
        .to_string_lossy()
        .into_owned()
}

/// Flow interpreter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Consumer group name on the inbound stream.
    #[serde(default = "default_engine_group")]
    pub group: String,

    /// Consumer name within the group.
    #[serde(default = "default_engine_consumer")]
    pub consumer: String,

    /// Maximum requeue count before an inbound event is dead-lettered.
    #[serde(default = "default_engine_max_retries")]
    pub max_retries: u32,

    /// Maximum flow steps executed per invocation.
    #[serde(default = "default_step_budget")]
    pub step_budget: usize,

    /// Blocking-read window on the inbound stream, in milliseconds.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// Channel used when an inbound event carries no channel hint.
    #[serde(default = "default_channel")]
    pub default_channel: String,

    /// Wait-record TTL when a `wait_for_reply` step sets no timeout.
    #[serde(default = "default_wait_ttl_secs")]
    pub wait_default_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            group: default_engine_group(),
            consumer: default_engine_consumer(),
            max_retries: default_engine_max_retries(),
            step_budget: default_step_budget(),
            block_ms: default_block_ms(),
            default_channel: default_channel(),
            wait_default_ttl_secs: default_wait_ttl_secs(),
        }
    }
}

fn default_engine_group() -> String {
    "engine".to_string()
}

fn default_engine_consumer() -> String {
    "engine-1".to_string()
}

fn default_engine_max_retries() -> u32 {
    2
}

fn default_step_budget() -> usize {
    5
}

fn default_block_ms() -> u64 {
    5000
}

fn default_channel() -> String {
    "wa_main".to_string()
}

fn default_wait_ttl_secs() -> u64 {
    86_400 // 24h
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Poll interval in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    /// Maximum due items claimed per poll.
    #[serde(default = "default_sched_batch")]
    pub batch: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
            batch: default_sched_batch(),
        }
    }
}

fn default_poll_ms() -> u64 {
    500
}

fn default_sched_batch() -> usize {
    10
}

/// Remote intent classifier configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Classifier endpoint URL. `None` uses the keyword heuristic only.
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout in milliseconds. Kept short; failures fall back
    /// to the keyword heuristic silently.
    #[serde(default = "default_classifier_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_classifier_timeout_ms(),
        }
    }
}

fn default_classifier_timeout_ms() -> u64 {
    800
}

/// Outbound delivery worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Consumer group name on the outbox stream.
    #[serde(default = "default_delivery_group")]
    pub group: String,

    /// Consumer name within the group.
    #[serde(default = "default_delivery_consumer")]
    pub consumer: String,

    /// Skip the provider network call and synthesize a result.
    #[serde(default = "default_fake_mode")]
    pub fake_mode: bool,

    /// Maximum provider call attempts per envelope.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential backoff between attempts, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Blocking-read window on the outbox stream, in milliseconds.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// Provider API base URL.
    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,

    /// Provider API token. Required when `fake_mode` is off.
    #[serde(default)]
    pub provider_token: Option<String>,

    /// Provider phone-number id the messages are sent from.
    #[serde(default)]
    pub phone_number_id: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            group: default_delivery_group(),
            consumer: default_delivery_consumer(),
            fake_mode: default_fake_mode(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            block_ms: default_block_ms(),
            provider_base_url: default_provider_base_url(),
            provider_token: None,
            phone_number_id: None,
        }
    }
}

fn default_delivery_group() -> String {
    "sender".to_string()
}

fn default_delivery_consumer() -> String {
    "sender-1".to_string()
}

fn default_fake_mode() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_provider_base_url() -> String {
    "https://graph.facebook.com/v17.0".to_string()
}

/// Webhook dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Consumer group name on the events stream.
    #[serde(default = "default_webhook_group")]
    pub group: String,

    /// Consumer name within the group.
    #[serde(default = "default_webhook_consumer")]
    pub consumer: String,

    /// Maximum POST attempts per endpoint.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,

    /// Base of the exponential backoff between attempts, in milliseconds.
    #[serde(default = "default_webhook_backoff_ms")]
    pub backoff_base_ms: u64,

    /// Blocking-read window on the events stream, in milliseconds.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            group: default_webhook_group(),
            consumer: default_webhook_consumer(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_webhook_timeout_secs(),
            backoff_base_ms: default_webhook_backoff_ms(),
            block_ms: default_block_ms(),
        }
    }
}

fn default_webhook_group() -> String {
    "wh_dispatcher".to_string()
}

fn default_webhook_consumer() -> String {
    "wh-1".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_webhook_backoff_ms() -> u64 {
    250
}

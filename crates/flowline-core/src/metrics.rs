// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Injected pipeline counters.
//!
//! Workers receive their counter set by reference instead of touching
//! process-global state, so tests can assert on counts without leakage.
//! Each increment is mirrored to the metrics-rs facade so any installed
//! recorder (Prometheus, statsd, etc.) can collect them.

use std::sync::atomic::{AtomicU64, Ordering};

/// A single monotonically increasing counter with a stable facade name.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    pub fn incr(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(self.name).increment(1);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for the flow interpreter and its consumer loop.
#[derive(Debug)]
pub struct EngineMetrics {
    pub processed: Counter,
    pub published: Counter,
    pub errors: Counter,
    pub retried: Counter,
    pub dead_lettered: Counter,
    pub scheduled: Counter,
    pub schedule_published: Counter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            processed: Counter::new("flowline_engine_incoming_processed_total"),
            published: Counter::new("flowline_engine_outbox_published_total"),
            errors: Counter::new("flowline_engine_errors_total"),
            retried: Counter::new("flowline_engine_retries_total"),
            dead_lettered: Counter::new("flowline_engine_dlq_total"),
            scheduled: Counter::new("flowline_engine_scheduled_total"),
            schedule_published: Counter::new("flowline_engine_sched_published_total"),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the outbound delivery worker.
#[derive(Debug)]
pub struct DeliveryMetrics {
    pub processed: Counter,
    pub sent: Counter,
    pub errors: Counter,
    pub dead_lettered: Counter,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self {
            processed: Counter::new("flowline_delivery_processed_total"),
            sent: Counter::new("flowline_delivery_sent_total"),
            errors: Counter::new("flowline_delivery_errors_total"),
            dead_lettered: Counter::new("flowline_delivery_dlq_total"),
        }
    }
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the webhook dispatcher.
#[derive(Debug)]
pub struct WebhookMetrics {
    pub processed: Counter,
    pub delivered: Counter,
    pub errors: Counter,
    pub dead_lettered: Counter,
}

impl WebhookMetrics {
    pub fn new() -> Self {
        Self {
            processed: Counter::new("flowline_webhooks_processed_total"),
            delivered: Counter::new("flowline_webhooks_delivered_total"),
            errors: Counter::new("flowline_webhooks_errors_total"),
            dead_lettered: Counter::new("flowline_webhooks_dlq_total"),
        }
    }
}

impl Default for WebhookMetrics {
    fn default() -> Self {
        Self::new()
    }
}

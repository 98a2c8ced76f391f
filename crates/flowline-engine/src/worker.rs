// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound consumer loop.
//!
//! Applies the retry/dead-letter policy around the interpreter: a transport
//! failure requeues the entry with an incremented `retries` counter until
//! the cap, then dead-letters it. The original entry is always acknowledged
//! so one bad message can never stall the group.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flowline_config::model::EngineConfig;
use flowline_core::metrics::EngineMetrics;
use flowline_core::{FieldMap, streams};
use flowline_transport::{StreamMessage, StreamTransport};

use crate::interpreter::Interpreter;

pub struct EngineWorker {
    transport: Arc<dyn StreamTransport>,
    interpreter: Interpreter,
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
}

impl EngineWorker {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        interpreter: Interpreter,
        config: EngineConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            transport,
            interpreter,
            config,
            metrics,
        }
    }

    /// Handle one delivered entry, including the ack/retry/DLQ decision.
    pub async fn process(&self, message: &StreamMessage) {
        let result = self.interpreter.handle(&message.fields).await;
        self.metrics.processed.incr();
        match result {
            Ok(()) => self.ack(&message.id).await,
            Err(e) => {
                warn!(error = %e, id = %message.id, "inbound handling failed");
                self.metrics.errors.incr();
                self.retry_or_dead_letter(message).await;
            }
        }
    }

    async fn retry_or_dead_letter(&self, message: &StreamMessage) {
        let retries: u32 = message
            .fields
            .get("retries")
            .and_then(|r| r.parse().ok())
            .unwrap_or(0);
        if retries < self.config.max_retries {
            let mut requeued = message.fields.clone();
            requeued.insert("retries".to_string(), (retries + 1).to_string());
            match self.transport.publish(streams::INCOMING, requeued).await {
                Ok(_) => self.metrics.retried.incr(),
                Err(e) => error!(error = %e, "requeue failed"),
            }
        } else {
            let mut dead: FieldMap = message.fields.clone();
            dead.insert("error".to_string(), "max-retries-exceeded".to_string());
            match self.transport.publish(streams::INCOMING_DLQ, dead).await {
                Ok(_) => self.metrics.dead_lettered.incr(),
                Err(e) => error!(error = %e, "dlq publish failed"),
            }
        }
        // Acked in both branches: the retry lives as a fresh entry.
        self.ack(&message.id).await;
    }

    async fn ack(&self, id: &str) {
        if let Err(e) = self
            .transport
            .ack(streams::INCOMING, &self.config.group, id)
            .await
        {
            error!(error = %e, id, "ack failed");
        }
    }

    /// Consumer loop. Runs until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self
            .transport
            .ensure_group(streams::INCOMING, &self.config.group)
            .await
        {
            error!(error = %e, "could not create consumer group");
            return;
        }
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            "engine worker starting"
        );
        let block = Duration::from_millis(self.config.block_ms);
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("engine worker stopping");
                    return;
                }
                batch = self.transport.consume_group(
                    streams::INCOMING,
                    &self.config.group,
                    &self.config.consumer,
                    block,
                    1,
                ) => batch,
            };
            match batch {
                Ok(messages) => {
                    for message in &messages {
                        self.process(message).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "inbound consume failed");
                    self.metrics.errors.incr();
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

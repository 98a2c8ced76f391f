// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deferred-continuation scheduler.
//!
//! Polls the scheduled-item table, claims due entries (the atomic delete in
//! storage is the ownership primitive), and republishes them onto the
//! inbound stream. Timeout items carry a resume token; a token that no
//! longer matches the wait record means the wait was already resolved by a
//! real reply, and the fire is discarded as stale.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowline_config::model::SchedulerConfig;
use flowline_core::metrics::EngineMetrics;
use flowline_core::{FieldMap, FlowlineError, streams};
use flowline_storage::Database;
use flowline_storage::queries::{schedule, waits};
use flowline_transport::StreamTransport;

/// JSON body of one scheduled item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPayload {
    /// Original inbound provider payload, re-attached on republish.
    pub payload: String,
    pub org_id: String,
    pub channel_id: String,
    /// Stashed sender phone so the interpreter skips payload re-parsing.
    pub contact_phone: String,
    /// Serialized continuation `{path, index}`.
    pub engine_resume: String,
    /// Present on `wait_for_reply` timeout timers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
}

impl ScheduledPayload {
    fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::from([
            ("payload".to_string(), self.payload.clone()),
            ("org_id".to_string(), self.org_id.clone()),
            ("channel_id".to_string(), self.channel_id.clone()),
            ("engine_resume".to_string(), self.engine_resume.clone()),
        ]);
        if !self.contact_phone.is_empty() {
            fields.insert("contact_phone".to_string(), self.contact_phone.clone());
        }
        fields
    }
}

pub struct Scheduler {
    db: Database,
    transport: Arc<dyn StreamTransport>,
    config: SchedulerConfig,
    metrics: Arc<EngineMetrics>,
}

impl Scheduler {
    pub fn new(
        db: Database,
        transport: Arc<dyn StreamTransport>,
        config: SchedulerConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            db,
            transport,
            config,
            metrics,
        }
    }

    /// Claim everything due at `now_ms` and republish it. Returns how many
    /// items were republished.
    pub async fn tick(&self, now_ms: i64) -> Result<usize, FlowlineError> {
        let due = schedule::claim_due(&self.db, now_ms, self.config.batch).await?;
        let mut republished = 0;
        for item in due {
            let parsed: ScheduledPayload = match serde_json::from_str(&item.payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, id = item.id, "discarding unparseable scheduled item");
                    self.metrics.errors.incr();
                    continue;
                }
            };

            // Timeout fire: only valid while the wait record still carries
            // our token. Clearing it here also disarms the reply path.
            if let Some(token) = &parsed.resume_token {
                let fresh = waits::clear_wait_if_token(
                    &self.db,
                    &parsed.org_id,
                    &parsed.channel_id,
                    &parsed.contact_phone,
                    token,
                )
                .await
                .unwrap_or(false);
                if !fresh {
                    debug!(id = item.id, "stale timeout fire discarded");
                    continue;
                }
            }

            match self
                .transport
                .publish(streams::INCOMING, parsed.to_fields())
                .await
            {
                Ok(_) => {
                    self.metrics.schedule_published.incr();
                    republished += 1;
                }
                Err(e) => {
                    // The claim is already consumed; the timer is lost, not
                    // double-fired.
                    warn!(error = %e, id = item.id, "scheduler publish failed");
                    self.metrics.errors.incr();
                }
            }
        }
        Ok(republished)
    }

    /// Polling loop. Runs until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(poll_ms = self.config.poll_ms, "scheduler starting");
        let poll = Duration::from_millis(self.config.poll_ms);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(poll) => {}
            }
            if let Err(e) = self.tick(Utc::now().timestamp_millis()).await {
                warn!(error = %e, "scheduler tick failed");
                self.metrics.errors.incr();
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

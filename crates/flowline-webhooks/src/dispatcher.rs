// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook dispatcher.
//!
//! Fans internal events out to each org's registered endpoints. Filtering
//! (inactive endpoints, subscription misses, missing URLs, empty registry)
//! is silent; per-endpoint delivery retries independently, so one slow
//! receiver never blocks another.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use flowline_config::model::WebhookConfig;
use flowline_core::metrics::WebhookMetrics;
use flowline_core::{FieldMap, streams};
use flowline_storage::models::WebhookEndpoint;
use flowline_storage::queries::endpoints;
use flowline_storage::Database;
use flowline_transport::{StreamMessage, StreamTransport};

use crate::signer::{SIGNATURE_HEADER, signature};

pub struct WebhookDispatcher {
    transport: Arc<dyn StreamTransport>,
    db: Database,
    client: reqwest::Client,
    config: WebhookConfig,
    metrics: Arc<WebhookMetrics>,
}

impl WebhookDispatcher {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        db: Database,
        config: WebhookConfig,
        metrics: Arc<WebhookMetrics>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            transport,
            db,
            client,
            config,
            metrics,
        }
    }

    /// Process one internal event: fan out, then ack. Never fails the
    /// invocation.
    pub async fn process(&self, message: &StreamMessage) {
        self.metrics.processed.incr();
        self.fan_out(&message.fields).await;
        if let Err(e) = self
            .transport
            .ack(streams::EVENTS, &self.config.group, &message.id)
            .await
        {
            error!(error = %e, id = %message.id, "ack failed");
        }
    }

    async fn fan_out(&self, fields: &FieldMap) {
        let org_id = fields.get("org_id").cloned().unwrap_or_default();
        if org_id.is_empty() {
            debug!("event without org, skipping fan-out");
            return;
        }
        let event_type = fields
            .get("type")
            .filter(|t| !t.is_empty())
            .cloned()
            .unwrap_or_else(|| "event".to_string());
        let body_raw = fields.get("body").cloned().unwrap_or_else(|| "{}".to_string());
        let data: serde_json::Value = serde_json::from_str(&body_raw)
            .unwrap_or_else(|_| serde_json::json!({ "raw": body_raw }));

        let registered = match endpoints::endpoints_for_org(&self.db, &org_id).await {
            Ok(eps) => eps,
            Err(e) => {
                warn!(error = %e, org_id = %org_id, "endpoint lookup failed");
                self.metrics.errors.incr();
                return;
            }
        };
        if registered.is_empty() {
            return;
        }

        let payload = serde_json::json!({
            "type": event_type,
            "data": data,
            "org_id": org_id,
            "ts": Utc::now().timestamp_millis(),
        });
        let body = payload.to_string();

        for endpoint in &registered {
            if endpoint.status != "active" {
                continue;
            }
            if !endpoint.events.is_empty() && !endpoint.events.contains(&event_type) {
                debug!(endpoint = %endpoint.id, event_type = %event_type, "subscription miss");
                continue;
            }
            if endpoint.url.is_empty() {
                continue;
            }
            self.deliver_with_retry(endpoint, &event_type, &body, &data)
                .await;
        }
    }

    /// Bounded retry chain for one endpoint. Success writes the audit
    /// record; exhaustion dead-letters the original event body.
    async fn deliver_with_retry(
        &self,
        endpoint: &WebhookEndpoint,
        event_type: &str,
        body: &str,
        data: &serde_json::Value,
    ) {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.post_once(endpoint, body).await {
                Ok(()) => {
                    self.metrics.delivered.incr();
                    let audit = FieldMap::from([
                        ("org_id".to_string(), endpoint.org_id.clone()),
                        ("endpoint_id".to_string(), endpoint.id.clone()),
                        ("type".to_string(), event_type.to_string()),
                        ("url".to_string(), endpoint.url.clone()),
                        (
                            "ts".to_string(),
                            Utc::now().timestamp_millis().to_string(),
                        ),
                    ]);
                    if let Err(e) = self
                        .transport
                        .publish(streams::WEBHOOKS_DELIVERED, audit)
                        .await
                    {
                        error!(error = %e, "delivery audit publish failed");
                    }
                    info!(
                        endpoint = %endpoint.id,
                        url = %endpoint.url,
                        event_type,
                        "webhook delivered"
                    );
                    return;
                }
                Err(reason) => {
                    warn!(
                        attempt,
                        endpoint = %endpoint.id,
                        reason = %reason,
                        "webhook delivery failed"
                    );
                    self.metrics.errors.incr();
                    if attempt < attempts {
                        let backoff = self.config.backoff_base_ms * 2u64.pow(attempt - 1);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        let dead = FieldMap::from([
            ("org_id".to_string(), endpoint.org_id.clone()),
            ("endpoint_id".to_string(), endpoint.id.clone()),
            ("type".to_string(), event_type.to_string()),
            ("body".to_string(), data.to_string()),
            ("error".to_string(), "max-retries-exceeded".to_string()),
        ]);
        match self.transport.publish(streams::WEBHOOKS_DLQ, dead).await {
            Ok(_) => self.metrics.dead_lettered.incr(),
            Err(e) => error!(error = %e, "webhook dlq publish failed"),
        }
    }

    async fn post_once(&self, endpoint: &WebhookEndpoint, body: &str) -> Result<(), String> {
        let mut request = self
            .client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .body(body.to_string());
        if let Some(secret) = endpoint.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(SIGNATURE_HEADER, signature(secret, body.as_bytes()));
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("endpoint returned {}", response.status()))
        }
    }

    /// Consumer loop. Runs until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self
            .transport
            .ensure_group(streams::EVENTS, &self.config.group)
            .await
        {
            error!(error = %e, "could not create consumer group");
            return;
        }
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            "webhook dispatcher starting"
        );
        let block = Duration::from_millis(self.config.block_ms);
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("webhook dispatcher stopping");
                    return;
                }
                batch = self.transport.consume_group(
                    streams::EVENTS,
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
                    error!(error = %e, "events consume failed");
                    self.metrics.errors.incr();
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound delivery worker.
//!
//! Consumes the outbox stream, calls the provider (or simulates it), and
//! always emits exactly one completion record per envelope. Exhausted
//! envelopes are dead-lettered but still acknowledged: delivery is
//! best-effort by policy, and a stuck provider must not stall the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flowline_config::model::DeliveryConfig;
use flowline_core::metrics::DeliveryMetrics;
use flowline_core::{FieldMap, OutboundEnvelope, streams};
use flowline_storage::Database;
use flowline_transport::{StreamMessage, StreamTransport};

use crate::persist::{self, DeliveryOutcome};
use crate::provider::ProviderClient;

pub struct DeliveryWorker {
    transport: Arc<dyn StreamTransport>,
    db: Database,
    provider: Option<ProviderClient>,
    config: DeliveryConfig,
    metrics: Arc<DeliveryMetrics>,
}

impl DeliveryWorker {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        db: Database,
        config: DeliveryConfig,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        let provider = if config.fake_mode {
            None
        } else {
            Some(ProviderClient::new(
                config.provider_base_url.clone(),
                config.provider_token.clone().unwrap_or_default(),
                config.phone_number_id.clone().unwrap_or_default(),
            ))
        };
        Self {
            transport,
            db,
            provider,
            config,
            metrics,
        }
    }

    /// Process one outbox entry end to end. Never fails the invocation:
    /// every branch ends in an ack.
    pub async fn process(&self, message: &StreamMessage) {
        self.metrics.processed.incr();
        let Some(envelope) = OutboundEnvelope::from_fields(&message.fields) else {
            warn!(id = %message.id, "outbox entry missing required fields, dropping");
            self.metrics.errors.incr();
            self.ack(&message.id).await;
            return;
        };

        let outcome = self.deliver(&envelope).await;

        if let Some(reason) = &outcome.error {
            let mut dead: FieldMap = message.fields.clone();
            dead.insert("error".to_string(), reason.clone());
            match self.transport.publish(streams::OUTBOX_DLQ, dead).await {
                Ok(_) => self.metrics.dead_lettered.incr(),
                Err(e) => error!(error = %e, "delivery dlq publish failed"),
            }
        }

        if let Err(e) = persist::record_outbound(&self.db, &envelope, &outcome).await {
            warn!(error = %e, client_id = %envelope.client_id, "history persist failed");
            self.metrics.errors.incr();
        }

        if let Err(e) = self
            .transport
            .publish(streams::SENT, sent_fields(&envelope, &outcome))
            .await
        {
            error!(error = %e, "sent record publish failed");
            self.metrics.errors.incr();
        } else {
            self.metrics.sent.incr();
        }

        info!(
            trace_id = %envelope.trace_id,
            to = %envelope.to,
            client_id = %envelope.client_id,
            fake = outcome.fake,
            status = outcome.status(),
            "outbound processed"
        );
        self.ack(&message.id).await;
    }

    /// Provider attempt chain with exponential backoff, or a synthesized
    /// result in simulation mode.
    async fn deliver(&self, envelope: &OutboundEnvelope) -> DeliveryOutcome {
        let Some(provider) = &self.provider else {
            return DeliveryOutcome {
                fake: true,
                provider_message_id: None,
                error: None,
            };
        };

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match provider.send(envelope).await {
                Ok(id) => {
                    return DeliveryOutcome {
                        fake: false,
                        provider_message_id: Some(id).filter(|i| !i.is_empty()),
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        client_id = %envelope.client_id,
                        "provider attempt failed"
                    );
                    self.metrics.errors.incr();
                    last_error = e.to_string();
                    if attempt < attempts {
                        let backoff = self.config.backoff_base_ms * 2u64.pow(attempt - 1);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        DeliveryOutcome {
            fake: false,
            provider_message_id: None,
            error: Some(last_error),
        }
    }

    async fn ack(&self, id: &str) {
        if let Err(e) = self
            .transport
            .ack(streams::OUTBOX, &self.config.group, id)
            .await
        {
            error!(error = %e, id, "ack failed");
        }
    }

    /// Consumer loop. Runs until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self
            .transport
            .ensure_group(streams::OUTBOX, &self.config.group)
            .await
        {
            error!(error = %e, "could not create consumer group");
            return;
        }
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            fake = self.config.fake_mode,
            "delivery worker starting"
        );
        let block = Duration::from_millis(self.config.block_ms);
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("delivery worker stopping");
                    return;
                }
                batch = self.transport.consume_group(
                    streams::OUTBOX,
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
                    error!(error = %e, "outbox consume failed");
                    self.metrics.errors.incr();
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

fn sent_fields(envelope: &OutboundEnvelope, outcome: &DeliveryOutcome) -> FieldMap {
    let mut fields = FieldMap::from([
        ("to".to_string(), envelope.to.clone()),
        ("client_id".to_string(), envelope.client_id.clone()),
        ("trace_id".to_string(), envelope.trace_id.clone()),
        ("fake".to_string(), outcome.fake.to_string()),
        ("status".to_string(), outcome.status().to_string()),
        (
            "ts".to_string(),
            Utc::now().timestamp_millis().to_string(),
        ),
    ]);
    if let Some(org) = &envelope.org_id {
        fields.insert("org_id".to_string(), org.clone());
    }
    if let Some(id) = &outcome.provider_message_id {
        fields.insert("provider_message_id".to_string(), id.clone());
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::OutboundContent;
    use flowline_storage::queries::messages;
    use flowline_transport::MemoryTransport;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope_fields(client_id: &str) -> FieldMap {
        OutboundEnvelope {
            channel_id: "wa_main".into(),
            to: "5215550001".into(),
            content: OutboundContent::Text("hola".into()),
            client_id: client_id.into(),
            trace_id: "t-1".into(),
            org_id: Some("org1".into()),
            requested_by: None,
            conversation_id: None,
            orig_text: None,
        }
        .to_fields()
    }

    fn entry(fields: FieldMap) -> StreamMessage {
        StreamMessage {
            id: "1-0".to_string(),
            fields,
        }
    }

    async fn worker_with(
        config: DeliveryConfig,
    ) -> (DeliveryWorker, Arc<MemoryTransport>, Database) {
        let db = Database::open_in_memory().await.unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let worker = DeliveryWorker::new(
            transport.clone(),
            db.clone(),
            config,
            Arc::new(DeliveryMetrics::new()),
        );
        (worker, transport, db)
    }

    #[tokio::test]
    async fn fake_mode_synthesizes_sent_record_and_history() {
        let (worker, transport, db) = worker_with(DeliveryConfig::default()).await;
        worker.process(&entry(envelope_fields("cli-1"))).await;

        let sent = transport.read_all(streams::SENT).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].fields["fake"], "true");
        assert_eq!(sent[0].fields["client_id"], "cli-1");
        assert_eq!(sent[0].fields["trace_id"], "t-1");
        assert!(transport.read_all(streams::OUTBOX_DLQ).await.is_empty());

        // History row was written through the idempotent path.
        let conv = persist::record_outbound(
            &db,
            &OutboundEnvelope::from_fields(&envelope_fields("cli-1")).unwrap(),
            &DeliveryOutcome {
                fake: true,
                provider_message_id: None,
                error: None,
            },
        )
        .await
        .unwrap();
        let row = messages::find_by_client_id(&db, &conv, "cli-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "sent");
    }

    #[tokio::test]
    async fn redelivered_envelope_does_not_duplicate_history() {
        let (worker, transport, db) = worker_with(DeliveryConfig::default()).await;
        let message = entry(envelope_fields("cli-1"));
        worker.process(&message).await;
        worker.process(&message).await;

        // Two completion records, one history row.
        assert_eq!(transport.read_all(streams::SENT).await.len(), 2);
        let count: i64 = db
            .connection()
            .call(|conn| {
                let n = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_once_with_one_sent_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let config = DeliveryConfig {
            fake_mode: false,
            max_attempts: 2,
            backoff_base_ms: 1,
            provider_base_url: server.uri(),
            provider_token: Some("tok".into()),
            phone_number_id: Some("12345".into()),
            ..DeliveryConfig::default()
        };
        let (worker, transport, db) = worker_with(config).await;
        worker.process(&entry(envelope_fields("cli-9"))).await;

        let dlq = transport.read_all(streams::OUTBOX_DLQ).await;
        assert_eq!(dlq.len(), 1);
        assert!(dlq[0].fields["error"].contains("503"));

        let sent = transport.read_all(streams::SENT).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].fields["fake"], "false");
        assert_eq!(sent[0].fields["status"], "failed");

        let row_status: String = db
            .connection()
            .call(|conn| {
                let s = conn.query_row(
                    "SELECT status FROM messages WHERE client_id = 'cli-9'",
                    [],
                    |row| row.get(0),
                )?;
                Ok(s)
            })
            .await
            .unwrap();
        assert_eq!(row_status, "failed");
    }

    #[tokio::test]
    async fn provider_success_records_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "wamid.OK"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = DeliveryConfig {
            fake_mode: false,
            provider_base_url: server.uri(),
            provider_token: Some("tok".into()),
            phone_number_id: Some("12345".into()),
            ..DeliveryConfig::default()
        };
        let (worker, transport, _db) = worker_with(config).await;
        worker.process(&entry(envelope_fields("cli-2"))).await;

        let sent = transport.read_all(streams::SENT).await;
        assert_eq!(sent[0].fields["provider_message_id"], "wamid.OK");
        assert!(transport.read_all(streams::OUTBOX_DLQ).await.is_empty());
    }

    #[tokio::test]
    async fn entry_without_recipient_is_dropped_silently() {
        let (worker, transport, _db) = worker_with(DeliveryConfig::default()).await;
        let mut fields = envelope_fields("cli-1");
        fields.remove("to");
        worker.process(&entry(fields)).await;

        assert!(transport.read_all(streams::SENT).await.is_empty());
        assert!(transport.read_all(streams::OUTBOX_DLQ).await.is_empty());
    }
}

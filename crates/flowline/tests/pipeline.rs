// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end pipeline tests.
//!
//! Runs the engine, scheduler, and delivery worker loops against a shared
//! in-process transport (simulation-mode delivery) and drives them through
//! the incoming stream, exactly as `flowline serve` wires them.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use flowline_config::model::{DeliveryConfig, EngineConfig, SchedulerConfig};
use flowline_core::metrics::{DeliveryMetrics, EngineMetrics};
use flowline_core::{FieldMap, streams};
use flowline_delivery::DeliveryWorker;
use flowline_engine::{EngineWorker, Interpreter, NoClassifier, Scheduler};
use flowline_storage::Database;
use flowline_storage::queries::{contacts, conversations, flows, messages};
use flowline_transport::{MemoryTransport, StreamTransport};

const PHONE: &str = "5215550000001";

struct Pipeline {
    db: Database,
    transport: Arc<MemoryTransport>,
    cancel: CancellationToken,
}

impl Pipeline {
    async fn start() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let cancel = CancellationToken::new();

        let engine_config = EngineConfig {
            block_ms: 50,
            ..EngineConfig::default()
        };
        let interpreter = Interpreter::new(
            db.clone(),
            transport.clone(),
            Arc::new(NoClassifier),
            engine_config.clone(),
            Arc::new(EngineMetrics::new()),
        );
        let engine = EngineWorker::new(
            transport.clone(),
            interpreter,
            engine_config,
            Arc::new(EngineMetrics::new()),
        );
        let scheduler = Scheduler::new(
            db.clone(),
            transport.clone(),
            SchedulerConfig {
                poll_ms: 20,
                ..SchedulerConfig::default()
            },
            Arc::new(EngineMetrics::new()),
        );
        let delivery = DeliveryWorker::new(
            transport.clone(),
            db.clone(),
            DeliveryConfig {
                block_ms: 50,
                ..DeliveryConfig::default()
            },
            Arc::new(DeliveryMetrics::new()),
        );

        {
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run(cancel).await });
        }
        {
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await });
        }
        {
            let cancel = cancel.clone();
            tokio::spawn(async move { delivery.run(cancel).await });
        }

        Self {
            db,
            transport,
            cancel,
        }
    }

    async fn send_inbound(&self, org: &str, text: &str) {
        let payload = serde_json::json!({
            "text": text,
            "contact": { "phone": PHONE },
        });
        let fields = FieldMap::from([
            ("payload".to_string(), payload.to_string()),
            ("org_id".to_string(), org.to_string()),
        ]);
        self.transport
            .publish(streams::INCOMING, fields)
            .await
            .unwrap();
    }

    /// Poll until the sent stream reaches `count` entries.
    async fn wait_for_sent(&self, count: usize) -> Vec<flowline_transport::StreamMessage> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let sent = self.transport.read_all(streams::SENT).await;
            if sent.len() >= count {
                return sent;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {count} sent records, got {}", sent.len());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn activate_definition(db: &Database, org: &str, definition: &str) {
    let id = flows::insert_flow(db, org, "test-flow", definition)
        .await
        .unwrap();
    flows::activate_flow(db, org, &id).await.unwrap();
}

#[tokio::test]
async fn inbound_without_flow_gets_exactly_one_fallback_reply() {
    let pipeline = Pipeline::start().await;
    pipeline.send_inbound("org1", "hola!").await;

    let sent = pipeline.wait_for_sent(1).await;
    assert_eq!(sent[0].fields["to"], PHONE);
    assert_eq!(sent[0].fields["fake"], "true");
    assert_eq!(sent[0].fields["status"], "sent");

    let outbox = pipeline.transport.read_all(streams::OUTBOX).await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].fields["text"], "Hola! ¿En qué puedo ayudarte hoy?");
    assert!(outbox[0].fields["client_id"].starts_with("auto_"));

    // Give the loops time to misbehave; the reply must stay single.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pipeline.transport.read_all(streams::SENT).await.len(), 1);

    // History persisted under the envelope's idempotency key.
    let contact = contacts::resolve_or_create(&pipeline.db, "org1", "wa_main", PHONE)
        .await
        .unwrap();
    let conversation =
        conversations::resolve_or_create(&pipeline.db, "org1", "wa_main", &contact.id)
            .await
            .unwrap();
    let row = messages::find_by_client_id(
        &pipeline.db,
        &conversation.id,
        &outbox[0].fields["client_id"],
    )
    .await
    .unwrap()
    .expect("outbound row persisted");
    assert_eq!(row.status, "sent");
    assert_eq!(row.direction, "out");
}

#[tokio::test]
async fn drip_flow_resumes_through_the_scheduler() {
    let pipeline = Pipeline::start().await;
    activate_definition(
        &pipeline.db,
        "org1",
        r#"{
            "paths": {
                "path_default": [
                    {"type": "action", "action": "send_text", "text": "uno"},
                    {"type": "wait", "seconds": 0},
                    {"type": "action", "action": "send_text", "text": "dos"}
                ]
            }
        }"#,
    )
    .await;

    pipeline.send_inbound("org1", "empecemos").await;

    // Two deliveries across two engine invocations: the wait suspends the
    // first, the scheduler republishes the continuation for the second.
    pipeline.wait_for_sent(2).await;
    let outbox = pipeline.transport.read_all(streams::OUTBOX).await;
    assert_eq!(outbox.len(), 2);
    assert_eq!(outbox[0].fields["text"], "uno");
    assert_eq!(outbox[1].fields["text"], "dos");
    assert_eq!(outbox[1].fields["to"], PHONE);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pipeline.transport.read_all(streams::OUTBOX).await.len(), 2);
}

#[tokio::test]
async fn wait_for_reply_suppresses_non_matching_messages() {
    let pipeline = Pipeline::start().await;
    activate_definition(
        &pipeline.db,
        "org1",
        r#"{
            "paths": {
                "path_default": [
                    {"type": "action", "action": "send_text", "text": "¿Confirmas tu pedido?"},
                    {"type": "wait_for_reply", "pattern": "^si$"},
                    {"type": "action", "action": "send_text", "text": "Gracias por confirmar"}
                ]
            }
        }"#,
    )
    .await;

    pipeline.send_inbound("org1", "quiero ordenar").await;
    pipeline.wait_for_sent(1).await;

    // Non-matching reply while waiting: dropped, no fallback, no resume.
    pipeline.send_inbound("org1", "todavia no").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pipeline.transport.read_all(streams::SENT).await.len(), 1);

    // Matching reply resumes past the wait step.
    pipeline.send_inbound("org1", "si").await;
    pipeline.wait_for_sent(2).await;
    let outbox = pipeline.transport.read_all(streams::OUTBOX).await;
    assert_eq!(outbox.len(), 2);
    assert_eq!(outbox[1].fields["text"], "Gracias por confirmar");
}

#[tokio::test]
async fn redelivered_outbox_entries_persist_one_history_row() {
    let pipeline = Pipeline::start().await;

    let fields = FieldMap::from([
        ("channel_id".to_string(), "wa_main".to_string()),
        ("to".to_string(), PHONE.to_string()),
        ("type".to_string(), "text".to_string()),
        ("text".to_string(), "promo".to_string()),
        ("client_id".to_string(), "campaign_001".to_string()),
        ("trace_id".to_string(), "t-1".to_string()),
        ("org_id".to_string(), "org1".to_string()),
    ]);
    pipeline
        .transport
        .publish(streams::OUTBOX, fields.clone())
        .await
        .unwrap();
    pipeline
        .transport
        .publish(streams::OUTBOX, fields)
        .await
        .unwrap();

    // Both deliveries complete and report, but history dedupes on client_id.
    pipeline.wait_for_sent(2).await;
    let contact = contacts::resolve_or_create(&pipeline.db, "org1", "wa_main", PHONE)
        .await
        .unwrap();
    let conversation =
        conversations::resolve_or_create(&pipeline.db, "org1", "wa_main", &contact.id)
            .await
            .unwrap();
    let row = messages::find_by_client_id(&pipeline.db, &conversation.id, "campaign_001")
        .await
        .unwrap()
        .expect("one persisted row");
    assert_eq!(row.body, "promo");
}

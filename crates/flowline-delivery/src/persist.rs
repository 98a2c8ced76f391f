// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Idempotent conversation-history persistence.
//!
//! Redelivered envelopes (same `client_id` in the same conversation) update
//! the existing row's delivery metadata instead of inserting a duplicate.

use tracing::debug;

use flowline_core::{FlowlineError, OutboundContent, OutboundEnvelope};
use flowline_storage::Database;
use flowline_storage::queries::{contacts, conversations, messages};

/// Outcome of one delivery attempt chain, as written into history and onto
/// the sent stream.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub fake: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn status(&self) -> &'static str {
        if self.error.is_some() { "failed" } else { "sent" }
    }
}

fn body_text(content: &OutboundContent) -> &str {
    match content {
        OutboundContent::Text(t) => t,
        OutboundContent::Template(t) => t,
        OutboundContent::Media(m) => m,
    }
}

/// Upsert the outbound history row for a processed envelope.
///
/// Resolves contact and conversation for `(org, channel, to)` unless the
/// envelope names a conversation explicitly. Returns the conversation id.
pub async fn record_outbound(
    db: &Database,
    envelope: &OutboundEnvelope,
    outcome: &DeliveryOutcome,
) -> Result<String, FlowlineError> {
    let conversation_id = match &envelope.conversation_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => {
            let org_id = envelope.org_id.as_deref().unwrap_or("default");
            let contact =
                contacts::resolve_or_create(db, org_id, &envelope.channel_id, &envelope.to)
                    .await?;
            conversations::resolve_or_create(db, org_id, &envelope.channel_id, &contact.id)
                .await?
                .id
        }
    };

    let mut meta = serde_json::json!({
        "trace_id": envelope.trace_id,
        "fake": outcome.fake,
        "kind": envelope.content.kind(),
    });
    if let Some(id) = &outcome.provider_message_id {
        meta["provider_message_id"] = serde_json::Value::String(id.clone());
    }
    if let Some(error) = &outcome.error {
        meta["error"] = serde_json::Value::String(error.clone());
    }

    let message_id = messages::upsert_outbound(
        db,
        &conversation_id,
        body_text(&envelope.content),
        &envelope.client_id,
        outcome.status(),
        outcome.provider_message_id.as_deref(),
        &meta,
    )
    .await?;
    debug!(
        conversation_id = %conversation_id,
        message_id = %message_id,
        client_id = %envelope.client_id,
        "outbound history recorded"
    );
    Ok(conversation_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(client_id: &str) -> OutboundEnvelope {
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
    }

    fn sent_outcome(id: &str) -> DeliveryOutcome {
        DeliveryOutcome {
            fake: false,
            provider_message_id: Some(id.into()),
            error: None,
        }
    }

    #[tokio::test]
    async fn redelivery_updates_instead_of_duplicating() {
        let db = Database::open_in_memory().await.unwrap();
        let env = envelope("cli-1");

        let conv = record_outbound(
            &db,
            &env,
            &DeliveryOutcome {
                fake: true,
                provider_message_id: None,
                error: None,
            },
        )
        .await
        .unwrap();
        let conv2 = record_outbound(&db, &env, &sent_outcome("wamid.X")).await.unwrap();
        assert_eq!(conv, conv2);

        let row = messages::find_by_client_id(&db, &conv, "cli-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.provider_message_id.as_deref(), Some("wamid.X"));
        let meta: serde_json::Value = serde_json::from_str(&row.meta).unwrap();
        assert_eq!(meta["trace_id"], "t-1");
        assert_eq!(meta["provider_message_id"], "wamid.X");
    }

    #[tokio::test]
    async fn failed_outcome_is_recorded_with_error() {
        let db = Database::open_in_memory().await.unwrap();
        let conv = record_outbound(
            &db,
            &envelope("cli-2"),
            &DeliveryOutcome {
                fake: false,
                provider_message_id: None,
                error: Some("provider returned 503".into()),
            },
        )
        .await
        .unwrap();

        let row = messages::find_by_client_id(&db, &conv, "cli-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "failed");
    }
}

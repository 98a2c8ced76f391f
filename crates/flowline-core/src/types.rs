// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the pipeline stages.
//!
//! Stream entries are flat string field maps; the typed structs here carry
//! the conversions so each worker deals in domain values, not raw maps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Flat key/value payload of a single stream entry.
pub type FieldMap = HashMap<String, String>;

/// Well-known stream names.
///
/// One dead-letter stream per stage, mirroring the `<stream>:dlq` layout.
pub mod streams {
    /// Inbound provider events (and republished continuations).
    pub const INCOMING: &str = "fl:incoming";
    /// Inbound events that exhausted engine retries.
    pub const INCOMING_DLQ: &str = "fl:incoming:dlq";
    /// Outbound envelopes awaiting delivery.
    pub const OUTBOX: &str = "fl:outbox";
    /// Outbound envelopes that exhausted provider retries.
    pub const OUTBOX_DLQ: &str = "fl:outbox:dlq";
    /// Completion records for every processed outbound envelope.
    pub const SENT: &str = "fl:sent";
    /// Internal domain events awaiting webhook fan-out.
    pub const EVENTS: &str = "fl:events";
    /// Webhook deliveries that exhausted retries.
    pub const WEBHOOKS_DLQ: &str = "fl:webhooks:dlq";
    /// Audit records for successful webhook deliveries.
    pub const WEBHOOKS_DELIVERED: &str = "wh:delivered";
}

/// Minimal execution state carried across a flow suspension.
///
/// The interpreter is stateless per invocation; a `wait` or `wait_for_reply`
/// step terminates the invocation and this record is all that re-enters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub path: String,
    pub index: usize,
}

impl Continuation {
    pub fn new(path: impl Into<String>, index: usize) -> Self {
        Self {
            path: path.into(),
            index,
        }
    }
}

/// Type-specific body of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text(String),
    /// JSON-encoded template object `{name, language, components}`.
    Template(String),
    /// JSON-encoded media object `{kind, link}`.
    Media(String),
}

impl OutboundContent {
    /// Wire value of the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundContent::Text(_) => "text",
            OutboundContent::Template(_) => "template",
            OutboundContent::Media(_) => "media",
        }
    }
}

/// An outbound message envelope as carried on the outbox stream.
///
/// `client_id` is the idempotency key for persisted history; `trace_id`
/// correlates inbound and outbound log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub channel_id: String,
    pub to: String,
    pub content: OutboundContent,
    pub client_id: String,
    pub trace_id: String,
    pub org_id: Option<String>,
    pub requested_by: Option<String>,
    pub conversation_id: Option<String>,
    /// Original inbound text, carried on heuristic fallback replies.
    pub orig_text: Option<String>,
}

impl OutboundEnvelope {
    /// Serialize to the flat outbox stream fields.
    pub fn to_fields(&self) -> FieldMap {
        let mut f = FieldMap::new();
        f.insert("channel_id".into(), self.channel_id.clone());
        f.insert("to".into(), self.to.clone());
        f.insert("type".into(), self.content.kind().into());
        match &self.content {
            OutboundContent::Text(t) => f.insert("text".into(), t.clone()),
            OutboundContent::Template(t) => f.insert("template".into(), t.clone()),
            OutboundContent::Media(m) => f.insert("media".into(), m.clone()),
        };
        f.insert("client_id".into(), self.client_id.clone());
        f.insert("trace_id".into(), self.trace_id.clone());
        if let Some(org) = &self.org_id {
            f.insert("org_id".into(), org.clone());
        }
        if let Some(by) = &self.requested_by {
            f.insert("requested_by".into(), by.clone());
        }
        if let Some(cv) = &self.conversation_id {
            f.insert("conversation_id".into(), cv.clone());
        }
        if let Some(orig) = &self.orig_text {
            f.insert("orig_text".into(), orig.clone());
        }
        f
    }

    /// Parse outbox stream fields back into an envelope.
    ///
    /// Returns `None` when the entry lacks the fields a delivery attempt
    /// cannot proceed without (`to`, `client_id`). Absent type falls back
    /// to an empty text message rather than an error.
    pub fn from_fields(fields: &FieldMap) -> Option<Self> {
        let to = fields.get("to").filter(|s| !s.is_empty())?.clone();
        let client_id = fields.get("client_id").filter(|s| !s.is_empty())?.clone();
        let kind = fields.get("type").map(String::as_str).unwrap_or("text");
        let content = match kind {
            "template" => {
                OutboundContent::Template(fields.get("template").cloned().unwrap_or_default())
            }
            "media" => OutboundContent::Media(fields.get("media").cloned().unwrap_or_default()),
            _ => OutboundContent::Text(fields.get("text").cloned().unwrap_or_default()),
        };
        Some(Self {
            channel_id: fields
                .get("channel_id")
                .cloned()
                .unwrap_or_else(|| "wa_main".to_string()),
            to,
            content,
            client_id,
            trace_id: fields.get("trace_id").cloned().unwrap_or_default(),
            org_id: fields.get("org_id").cloned(),
            requested_by: fields.get("requested_by").cloned(),
            conversation_id: fields.get("conversation_id").cloned(),
            orig_text: fields.get("orig_text").cloned(),
        })
    }
}

/// An internal domain event bound for webhook fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalEvent {
    pub org_id: String,
    pub kind: String,
    pub event_id: String,
    /// Unix milliseconds.
    pub ts: i64,
    /// JSON-encoded event body.
    pub body: String,
}

impl InternalEvent {
    pub fn new(org_id: impl Into<String>, kind: impl Into<String>, body: String) -> Self {
        Self {
            org_id: org_id.into(),
            kind: kind.into(),
            event_id: uuid::Uuid::new_v4().to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            body,
        }
    }

    pub fn to_fields(&self) -> FieldMap {
        FieldMap::from([
            ("org_id".into(), self.org_id.clone()),
            ("type".into(), self.kind.clone()),
            ("event_id".into(), self.event_id.clone()),
            ("ts".into(), self.ts.to_string()),
            ("body".into(), self.body.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> OutboundEnvelope {
        OutboundEnvelope {
            channel_id: "wa_main".into(),
            to: "5215550001".into(),
            content: OutboundContent::Text("hola".into()),
            client_id: "auto_abc".into(),
            trace_id: "t-1".into(),
            org_id: Some("org-1".into()),
            requested_by: None,
            conversation_id: None,
            orig_text: Some("hola!".into()),
        }
    }

    #[test]
    fn envelope_field_round_trip() {
        let env = sample_envelope();
        let fields = env.to_fields();
        assert_eq!(fields["type"], "text");
        assert_eq!(fields["text"], "hola");
        let parsed = OutboundEnvelope::from_fields(&fields).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn envelope_requires_to_and_client_id() {
        let mut fields = sample_envelope().to_fields();
        fields.remove("to");
        assert!(OutboundEnvelope::from_fields(&fields).is_none());

        let mut fields = sample_envelope().to_fields();
        fields.remove("client_id");
        assert!(OutboundEnvelope::from_fields(&fields).is_none());
    }

    #[test]
    fn envelope_unknown_type_degrades_to_text() {
        let mut fields = sample_envelope().to_fields();
        fields.insert("type".into(), "carrier-pigeon".into());
        let parsed = OutboundEnvelope::from_fields(&fields).unwrap();
        assert_eq!(parsed.content.kind(), "text");
    }

    #[test]
    fn template_envelope_carries_json_payload() {
        let tpl = r#"{"name":"welcome","language":{"code":"es"},"components":[]}"#;
        let env = OutboundEnvelope {
            content: OutboundContent::Template(tpl.into()),
            ..sample_envelope()
        };
        let fields = env.to_fields();
        assert_eq!(fields["type"], "template");
        assert_eq!(fields["template"], tpl);
        assert!(!fields.contains_key("text"));
    }

    #[test]
    fn internal_event_fields() {
        let evt = InternalEvent::new("org-1", "flow.webhook", r#"{"k":"v"}"#.into());
        let fields = evt.to_fields();
        assert_eq!(fields["org_id"], "org-1");
        assert_eq!(fields["type"], "flow.webhook");
        assert!(!fields["event_id"].is_empty());
        assert!(fields["ts"].parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn continuation_serde_round_trip() {
        let c = Continuation::new("path_default", 2);
        let json = serde_json::to_string(&c).unwrap();
        let back: Continuation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}

// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the pipeline's SQLite tables.
//!
//! JSON-bearing columns (flow definitions, contact attributes, message meta)
//! are kept as raw strings here; callers parse them at the point of use.

use serde::{Deserialize, Serialize};

/// A stored flow definition. At most one flow per org is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub org_id: String,
    pub name: String,
    /// Flow graph JSON as authored.
    pub definition: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub org_id: String,
    pub channel_id: String,
    pub phone: String,
    /// Free-form key/value attributes, JSON object.
    pub attributes: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub org_id: String,
    pub channel_id: String,
    pub contact_id: String,
    pub status: String,
    pub created_at: String,
}

/// A persisted message. `(conversation_id, client_id)` is unique, which is
/// what makes outbound persistence idempotent under redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    /// `in` or `out`.
    pub direction: String,
    pub body: String,
    pub client_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub status: String,
    pub meta: String,
    pub created_at: String,
}

/// Audit record of one interpreter invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub id: String,
    pub org_id: String,
    pub flow_id: Option<String>,
    pub contact_id: Option<String>,
    pub conversation_id: Option<String>,
    pub status: String,
    pub context: String,
    pub started_at: String,
}

/// An org's registered webhook receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub org_id: String,
    pub url: String,
    pub secret: Option<String>,
    /// Subscribed event kinds. Empty means "all events".
    pub events: Vec<String>,
    pub status: String,
}

/// A pending wait-for-reply, keyed by `(org_id, channel_id, contact)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitRecord {
    pub org_id: String,
    pub channel_id: String,
    pub contact: String,
    pub path: String,
    pub step_index: usize,
    pub pattern: Option<String>,
    pub resume_token: String,
    pub timeout_path: Option<String>,
    /// Unix millis after which the record is treated as absent.
    pub expires_at: i64,
}

/// A timer entry claimed by the scheduler once `due_at` passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledItem {
    pub id: i64,
    /// Unix millis.
    pub due_at: i64,
    /// Resume envelope JSON.
    pub payload: String,
    pub resume_token: Option<String>,
}

// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message persistence.
//!
//! Outbound persistence is idempotent on `(conversation_id, client_id)`:
//! a redelivered envelope updates the existing row instead of inserting a
//! duplicate, merging the new meta over the old.

use rusqlite::params;
use uuid::Uuid;

use flowline_core::FlowlineError;

use crate::database::{Database, map_tr_err};
use crate::models::MessageRow;

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        direction: row.get(2)?,
        body: row.get(3)?,
        client_id: row.get(4)?,
        provider_message_id: row.get(5)?,
        status: row.get(6)?,
        meta: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Record an inbound message. Returns the generated message id.
pub async fn insert_inbound(
    db: &Database,
    conversation_id: &str,
    body: &str,
) -> Result<String, FlowlineError> {
    let id = Uuid::new_v4().to_string();
    let ret = id.clone();
    let conversation_id = conversation_id.to_string();
    let body = body.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, direction, body, status)
                 VALUES (?1, ?2, 'in', ?3, 'received')",
                params![id, conversation_id, body],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
    Ok(ret)
}

/// Upsert an outbound message by client id.
///
/// A fresh `client_id` inserts; a repeated one updates status, provider
/// message id, and merges `meta` keys over the stored object. Returns the
/// message id in both cases.
pub async fn upsert_outbound(
    db: &Database,
    conversation_id: &str,
    body: &str,
    client_id: &str,
    status: &str,
    provider_message_id: Option<&str>,
    meta: &serde_json::Value,
) -> Result<String, FlowlineError> {
    let conversation_id = conversation_id.to_string();
    let body = body.to_string();
    let client_id = client_id.to_string();
    let status = status.to_string();
    let provider_message_id = provider_message_id.map(str::to_string);
    let meta = meta.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let existing: Option<(String, String)> = match tx.query_row(
                "SELECT id, meta FROM messages
                 WHERE conversation_id = ?1 AND client_id = ?2",
                params![conversation_id, client_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            ) {
                Ok(pair) => Some(pair),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };

            let id = match existing {
                Some((id, stored_meta)) => {
                    let mut merged: serde_json::Map<String, serde_json::Value> =
                        serde_json::from_str(&stored_meta).unwrap_or_default();
                    if let Some(obj) = meta.as_object() {
                        for (k, v) in obj {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                    tx.execute(
                        "UPDATE messages
                         SET status = ?1,
                             provider_message_id = COALESCE(?2, provider_message_id),
                             meta = ?3
                         WHERE id = ?4",
                        params![
                            status,
                            provider_message_id,
                            serde_json::Value::Object(merged).to_string(),
                            id
                        ],
                    )?;
                    id
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO messages
                         (id, conversation_id, direction, body, client_id,
                          provider_message_id, status, meta)
                         VALUES (?1, ?2, 'out', ?3, ?4, ?5, ?6, ?7)",
                        params![
                            id,
                            conversation_id,
                            body,
                            client_id,
                            provider_message_id,
                            status,
                            meta.to_string()
                        ],
                    )?;
                    id
                }
            };
            tx.commit()?;
            Ok(id)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a message by conversation and client id.
pub async fn find_by_client_id(
    db: &Database,
    conversation_id: &str,
    client_id: &str,
) -> Result<Option<MessageRow>, FlowlineError> {
    let conversation_id = conversation_id.to_string();
    let client_id = client_id.to_string();
    db.connection()
        .call(move |conn| {
            match conn.query_row(
                "SELECT id, conversation_id, direction, body, client_id,
                        provider_message_id, status, meta, created_at
                 FROM messages
                 WHERE conversation_id = ?1 AND client_id = ?2",
                params![conversation_id, client_id],
                row_to_message,
            ) {
                Ok(msg) => Ok(Some(msg)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact resolution and attribute storage.

use rusqlite::params;
use uuid::Uuid;

use flowline_core::FlowlineError;

use crate::database::{Database, map_tr_err};
use crate::models::Contact;

fn row_to_contact(row: &rusqlite::Row<'_>) -> Result<Contact, rusqlite::Error> {
    Ok(Contact {
        id: row.get(0)?,
        org_id: row.get(1)?,
        channel_id: row.get(2)?,
        phone: row.get(3)?,
        attributes: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Find the contact for `(org, channel, phone)`, creating it when missing.
///
/// Creation races resolve through the unique constraint: the loser re-reads
/// the winner's row.
pub async fn resolve_or_create(
    db: &Database,
    org_id: &str,
    channel_id: &str,
    phone: &str,
) -> Result<Contact, FlowlineError> {
    let org_id = org_id.to_string();
    let channel_id = channel_id.to_string();
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO contacts (id, org_id, channel_id, phone)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (org_id, channel_id, phone) DO NOTHING",
                params![id, org_id, channel_id, phone],
            )?;
            let contact = conn.query_row(
                "SELECT id, org_id, channel_id, phone, attributes, created_at
                 FROM contacts
                 WHERE org_id = ?1 AND channel_id = ?2 AND phone = ?3",
                params![org_id, channel_id, phone],
                row_to_contact,
            )?;
            Ok(contact)
        })
        .await
        .map_err(map_tr_err)
}

/// Merge key/value pairs into a contact's attribute object.
///
/// Last writer wins per key; unrelated keys are preserved.
pub async fn merge_attributes(
    db: &Database,
    contact_id: &str,
    updates: &[(String, String)],
) -> Result<(), FlowlineError> {
    if updates.is_empty() {
        return Ok(());
    }
    let contact_id = contact_id.to_string();
    let updates = updates.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let current: String = tx.query_row(
                "SELECT attributes FROM contacts WHERE id = ?1",
                params![contact_id],
                |row| row.get(0),
            )?;
            let mut attrs: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&current).unwrap_or_default();
            for (key, value) in updates {
                attrs.insert(key, serde_json::Value::String(value));
            }
            let merged = serde_json::Value::Object(attrs).to_string();
            tx.execute(
                "UPDATE contacts SET attributes = ?1 WHERE id = ?2",
                params![merged, contact_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

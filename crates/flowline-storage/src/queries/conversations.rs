// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation resolution.

use rusqlite::params;
use uuid::Uuid;

use flowline_core::FlowlineError;

use crate::database::{Database, map_tr_err};
use crate::models::Conversation;

/// Find the contact's open conversation on a channel, creating one if none
/// exists.
pub async fn resolve_or_create(
    db: &Database,
    org_id: &str,
    channel_id: &str,
    contact_id: &str,
) -> Result<Conversation, FlowlineError> {
    let org_id = org_id.to_string();
    let channel_id = channel_id.to_string();
    let contact_id = contact_id.to_string();
    db.connection()
        .call(move |conn| {
            let existing = conn.query_row(
                "SELECT id, org_id, channel_id, contact_id, status, created_at
                 FROM conversations
                 WHERE contact_id = ?1 AND channel_id = ?2 AND status = 'open'
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![contact_id, channel_id],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        org_id: row.get(1)?,
                        channel_id: row.get(2)?,
                        contact_id: row.get(3)?,
                        status: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            );
            match existing {
                Ok(conversation) => Ok(conversation),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    let id = Uuid::new_v4().to_string();
                    conn.execute(
                        "INSERT INTO conversations (id, org_id, channel_id, contact_id)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![id, org_id, channel_id, contact_id],
                    )?;
                    let created = conn.query_row(
                        "SELECT id, org_id, channel_id, contact_id, status, created_at
                         FROM conversations WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(Conversation {
                                id: row.get(0)?,
                                org_id: row.get(1)?,
                                channel_id: row.get(2)?,
                                contact_id: row.get(3)?,
                                status: row.get(4)?,
                                created_at: row.get(5)?,
                            })
                        },
                    )?;
                    Ok(created)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::contacts;

    #[tokio::test]
    async fn open_conversation_is_reused() {
        let db = Database::open_in_memory().await.unwrap();
        let contact = contacts::resolve_or_create(&db, "org1", "wa_main", "+521")
            .await
            .unwrap();

        let a = resolve_or_create(&db, "org1", "wa_main", &contact.id)
            .await
            .unwrap();
        let b = resolve_or_create(&db, "org1", "wa_main", &contact.id)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.status, "open");
    }
}

// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduled timer storage.
//!
//! The scheduler claims due items by deleting them inside a transaction, so
//! concurrent scheduler instances never double-fire an item.

use rusqlite::params;

use flowline_core::FlowlineError;

use crate::database::{Database, map_tr_err};
use crate::models::ScheduledItem;

/// Add a timer firing at `due_at` (unix millis). Returns the item id.
pub async fn add_scheduled(
    db: &Database,
    due_at: i64,
    payload: &str,
    resume_token: Option<&str>,
) -> Result<i64, FlowlineError> {
    let payload = payload.to_string();
    let resume_token = resume_token.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO scheduled_items (due_at, payload, resume_token)
                 VALUES (?1, ?2, ?3)",
                params![due_at, payload, resume_token],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Claim up to `limit` items due at or before `now_ms`.
///
/// Claimed items are removed atomically with the read; a crash after claim
/// loses the timer rather than firing it twice.
pub async fn claim_due(
    db: &Database,
    now_ms: i64,
    limit: usize,
) -> Result<Vec<ScheduledItem>, FlowlineError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let items = {
                let mut stmt = tx.prepare(
                    "SELECT id, due_at, payload, resume_token
                     FROM scheduled_items
                     WHERE due_at <= ?1
                     ORDER BY due_at ASC, id ASC
                     LIMIT ?2",
                )?;
                stmt.query_map(params![now_ms, limit as i64], |row| {
                    Ok(ScheduledItem {
                        id: row.get(0)?,
                        due_at: row.get(1)?,
                        payload: row.get(2)?,
                        resume_token: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?
            };
            for item in &items {
                tx.execute("DELETE FROM scheduled_items WHERE id = ?1", params![item.id])?;
            }
            tx.commit()?;
            Ok(items)
        })
        .await
        .map_err(map_tr_err)
}

/// Number of timers still waiting to fire.
pub async fn pending_count(db: &Database) -> Result<i64, FlowlineError> {
    db.connection()
        .call(|conn| {
            let n = conn.query_row("SELECT COUNT(*) FROM scheduled_items", [], |row| row.get(0))?;
            Ok(n)
        })
        .await
        .map_err(map_tr_err)
}

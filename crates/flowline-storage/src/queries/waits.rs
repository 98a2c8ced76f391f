// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wait-for-reply records.
//!
//! One record per `(org, channel, contact)`; writing a new one replaces any
//! previous wait. Expiry is checked on read, and the paired timeout timer is
//! disarmed by token so that reply and timeout cannot both fire.

use rusqlite::params;

use flowline_core::FlowlineError;

use crate::database::{Database, map_tr_err};
use crate::models::WaitRecord;

/// Store (or replace) the contact's pending wait.
pub async fn put_wait(db: &Database, record: &WaitRecord) -> Result<(), FlowlineError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO wait_records
                 (org_id, channel_id, contact, path, step_index, pattern,
                  resume_token, timeout_path, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (org_id, channel_id, contact) DO UPDATE SET
                   path = excluded.path,
                   step_index = excluded.step_index,
                   pattern = excluded.pattern,
                   resume_token = excluded.resume_token,
                   timeout_path = excluded.timeout_path,
                   expires_at = excluded.expires_at",
                params![
                    record.org_id,
                    record.channel_id,
                    record.contact,
                    record.path,
                    record.step_index as i64,
                    record.pattern,
                    record.resume_token,
                    record.timeout_path,
                    record.expires_at
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The contact's pending wait, if any. Records whose `expires_at` has passed
/// are deleted and reported as absent.
pub async fn get_wait(
    db: &Database,
    org_id: &str,
    channel_id: &str,
    contact: &str,
    now_ms: i64,
) -> Result<Option<WaitRecord>, FlowlineError> {
    let org_id = org_id.to_string();
    let channel_id = channel_id.to_string();
    let contact = contact.to_string();
    db.connection()
        .call(move |conn| {
            let found = conn.query_row(
                "SELECT org_id, channel_id, contact, path, step_index, pattern,
                        resume_token, timeout_path, expires_at
                 FROM wait_records
                 WHERE org_id = ?1 AND channel_id = ?2 AND contact = ?3",
                params![org_id, channel_id, contact],
                |row| {
                    Ok(WaitRecord {
                        org_id: row.get(0)?,
                        channel_id: row.get(1)?,
                        contact: row.get(2)?,
                        path: row.get(3)?,
                        step_index: row.get::<_, i64>(4)? as usize,
                        pattern: row.get(5)?,
                        resume_token: row.get(6)?,
                        timeout_path: row.get(7)?,
                        expires_at: row.get(8)?,
                    })
                },
            );
            match found {
                Ok(record) if record.expires_at <= now_ms => {
                    conn.execute(
                        "DELETE FROM wait_records
                         WHERE org_id = ?1 AND channel_id = ?2 AND contact = ?3",
                        params![record.org_id, record.channel_id, record.contact],
                    )?;
                    Ok(None)
                }
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Delete the wait only if it still carries `resume_token`.
///
/// Returns whether a row was deleted. The reply path and the timeout path
/// both funnel through this, so exactly one of them wins.
pub async fn clear_wait_if_token(
    db: &Database,
    org_id: &str,
    channel_id: &str,
    contact: &str,
    resume_token: &str,
) -> Result<bool, FlowlineError> {
    let org_id = org_id.to_string();
    let channel_id = channel_id.to_string();
    let contact = contact.to_string();
    let resume_token = resume_token.to_string();
    db.connection()
        .call(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM wait_records
                 WHERE org_id = ?1 AND channel_id = ?2 AND contact = ?3
                   AND resume_token = ?4",
                params![org_id, channel_id, contact, resume_token],
            )?;
            Ok(deleted > 0)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str, expires_at: i64) -> WaitRecord {
        WaitRecord {
            org_id: "org1".to_string(),
            channel_id: "wa_main".to_string(),
            contact: "+521".to_string(),
            path: "support".to_string(),
            step_index: 2,
            pattern: Some(r"^(si|no)$".to_string()),
            resume_token: token.to_string(),
            timeout_path: Some("timeout".to_string()),
            expires_at,
        }
    }

    #[tokio::test]
    async fn put_get_and_replace() {
        let db = Database::open_in_memory().await.unwrap();
        put_wait(&db, &record("tok-1", 10_000)).await.unwrap();

        let got = get_wait(&db, "org1", "wa_main", "+521", 5_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.resume_token, "tok-1");
        assert_eq!(got.step_index, 2);

        // A second wait for the same contact replaces the first.
        put_wait(&db, &record("tok-2", 20_000)).await.unwrap();
        let got = get_wait(&db, "org1", "wa_main", "+521", 5_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.resume_token, "tok-2");
    }

    #[tokio::test]
    async fn expired_wait_is_absent_and_purged() {
        let db = Database::open_in_memory().await.unwrap();
        put_wait(&db, &record("tok-1", 1_000)).await.unwrap();

        assert!(
            get_wait(&db, "org1", "wa_main", "+521", 2_000)
                .await
                .unwrap()
                .is_none()
        );
        // Purged, not just filtered.
        assert!(
            get_wait(&db, "org1", "wa_main", "+521", 0)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn clear_by_token_races_to_one_winner() {
        let db = Database::open_in_memory().await.unwrap();
        put_wait(&db, &record("tok-1", 10_000)).await.unwrap();

        assert!(
            clear_wait_if_token(&db, "org1", "wa_main", "+521", "tok-1")
                .await
                .unwrap()
        );
        // Second clear with the same token loses.
        assert!(
            !clear_wait_if_token(&db, "org1", "wa_main", "+521", "tok-1")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn clear_with_stale_token_is_a_noop() {
        let db = Database::open_in_memory().await.unwrap();
        put_wait(&db, &record("tok-2", 10_000)).await.unwrap();

        assert!(
            !clear_wait_if_token(&db, "org1", "wa_main", "+521", "tok-1")
                .await
                .unwrap()
        );
        // The current wait survives.
        assert!(
            get_wait(&db, "org1", "wa_main", "+521", 0)
                .await
                .unwrap()
                .is_some()
        );
    }
}

// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow definition storage and activation.

use rusqlite::params;
use uuid::Uuid;

use flowline_core::FlowlineError;

use crate::database::{Database, map_tr_err};
use crate::models::Flow;

fn row_to_flow(row: &rusqlite::Row<'_>) -> Result<Flow, rusqlite::Error> {
    Ok(Flow {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        definition: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Insert a new (inactive) flow. Returns the generated flow id.
pub async fn insert_flow(
    db: &Database,
    org_id: &str,
    name: &str,
    definition: &str,
) -> Result<String, FlowlineError> {
    let id = Uuid::new_v4().to_string();
    let ret = id.clone();
    let org_id = org_id.to_string();
    let name = name.to_string();
    let definition = definition.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO flows (id, org_id, name, definition, active)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![id, org_id, name, definition],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
    Ok(ret)
}

/// Activate a flow and deactivate all of its org's other flows, atomically.
pub async fn activate_flow(db: &Database, org_id: &str, flow_id: &str) -> Result<(), FlowlineError> {
    let org_id = org_id.to_string();
    let flow_id = flow_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE flows SET active = 0,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE org_id = ?1 AND active = 1",
                params![org_id],
            )?;
            let changed = tx.execute(
                "UPDATE flows SET active = 1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND org_id = ?2",
                params![flow_id, org_id],
            )?;
            if changed == 0 {
                return Err(tokio_rusqlite::Error::Rusqlite(
                    rusqlite::Error::QueryReturnedNoRows,
                ));
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The org's currently active flow, if any.
pub async fn active_flow(db: &Database, org_id: &str) -> Result<Option<Flow>, FlowlineError> {
    let org_id = org_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, org_id, name, definition, active, created_at, updated_at
                 FROM flows
                 WHERE org_id = ?1 AND active = 1
                 ORDER BY updated_at DESC
                 LIMIT 1",
            )?;
            match stmt.query_row(params![org_id], row_to_flow) {
                Ok(flow) => Ok(Some(flow)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

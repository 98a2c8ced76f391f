// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow run audit records.

use rusqlite::params;
use uuid::Uuid;

use flowline_core::FlowlineError;

use crate::database::{Database, map_tr_err};
use crate::models::FlowRun;

/// Record one interpreter invocation. Returns the generated run id.
pub async fn insert_run(
    db: &Database,
    org_id: &str,
    flow_id: Option<&str>,
    contact_id: Option<&str>,
    conversation_id: Option<&str>,
    status: &str,
    context: &serde_json::Value,
) -> Result<String, FlowlineError> {
    let id = Uuid::new_v4().to_string();
    let ret = id.clone();
    let org_id = org_id.to_string();
    let flow_id = flow_id.map(str::to_string);
    let contact_id = contact_id.map(str::to_string);
    let conversation_id = conversation_id.map(str::to_string);
    let status = status.to_string();
    let context = context.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO flow_runs
                 (id, org_id, flow_id, contact_id, conversation_id, status, context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, org_id, flow_id, contact_id, conversation_id, status, context],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
    Ok(ret)
}

/// Recent runs for an org, newest first.
pub async fn recent_runs(
    db: &Database,
    org_id: &str,
    limit: usize,
) -> Result<Vec<FlowRun>, FlowlineError> {
    let org_id = org_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, org_id, flow_id, contact_id, conversation_id,
                        status, context, started_at
                 FROM flow_runs
                 WHERE org_id = ?1
                 ORDER BY started_at DESC
                 LIMIT ?2",
            )?;
            let runs = stmt
                .query_map(params![org_id, limit as i64], |row| {
                    Ok(FlowRun {
                        id: row.get(0)?,
                        org_id: row.get(1)?,
                        flow_id: row.get(2)?,
                        contact_id: row.get(3)?,
                        conversation_id: row.get(4)?,
                        status: row.get(5)?,
                        context: row.get(6)?,
                        started_at: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
        .await
        .map_err(map_tr_err)
}

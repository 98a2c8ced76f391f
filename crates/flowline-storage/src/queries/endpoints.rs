// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook endpoint registry.

use rusqlite::params;
use uuid::Uuid;

use flowline_core::FlowlineError;

use crate::database::{Database, map_tr_err};
use crate::models::WebhookEndpoint;

/// Register a webhook endpoint for an org. Returns the endpoint id.
pub async fn insert_endpoint(
    db: &Database,
    org_id: &str,
    url: &str,
    secret: Option<&str>,
    events: &[String],
) -> Result<String, FlowlineError> {
    let id = Uuid::new_v4().to_string();
    let ret = id.clone();
    let org_id = org_id.to_string();
    let url = url.to_string();
    let secret = secret.map(str::to_string);
    let events = serde_json::to_string(events).unwrap_or_else(|_| "[]".to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO webhook_endpoints (id, org_id, url, secret, events)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, org_id, url, secret, events],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
    Ok(ret)
}

/// Mark an endpoint inactive. Inactive endpoints are skipped by the dispatcher.
pub async fn deactivate_endpoint(db: &Database, endpoint_id: &str) -> Result<(), FlowlineError> {
    let endpoint_id = endpoint_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE webhook_endpoints SET status = 'inactive' WHERE id = ?1",
                params![endpoint_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// All endpoints registered for an org, active or not.
pub async fn endpoints_for_org(
    db: &Database,
    org_id: &str,
) -> Result<Vec<WebhookEndpoint>, FlowlineError> {
    let org_id = org_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, org_id, url, secret, events, status
                 FROM webhook_endpoints
                 WHERE org_id = ?1
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![org_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let endpoints = rows
                .into_iter()
                .map(|(id, org_id, url, secret, events, status)| WebhookEndpoint {
                    id,
                    org_id,
                    url,
                    secret,
                    events: serde_json::from_str(&events).unwrap_or_default(),
                    status,
                })
                .collect();
            Ok(endpoints)
        })
        .await
        .map_err(map_tr_err)
}

//! Durable record of local order mutations awaiting a remote push.
//!
//! One row per (order, mutation kind); a newer mutation of the same kind
//! replaces the payload and resets the retry budget. Rows are written in
//! the same transaction as the local mutation they describe.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PosError, PosResult};

pub const DEFAULT_MAX_RETRIES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    Status,
    Payment,
}

impl PushKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PushKind::Status => "status",
            PushKind::Payment => "payment",
        }
    }

    fn parse(raw: &str) -> PosResult<Self> {
        match raw {
            "status" => Ok(PushKind::Status),
            "payment" => Ok(PushKind::Payment),
            other => Err(PosError::Internal(format!("unknown push kind: {other}"))),
        }
    }
}

/// What gets sent to the remote directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PushPayload {
    Status { status: String },
    Payment { method: String, amount_received: f64 },
}

impl PushPayload {
    pub fn kind(&self) -> PushKind {
        match self {
            PushPayload::Status { .. } => PushKind::Status,
            PushPayload::Payment { .. } => PushKind::Payment,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushEntry {
    pub order_id: String,
    pub payload: PushPayload,
    /// Serialized payload as stored, used to detect a newer overwrite.
    pub raw_payload: String,
    pub retry_count: i64,
}

/// Record (or replace) the pending push for `order_id`.
pub fn enqueue(conn: &Connection, order_id: &str, payload: &PushPayload) -> PosResult<PushEntry> {
    let raw_payload = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO push_queue (order_id, kind, payload, status, retry_count, max_retries)
         VALUES (?1, ?2, ?3, 'pending', 0, ?4)
         ON CONFLICT(order_id, kind) DO UPDATE SET
            payload = excluded.payload,
            status = 'pending',
            retry_count = 0,
            last_error = NULL,
            updated_at = datetime('now')",
        params![
            order_id,
            payload.kind().as_str(),
            raw_payload,
            DEFAULT_MAX_RETRIES
        ],
    )?;
    Ok(PushEntry {
        order_id: order_id.to_string(),
        payload: payload.clone(),
        raw_payload,
        retry_count: 0,
    })
}

/// Pending entries with retry budget left, oldest first.
pub fn pending(conn: &Connection, limit: usize) -> PosResult<Vec<PushEntry>> {
    let mut stmt = conn.prepare(
        "SELECT order_id, kind, payload, retry_count FROM push_queue
         WHERE status = 'pending' AND retry_count < max_retries
         ORDER BY updated_at ASC, id ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (order_id, kind, raw_payload, retry_count) = row?;
        PushKind::parse(&kind)?;
        match serde_json::from_str::<PushPayload>(&raw_payload) {
            Ok(payload) => entries.push(PushEntry {
                order_id,
                payload,
                raw_payload,
                retry_count,
            }),
            Err(e) => warn!(order_id = %order_id, "dropping unreadable push payload: {e}"),
        }
    }
    Ok(entries)
}

/// Mark delivered, unless a newer payload replaced it meanwhile.
pub fn mark_delivered(conn: &Connection, entry: &PushEntry) -> PosResult<bool> {
    let changed = conn.execute(
        "UPDATE push_queue SET status = 'synced', last_error = NULL, updated_at = datetime('now')
         WHERE order_id = ?1 AND kind = ?2 AND payload = ?3 AND status = 'pending'",
        params![
            entry.order_id,
            entry.payload.kind().as_str(),
            entry.raw_payload
        ],
    )?;
    Ok(changed > 0)
}

/// Count a failed attempt. Entries that exhaust their budget become `failed`.
pub fn record_failure(conn: &Connection, entry: &PushEntry, error: &str) -> PosResult<()> {
    conn.execute(
        "UPDATE push_queue SET
            retry_count = retry_count + 1,
            last_error = ?4,
            status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
            updated_at = datetime('now')
         WHERE order_id = ?1 AND kind = ?2 AND payload = ?3 AND status = 'pending'",
        params![
            entry.order_id,
            entry.payload.kind().as_str(),
            entry.raw_payload,
            error
        ],
    )?;
    Ok(())
}

pub fn has_pending(conn: &Connection, order_id: &str) -> PosResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM push_queue WHERE order_id = ?1 AND status = 'pending' LIMIT 1",
            params![order_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: i64,
    pub failed: i64,
}

pub fn counts(conn: &Connection) -> PosResult<QueueCounts> {
    let (pending, failed) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
         FROM push_queue",
        [],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
    )?;
    Ok(QueueCounts { pending, failed })
}

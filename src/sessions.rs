//! Cash register sessions.
//!
//! At most one session is open per store at a time. Sessions are locally
//! owned and are never touched by a pull.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth;
use crate::db;
use crate::error::{PosError, PosResult};
use crate::models::{Session, SyncMarker};
use crate::pricing;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSession {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "staff_id", alias = "openedBy", alias = "opened_by")]
    pub staff_id: String,
    #[serde(default, alias = "opening_balance")]
    pub opening_balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSession {
    #[serde(alias = "session_id")]
    pub session_id: String,
    #[serde(alias = "actual_closing_balance", alias = "countedCash")]
    pub actual_closing_balance: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

const SESSION_COLUMNS: &str = "id, store_id, opened_by, opened_at, closed_at, opening_balance,
    closing_balance, actual_closing_balance, notes, status";

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        store_id: row.get(1)?,
        opened_by: row.get(2)?,
        opened_at: row.get(3)?,
        closed_at: row.get(4)?,
        opening_balance: row.get(5)?,
        closing_balance: row.get(6)?,
        actual_closing_balance: row.get(7)?,
        notes: row.get(8)?,
        status: row.get(9)?,
    })
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn get_open_session(conn: &Connection, store_id: &str) -> PosResult<Option<Session>> {
    let session = conn
        .query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM local_pos_sessions
                 WHERE store_id = ?1 AND status = 'open'
                 ORDER BY opened_at DESC LIMIT 1"
            ),
            params![store_id],
            session_from_row,
        )
        .optional()?;
    Ok(session)
}

fn get_session(conn: &Connection, session_id: &str) -> PosResult<Session> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM local_pos_sessions WHERE id = ?1"),
        params![session_id],
        session_from_row,
    )
    .optional()?
    .ok_or_else(|| PosError::NotFound(format!("session {session_id}")))
}

pub fn open_session(conn: &Connection, input: &OpenSession) -> PosResult<Session> {
    let store_id = input.store_id.trim();
    let staff_id = input.staff_id.trim();
    if store_id.is_empty() || staff_id.is_empty() {
        return Err(PosError::Validation("store id and staff id are required".into()));
    }
    if !input.opening_balance.is_finite() || input.opening_balance < 0.0 {
        return Err(PosError::Validation("opening balance is not valid".into()));
    }

    let session_id = db::with_transaction(conn, |tx| {
        if let Some(existing) = get_open_session(tx, store_id)? {
            return Err(PosError::Validation(format!(
                "a session is already open ({})",
                existing.id
            )));
        }
        if !auth::staff_exists(tx, staff_id)? {
            return Err(PosError::Validation(format!("unknown staff member {staff_id}")));
        }

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO local_pos_sessions
                (id, store_id, opened_by, opened_at, opening_balance, status, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6)",
            params![
                id,
                store_id,
                staff_id,
                now_timestamp(),
                pricing::to_f64(pricing::to_decimal(input.opening_balance)),
                SyncMarker::NewLocal.as_str()
            ],
        )?;
        Ok(id)
    })?;

    info!(session_id = %session_id, staff_id, "session opened");
    get_session(conn, &session_id)
}

/// Close a session. The expected balance is the opening float plus cash
/// received, net of change given, on paid orders of the session.
pub fn close_session(conn: &Connection, input: &CloseSession) -> PosResult<Session> {
    if !input.actual_closing_balance.is_finite() {
        return Err(PosError::Validation("closing balance is not valid".into()));
    }

    db::with_transaction(conn, |tx| {
        let session = get_session(tx, &input.session_id)?;
        if session.status != "open" {
            return Err(PosError::Validation(format!(
                "session {} is already closed",
                session.id
            )));
        }

        let cash_in: f64 = tx.query_row(
            "SELECT COALESCE(SUM(COALESCE(amount_received, 0) - COALESCE(amount_returned, 0)), 0)
             FROM local_orders
             WHERE pos_session_id = ?1 AND payment_status = 'paid' AND payment_method = 'cash'
               AND status != 'cancelled'",
            params![session.id],
            |row| row.get(0),
        )?;
        let expected = pricing::round_money(
            pricing::to_decimal(session.opening_balance) + pricing::to_decimal(cash_in),
        );

        tx.execute(
            "UPDATE local_pos_sessions SET
                status = 'closed',
                closed_at = ?1,
                closing_balance = ?2,
                actual_closing_balance = ?3,
                notes = ?4
             WHERE id = ?5",
            params![
                now_timestamp(),
                pricing::to_f64(expected),
                pricing::to_f64(pricing::to_decimal(input.actual_closing_balance)),
                input.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()),
                session.id
            ],
        )?;
        Ok(())
    })?;

    let closed = get_session(conn, &input.session_id)?;
    info!(
        session_id = %closed.id,
        expected = closed.closing_balance,
        counted = closed.actual_closing_balance,
        "session closed"
    );
    Ok(closed)
}

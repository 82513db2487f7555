//! Staff PIN login against the local staff cache.
//!
//! PINs are stored as bcrypt hashes (hashed during the full pull), so a
//! login verifies the candidate against every cached hash. Consecutive
//! failures lock the terminal for a while; the counter lives in
//! `local_config` so a restart does not clear it.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{StaffMember, StaffRole};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const LOCKOUT_ATTEMPTS_KEY: &str = "LOCKOUT_ATTEMPTS";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "LOCKOUT_LAST_ATTEMPT";

// ---------------------------------------------------------------------------
// Lockout
// ---------------------------------------------------------------------------

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

impl LockoutEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_attempt >= Duration::minutes(LOCKOUT_MINUTES)
    }
}

fn load_lockout(conn: &Connection) -> PosResult<LockoutEntry> {
    let attempts = db::get_config(conn, LOCKOUT_ATTEMPTS_KEY)?
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_config(conn, LOCKOUT_LAST_ATTEMPT_KEY)?
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Ok(LockoutEntry {
        attempts,
        last_attempt,
    })
}

fn persist_lockout(conn: &Connection, lockout: &LockoutEntry) -> PosResult<()> {
    db::set_config(conn, LOCKOUT_ATTEMPTS_KEY, &lockout.attempts.to_string())?;
    db::set_config(
        conn,
        LOCKOUT_LAST_ATTEMPT_KEY,
        &lockout.last_attempt.to_rfc3339(),
    )
}

fn check_lockout(lockout: &LockoutEntry, now: DateTime<Utc>) -> PosResult<()> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS && !lockout.expired(now) {
        let elapsed = now - lockout.last_attempt;
        let remaining = (LOCKOUT_MINUTES - elapsed.num_minutes()).max(1);
        return Err(PosError::Validation(format!(
            "Too many failed attempts. Try again in {remaining} minute(s)."
        )));
    }
    Ok(())
}

fn record_failure(conn: &Connection, mut lockout: LockoutEntry, now: DateTime<Utc>) -> PosResult<()> {
    // A lockout that ran out starts a fresh window.
    if lockout.expired(now) {
        lockout.attempts = 0;
    }
    lockout.attempts += 1;
    lockout.last_attempt = now;
    warn!(attempts = lockout.attempts, "failed PIN attempt");
    persist_lockout(conn, &lockout)
}

fn reset_lockout(conn: &Connection) -> PosResult<()> {
    persist_lockout(
        conn,
        &LockoutEntry {
            attempts: 0,
            last_attempt: Utc::now(),
        },
    )
}

// ---------------------------------------------------------------------------
// Staff lookup
// ---------------------------------------------------------------------------

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StaffMember> {
    let role: Option<String> = row.get(3)?;
    Ok(StaffMember {
        id: row.get(0)?,
        store_id: row.get(1)?,
        full_name: row.get(2)?,
        role: StaffRole::parse_lossy(role.as_deref()),
        avatar_url: row.get(4)?,
    })
}

/// Cached staff, without PIN material.
pub fn get_staff_list(conn: &Connection) -> PosResult<Vec<StaffMember>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_id, full_name, role, avatar_url
         FROM local_staff_cache ORDER BY full_name ASC, id ASC",
    )?;
    let rows = stmt.query_map([], member_from_row)?;
    let staff = rows.collect::<Result<_, _>>()?;
    Ok(staff)
}

fn load_candidates(conn: &Connection) -> PosResult<Vec<(StaffMember, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_id, full_name, role, avatar_url, pin_hash
         FROM local_staff_cache
         WHERE pin_hash IS NOT NULL AND pin_hash != ''
         ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| Ok((member_from_row(row)?, row.get(5)?)))?;
    let candidates = rows.collect::<Result<_, _>>()?;
    Ok(candidates)
}

/// Find the staff member whose PIN matches.
///
/// Returns `Ok(None)` for a wrong PIN and an error while the terminal is
/// locked out. The connection is only held to read the lockout state and
/// the cached hashes, and again to record the outcome; the bcrypt checks
/// run unlocked. Slow, so call this from a blocking context.
pub fn check_staff_pin(db: &DbState, pin: &str) -> PosResult<Option<StaffMember>> {
    let now = Utc::now();
    let candidates = {
        let conn = db.lock()?;
        check_lockout(&load_lockout(&conn)?, now)?;
        if pin.trim().is_empty() {
            return Ok(None);
        }
        load_candidates(&conn)?
    };

    let pin = pin.trim();
    let matched = candidates.into_iter().find_map(|(member, hash)| {
        match bcrypt::verify(pin, &hash) {
            Ok(true) => Some(member),
            Ok(false) => None,
            Err(e) => {
                warn!(staff_id = %member.id, "unreadable PIN hash: {e}");
                None
            }
        }
    });

    // Other attempts may have landed while verifying; reload before writing.
    let conn = db.lock()?;
    let lockout = load_lockout(&conn)?;
    match matched {
        Some(member) => {
            if lockout.attempts > 0 {
                reset_lockout(&conn)?;
            }
            info!(staff_id = %member.id, role = member.role.as_str(), "staff login");
            Ok(Some(member))
        }
        None => {
            record_failure(&conn, lockout, now)?;
            Ok(None)
        }
    }
}

/// Whether a staff id belongs to the cache. Used to validate session openers.
pub fn staff_exists(conn: &Connection, staff_id: &str) -> PosResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM local_staff_cache WHERE id = ?1",
        params![staff_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

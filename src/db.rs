//! Local SQLite store for the POS terminal.
//!
//! Uses rusqlite with WAL mode. Provides versioned, additive schema
//! migrations, the `local_config` key/value helpers, and the transaction
//! primitive every multi-row write goes through.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::error::{PosError, PosResult};

/// Shared handle to the single local connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Acquire the connection. Callers must drop the guard before awaiting.
    pub fn lock(&self) -> PosResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| PosError::LockPoisoned)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// File name of the store inside the data directory.
pub const DB_FILE_NAME: &str = "pos_local.db";

// local_config keys
pub const CONFIG_STORE_ID: &str = "STORE_ID";
pub const CONFIG_BRAND_ID: &str = "BRAND_ID";
pub const CONFIG_STORE_NAME: &str = "STORE_NAME";
pub const CONFIG_ORDER_COUNTER: &str = "ORDER_COUNTER";
pub const CONFIG_ORDER_COUNTER_DATE: &str = "ORDER_COUNTER_DATE";
pub const CONFIG_LAST_FULL_PULL: &str = "LAST_FULL_PULL";
pub const CONFIG_LAST_LIVE_PULL: &str = "LAST_LIVE_PULL";

/// Initialize the store at `{data_dir}/pos_local.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On open failure, deletes the file and
/// retries once.
pub fn init(data_dir: &Path) -> PosResult<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| PosError::Config(format!("cannot create data dir: {e}")))?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> PosResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    // Fails on corrupt files, which triggers the delete-and-retry path.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub fn run_migrations(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: mirrored catalog/staff/customer tables and local orders.
fn migrate_v1(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_config (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        -- Locally owned
        CREATE TABLE IF NOT EXISTS local_pos_sessions (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            opened_by TEXT NOT NULL,
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            opening_balance REAL NOT NULL DEFAULT 0,
            closing_balance REAL,
            actual_closing_balance REAL,
            status TEXT NOT NULL DEFAULT 'open' CHECK(status IN ('open','closed')),
            sync_status TEXT NOT NULL DEFAULT 'new_local'
        );

        CREATE TABLE IF NOT EXISTS local_orders (
            id TEXT PRIMARY KEY,
            order_number TEXT,
            store_id TEXT NOT NULL,
            pos_session_id TEXT,
            customer_id TEXT,
            customer_name TEXT,
            customer_phone TEXT,
            delivery_address TEXT,
            order_type TEXT NOT NULL DEFAULT 'dine_in',
            total_amount REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            payment_status TEXT NOT NULL DEFAULT 'pending',
            payment_method TEXT,
            amount_received REAL,
            amount_returned REAL,
            channel TEXT NOT NULL DEFAULT 'pos',
            created_at TEXT NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'new_local'
        );

        CREATE INDEX IF NOT EXISTS idx_local_orders_status ON local_orders(status);
        CREATE INDEX IF NOT EXISTS idx_local_orders_created ON local_orders(created_at);

        CREATE TABLE IF NOT EXISTS local_order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            product_id TEXT,
            product_name TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            unit_price REAL NOT NULL,
            total_price REAL NOT NULL,
            options TEXT,
            FOREIGN KEY (order_id) REFERENCES local_orders(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_local_order_items_order ON local_order_items(order_id);

        -- Mirrored
        CREATE TABLE IF NOT EXISTS local_staff_cache (
            id TEXT PRIMARY KEY,
            store_id TEXT,
            full_name TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL DEFAULT 'staff',
            pin_hash TEXT,
            avatar_url TEXT
        );

        CREATE TABLE IF NOT EXISTS local_categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            image_url TEXT,
            display_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS local_products (
            id TEXT PRIMARY KEY,
            category_id TEXT,
            name TEXT NOT NULL,
            description TEXT,
            price REAL NOT NULL DEFAULT 0,
            image_url TEXT,
            is_available INTEGER NOT NULL DEFAULT 1,
            type TEXT NOT NULL DEFAULT 'simple'
        );

        CREATE INDEX IF NOT EXISTS idx_local_products_category ON local_products(category_id);

        CREATE TABLE IF NOT EXISTS local_product_variations (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            name TEXT NOT NULL,
            price REAL NOT NULL,
            is_available INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (product_id) REFERENCES local_products(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS local_option_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT,
            min_selection INTEGER NOT NULL DEFAULT 0,
            max_selection INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS local_option_items (
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            name TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            is_available INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (group_id) REFERENCES local_option_groups(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS local_product_option_links (
            product_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (product_id, group_id),
            FOREIGN KEY (product_id) REFERENCES local_products(id) ON DELETE CASCADE,
            FOREIGN KEY (group_id) REFERENCES local_option_groups(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS local_customers (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            phone TEXT,
            address TEXT,
            loyalty_points INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'synced'
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        PosError::Store(e)
    })?;

    info!("Applied migration v1 (core tables)");
    Ok(())
}

/// Migration v2: ingredients and the "remove ingredient" join table.
fn migrate_v2(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_ingredients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_available INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS local_product_ingredients (
            product_id TEXT NOT NULL,
            ingredient_id TEXT NOT NULL,
            PRIMARY KEY (product_id, ingredient_id),
            FOREIGN KEY (product_id) REFERENCES local_products(id) ON DELETE CASCADE,
            FOREIGN KEY (ingredient_id) REFERENCES local_ingredients(id) ON DELETE CASCADE
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        PosError::Store(e)
    })?;

    info!("Applied migration v2 (ingredients)");
    Ok(())
}

/// Migration v3: push queue for status/payment mutations, session notes and
/// order update timestamps.
fn migrate_v3(conn: &Connection) -> PosResult<()> {
    add_column_if_missing(conn, "local_pos_sessions", "notes", "TEXT")?;
    add_column_if_missing(conn, "local_orders", "updated_at", "TEXT")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS push_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('status','payment')),
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending','synced','failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 5,
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(order_id, kind)
        );

        CREATE INDEX IF NOT EXISTS idx_push_queue_status ON push_queue(status);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        PosError::Store(e)
    })?;

    info!("Applied migration v3 (push queue)");
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> PosResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `ALTER TABLE ... ADD COLUMN` that treats an existing column as success.
pub fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> PosResult<()> {
    if column_exists(conn, table, column)? {
        return Ok(());
    }
    match conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};")) {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("duplicate column name") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Run `f` inside `BEGIN IMMEDIATE ... COMMIT`. Any error rolls the whole
/// unit back and is returned unchanged.
pub fn with_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> PosResult<T>,
) -> PosResult<T> {
    conn.execute_batch("BEGIN IMMEDIATE")?;

    match f(conn) {
        Ok(value) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = conn.execute_batch("ROLLBACK") {
                warn!("rollback failed: {rb}");
            }
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// local_config helpers
// ---------------------------------------------------------------------------

pub fn get_config(conn: &Connection, key: &str) -> PosResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM local_config WHERE key = ?1",
            params![key],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(value.flatten())
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> PosResult<()> {
    conn.execute(
        "INSERT INTO local_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// In-memory store with the full schema (test helper).
#[cfg(test)]
pub fn test_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

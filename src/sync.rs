//! Sync engine: full pull, live-order pull, best-effort push.
//!
//! Full pull replaces each mirrored table in dependency order, one
//! transaction per table, so foreign-key filtering only ever sees rows
//! committed earlier in the same pull. Live pull upserts active orders one
//! transaction per order. Pushes are attempted inline after a local
//! mutation and retried from the push queue on every loop tick.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{
    Category, Customer, Ingredient, ItemOptions, OptionGroup, OptionItem, OrderStatus, Product,
    ProductIngredient, ProductOptionLink, ProductVariation, RemoteOrder, RemoteStaff, StaffRole,
    StoreScope, SyncMarker, CHANNEL_POS, PAYMENT_PENDING,
};
use crate::push_queue::{self, PushEntry, PushPayload, QueueCounts};
use crate::remote::{self, RemoteDirectory};

/// Max push-queue entries delivered per loop tick.
const PUSH_BATCH_SIZE: usize = 50;

const UNKNOWN_PRODUCT: &str = "Article";

// ---------------------------------------------------------------------------
// Busy guards
// ---------------------------------------------------------------------------

/// Holds an operation's busy flag for the guard's lifetime.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool, what: &'static str) -> PosResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PosError::Busy(what))?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Reports & state
// ---------------------------------------------------------------------------

/// Rows written per entity set by a full pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullPullReport {
    pub categories: usize,
    pub ingredients: usize,
    pub option_groups: usize,
    pub option_items: usize,
    pub products: usize,
    pub variations: usize,
    pub option_links: usize,
    pub product_ingredients: usize,
    pub staff: usize,
    pub customers: usize,
    pub live_orders: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePullReport {
    pub synced: usize,
    /// Locally owned or push-pending orders left untouched.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct SyncState {
    pub loop_running: AtomicBool,
    pub last_full_pull: Mutex<Option<String>>,
    pub last_live_pull: Mutex<Option<String>>,
    pub last_error: Mutex<Option<String>>,
}

impl SyncState {
    fn set(slot: &Mutex<Option<String>>, value: Option<String>) {
        if let Ok(mut guard) = slot.lock() {
            *guard = value;
        }
    }

    fn get(slot: &Mutex<Option<String>>) -> Option<String> {
        slot.lock().ok().and_then(|g| g.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub store_id: String,
    pub brand_id: Option<String>,
    pub store_name: Option<String>,
    pub loop_running: bool,
    pub full_pull_in_progress: bool,
    pub live_pull_in_progress: bool,
    pub last_full_pull: Option<String>,
    pub last_live_pull: Option<String>,
    pub last_error: Option<String>,
    pub push_queue: QueueCounts,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    db: Arc<DbState>,
    remote: Arc<dyn RemoteDirectory>,
    ctx: Arc<SyncContext>,
    request_timeout: Duration,
    pin_hash_cost: u32,
    full_pull_busy: AtomicBool,
    live_pull_busy: AtomicBool,
    push_busy: AtomicBool,
    state: SyncState,
}

impl SyncEngine {
    pub fn new(
        db: Arc<DbState>,
        remote: Arc<dyn RemoteDirectory>,
        ctx: Arc<SyncContext>,
        request_timeout: Duration,
        pin_hash_cost: u32,
    ) -> Self {
        Self {
            db,
            remote,
            ctx,
            request_timeout,
            pin_hash_cost,
            full_pull_busy: AtomicBool::new(false),
            live_pull_busy: AtomicBool::new(false),
            push_busy: AtomicBool::new(false),
            state: SyncState::default(),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    async fn scope(&self) -> PosResult<StoreScope> {
        self.ctx
            .ensure_resolved(&self.db, self.remote.as_ref(), self.request_timeout)
            .await
            .cloned()
    }

    /// Persist a last-pull timestamp. Failure only costs the stamp.
    fn stamp(&self, key: &str, now: &str) {
        let written = self
            .db
            .lock()
            .and_then(|conn| db::set_config(&conn, key, now));
        if let Err(e) = written {
            warn!(key, "failed to record sync timestamp: {e}");
        }
    }

    fn record_error(&self, err: &PosError) {
        SyncState::set(&self.state.last_error, Some(err.to_string()));
    }

    // -----------------------------------------------------------------------
    // Full pull
    // -----------------------------------------------------------------------

    /// Refresh every mirrored table, then pull live orders.
    ///
    /// Aborts at the first failed fetch or transaction; tables replaced
    /// before the failure keep their new content.
    pub async fn full_pull(&self) -> PosResult<FullPullReport> {
        let _guard = BusyGuard::acquire(&self.full_pull_busy, "full pull")?;
        let result = self.run_full_pull().await;
        match &result {
            Ok(report) => {
                let now = Utc::now().to_rfc3339();
                self.stamp(db::CONFIG_LAST_FULL_PULL, &now);
                SyncState::set(&self.state.last_full_pull, Some(now));
                SyncState::set(&self.state.last_error, None);
                info!(?report, "full pull complete");
            }
            Err(e) => {
                warn!("full pull aborted: {e}");
                self.record_error(e);
            }
        }
        result
    }

    async fn run_full_pull(&self) -> PosResult<FullPullReport> {
        let scope = self.scope().await?;
        let brand = scope.brand_id.as_str();
        let timeout = self.request_timeout;
        let remote = self.remote.as_ref();
        let mut report = FullPullReport::default();

        info!(brand_id = %brand, "full pull started");

        let rows = remote::bounded(timeout, remote.fetch_categories(brand)).await?;
        report.categories = self.replace("categories", |tx| replace_categories(tx, &rows))?;

        let rows = remote::bounded(timeout, remote.fetch_ingredients(brand)).await?;
        report.ingredients = self.replace("ingredients", |tx| replace_ingredients(tx, &rows))?;

        let rows = remote::bounded(timeout, remote.fetch_option_groups(brand)).await?;
        report.option_groups =
            self.replace("option groups", |tx| replace_option_groups(tx, &rows))?;

        let rows = remote::bounded(timeout, remote.fetch_option_items(brand)).await?;
        report.option_items = self.replace("option items", |tx| replace_option_items(tx, &rows))?;

        let rows = remote::bounded(timeout, remote.fetch_products(brand)).await?;
        report.products = self.replace("products", |tx| replace_products(tx, &rows))?;

        let rows = remote::bounded(timeout, remote.fetch_variations(brand)).await?;
        report.variations = self.replace("variations", |tx| replace_variations(tx, &rows))?;

        let rows = remote::bounded(timeout, remote.fetch_option_links(brand)).await?;
        report.option_links = self.replace("option links", |tx| replace_option_links(tx, &rows))?;

        let rows = remote::bounded(timeout, remote.fetch_product_ingredients(brand)).await?;
        report.product_ingredients = self.replace("product ingredients", |tx| {
            replace_product_ingredients(tx, &rows)
        })?;

        let store_id = self.ctx.store_id();
        let assigned = remote::bounded(timeout, remote.fetch_staff(store_id)).await?;
        let elevated = remote::bounded(timeout, remote.fetch_elevated_staff()).await?;
        let staff = self
            .prepare_staff(merge_staff(assigned, elevated), store_id)
            .await?;
        report.staff = self.replace("staff", |tx| replace_staff(tx, &staff))?;

        let rows = remote::bounded(timeout, remote.fetch_customers()).await?;
        report.customers = self.replace("customers", |tx| replace_customers(tx, &rows))?;

        report.live_orders = match self.live_pull().await {
            Ok(live) => live.synced,
            Err(e) => {
                warn!("live pull after full pull failed: {e}");
                0
            }
        };

        Ok(report)
    }

    /// Run one replacement step in its own transaction.
    fn replace(
        &self,
        what: &'static str,
        step: impl FnOnce(&Connection) -> PosResult<usize>,
    ) -> PosResult<usize> {
        let conn = self.db.lock()?;
        let written = db::with_transaction(&conn, step).map_err(|e| {
            warn!(entity = what, "replacement rolled back: {e}");
            e
        })?;
        debug!(entity = what, rows = written, "table replaced");
        Ok(written)
    }

    /// Hash PINs off the async runtime. An existing hash that still
    /// verifies is kept so an unchanged remote leaves the table unchanged.
    async fn prepare_staff(
        &self,
        staff: Vec<RemoteStaff>,
        default_store: &str,
    ) -> PosResult<Vec<StaffRow>> {
        let existing: HashMap<String, String> = {
            let conn = self.db.lock()?;
            let mut stmt = conn.prepare(
                "SELECT id, pin_hash FROM local_staff_cache WHERE pin_hash IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let hashes = rows.collect::<Result<_, _>>()?;
            hashes
        };
        let cost = self.pin_hash_cost;
        let default_store = default_store.to_string();

        let rows = tokio::task::spawn_blocking(move || {
            staff
                .into_iter()
                .map(|member| {
                    let pin_hash = member
                        .pos_pin
                        .as_deref()
                        .map(str::trim)
                        .filter(|pin| !pin.is_empty())
                        .and_then(|pin| hash_pin(pin, existing.get(&member.id), cost));
                    StaffRow {
                        store_id: member
                            .store_id
                            .filter(|s| !s.trim().is_empty())
                            .unwrap_or_else(|| default_store.clone()),
                        full_name: member.full_name.unwrap_or_default(),
                        role: StaffRole::parse_lossy(member.role.as_deref()),
                        avatar_url: member.avatar_url,
                        id: member.id,
                        pin_hash,
                    }
                })
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Live pull
    // -----------------------------------------------------------------------

    /// Pull active orders of this store and converge their local copies.
    pub async fn live_pull(&self) -> PosResult<LivePullReport> {
        let _guard = BusyGuard::acquire(&self.live_pull_busy, "live order pull")?;
        let result = self.run_live_pull().await;
        match &result {
            Ok(report) => {
                let now = Utc::now().to_rfc3339();
                self.stamp(db::CONFIG_LAST_LIVE_PULL, &now);
                SyncState::set(&self.state.last_live_pull, Some(now));
                if report.synced > 0 || report.skipped > 0 {
                    info!(
                        synced = report.synced,
                        skipped = report.skipped,
                        "live orders pulled"
                    );
                }
            }
            Err(e) => {
                warn!("live order pull failed: {e}");
                self.record_error(e);
            }
        }
        result
    }

    async fn run_live_pull(&self) -> PosResult<LivePullReport> {
        self.scope().await?;
        let store_id = self.ctx.store_id();
        let orders = remote::bounded(
            self.request_timeout,
            self.remote.fetch_live_orders(store_id, &OrderStatus::ACTIVE),
        )
        .await?;

        let mut report = LivePullReport::default();
        let conn = self.db.lock()?;
        for order in &orders {
            let applied = db::with_transaction(&conn, |tx| upsert_remote_order(tx, order, store_id))?;
            if applied {
                report.synced += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Push a status change that was already applied locally.
    pub async fn push_order_status(&self, entry: &PushEntry) -> bool {
        self.deliver(entry).await.is_ok()
    }

    /// Push a payment that was already applied locally.
    pub async fn push_payment(&self, entry: &PushEntry) -> bool {
        self.deliver(entry).await.is_ok()
    }

    async fn deliver(&self, entry: &PushEntry) -> PosResult<()> {
        self.scope().await.map_err(|e| {
            warn!(order_id = %entry.order_id, "push skipped, context unavailable: {e}");
            e
        })?;

        let call = match &entry.payload {
            PushPayload::Status { status } => {
                remote::bounded(
                    self.request_timeout,
                    self.remote.push_order_status(&entry.order_id, status),
                )
                .await
            }
            PushPayload::Payment {
                method,
                amount_received,
            } => {
                remote::bounded(
                    self.request_timeout,
                    self.remote
                        .push_payment(&entry.order_id, method, *amount_received),
                )
                .await
            }
        };

        let conn = self.db.lock()?;
        match call {
            Ok(()) => {
                db::with_transaction(&conn, |tx| {
                    push_queue::mark_delivered(tx, entry)?;
                    advance_order_marker(tx, &entry.order_id, SyncMarker::Synced)
                })?;
                debug!(order_id = %entry.order_id, kind = entry.payload.kind().as_str(), "push delivered");
                Ok(())
            }
            Err(e) => {
                warn!(
                    order_id = %entry.order_id,
                    kind = entry.payload.kind().as_str(),
                    "push failed, kept for retry: {e}"
                );
                push_queue::record_failure(&conn, entry, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Retry pending pushes. Stops at the first remote failure; per-order
    /// errors (missing remote row, local store) move on to the next entry.
    pub async fn drain_push_queue(&self) -> PosResult<PushReport> {
        let _guard = BusyGuard::acquire(&self.push_busy, "push queue drain")?;
        let entries = {
            let conn = self.db.lock()?;
            push_queue::pending(&conn, PUSH_BATCH_SIZE)?
        };

        let mut report = PushReport::default();
        for entry in &entries {
            match self.deliver(entry).await {
                Ok(()) => report.delivered += 1,
                Err(PosError::Config(msg)) => return Err(PosError::Config(msg)),
                Err(PosError::Remote(_)) | Err(PosError::Timeout(_)) => {
                    report.failed += 1;
                    break;
                }
                Err(_) => report.failed += 1,
            }
        }
        if report.delivered > 0 {
            info!(delivered = report.delivered, failed = report.failed, "push queue drained");
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Status & loop
    // -----------------------------------------------------------------------

    pub fn status(&self) -> PosResult<SyncStatus> {
        let counts = {
            let conn = self.db.lock()?;
            push_queue::counts(&conn)?
        };
        let scope = self.ctx.scope();
        Ok(SyncStatus {
            store_id: self.ctx.store_id().to_string(),
            brand_id: scope.map(|s| s.brand_id.clone()),
            store_name: scope.map(|s| s.store_name.clone()),
            loop_running: self.state.loop_running.load(Ordering::SeqCst),
            full_pull_in_progress: self.full_pull_busy.load(Ordering::SeqCst),
            live_pull_in_progress: self.live_pull_busy.load(Ordering::SeqCst),
            last_full_pull: SyncState::get(&self.state.last_full_pull),
            last_live_pull: SyncState::get(&self.state.last_live_pull),
            last_error: SyncState::get(&self.state.last_error),
            push_queue: counts,
        })
    }

    /// One loop iteration: retry queued pushes, then pull live orders.
    pub async fn tick(&self) {
        match self.drain_push_queue().await {
            Ok(_) => {}
            Err(PosError::Busy(what)) => debug!("{what} still running, tick skipped"),
            Err(e) => warn!("push queue drain failed: {e}"),
        }
        match self.live_pull().await {
            Ok(_) => {}
            Err(PosError::Busy(what)) => debug!("{what} still running, tick skipped"),
            Err(_) => {} // logged by live_pull
        }
    }

    /// Spawn the periodic live-order loop. Overlapping ticks are skipped.
    pub fn start_live_order_loop(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        engine.state.loop_running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            info!("Live order loop started (interval: {}s)", period.as_secs());
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => engine.tick().await,
                }
            }

            engine.state.loop_running.store(false, Ordering::SeqCst);
            info!("Live order loop stopped");
        })
    }
}

// ---------------------------------------------------------------------------
// Replacement steps
// ---------------------------------------------------------------------------

fn local_count(conn: &Connection, table: &str) -> PosResult<i64> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
}

fn replace_categories(conn: &Connection, rows: &[Category]) -> PosResult<usize> {
    if rows.is_empty() && local_count(conn, "local_categories")? > 0 {
        warn!("remote returned no categories; keeping the local menu");
        return Ok(0);
    }
    conn.execute("DELETE FROM local_categories", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_categories (id, name, image_url, display_order)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for c in rows {
        stmt.execute(params![c.id, c.name, c.image_url, c.display_order])?;
    }
    Ok(rows.len())
}

fn replace_ingredients(conn: &Connection, rows: &[Ingredient]) -> PosResult<usize> {
    conn.execute("DELETE FROM local_ingredients", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_ingredients (id, name, is_available) VALUES (?1, ?2, ?3)",
    )?;
    for i in rows {
        stmt.execute(params![i.id, i.name, i.is_available])?;
    }
    Ok(rows.len())
}

fn replace_option_groups(conn: &Connection, rows: &[OptionGroup]) -> PosResult<usize> {
    conn.execute("DELETE FROM local_option_groups", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_option_groups (id, name, type, min_selection, max_selection)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for g in rows {
        stmt.execute(params![
            g.id,
            g.name,
            g.selection_kind,
            g.min_selection.max(0),
            g.max_selection.max(0)
        ])?;
    }
    Ok(rows.len())
}

/// Orphans (group not present locally) are dropped.
fn replace_option_items(conn: &Connection, rows: &[OptionItem]) -> PosResult<usize> {
    conn.execute("DELETE FROM local_option_items", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_option_items (id, group_id, name, price, is_available)
         SELECT ?1, ?2, ?3, ?4, ?5
         WHERE EXISTS (SELECT 1 FROM local_option_groups WHERE id = ?2)",
    )?;
    let mut written = 0;
    for i in rows {
        written += stmt.execute(params![i.id, i.group_id, i.name, i.price, i.is_available])?;
    }
    if written < rows.len() {
        debug!(dropped = rows.len() - written, "orphan option items dropped");
    }
    Ok(written)
}

/// Null or dangling categories fall back to the first local category.
fn replace_products(conn: &Connection, rows: &[Product]) -> PosResult<usize> {
    if rows.is_empty() && local_count(conn, "local_products")? > 0 {
        warn!("remote returned no products; keeping the local menu");
        return Ok(0);
    }

    let known: HashSet<String> = {
        let mut stmt = conn.prepare("SELECT id FROM local_categories")?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let known = ids.collect::<Result<_, _>>()?;
        known
    };
    let fallback: Option<String> = conn
        .query_row(
            "SELECT id FROM local_categories ORDER BY display_order ASC, id ASC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute("DELETE FROM local_products", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_products
            (id, category_id, name, description, price, image_url, is_available, type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for p in rows {
        let category_id = p
            .category_id
            .as_ref()
            .filter(|c| known.contains(*c))
            .cloned()
            .or_else(|| fallback.clone());
        stmt.execute(params![
            p.id,
            category_id,
            p.name,
            p.description,
            p.price,
            p.image_url,
            p.is_available,
            p.kind.as_str()
        ])?;
    }
    Ok(rows.len())
}

fn replace_variations(conn: &Connection, rows: &[ProductVariation]) -> PosResult<usize> {
    conn.execute("DELETE FROM local_product_variations", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_product_variations
            (id, product_id, name, price, is_available, sort_order)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6
         WHERE EXISTS (SELECT 1 FROM local_products WHERE id = ?2)",
    )?;
    let mut written = 0;
    for v in rows {
        written += stmt.execute(params![
            v.id,
            v.product_id,
            v.name,
            v.price,
            v.is_available,
            v.sort_order
        ])?;
    }
    Ok(written)
}

fn replace_option_links(conn: &Connection, rows: &[ProductOptionLink]) -> PosResult<usize> {
    conn.execute("DELETE FROM local_product_option_links", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_product_option_links (product_id, group_id, sort_order)
         SELECT ?1, ?2, ?3
         WHERE EXISTS (SELECT 1 FROM local_products WHERE id = ?1)
           AND EXISTS (SELECT 1 FROM local_option_groups WHERE id = ?2)",
    )?;
    let mut written = 0;
    for l in rows {
        written += stmt.execute(params![l.product_id, l.group_id, l.sort_order])?;
    }
    Ok(written)
}

fn replace_product_ingredients(conn: &Connection, rows: &[ProductIngredient]) -> PosResult<usize> {
    conn.execute("DELETE FROM local_product_ingredients", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_product_ingredients (product_id, ingredient_id)
         SELECT ?1, ?2
         WHERE EXISTS (SELECT 1 FROM local_products WHERE id = ?1)
           AND EXISTS (SELECT 1 FROM local_ingredients WHERE id = ?2)",
    )?;
    let mut written = 0;
    for pi in rows {
        written += stmt.execute(params![pi.product_id, pi.ingredient_id])?;
    }
    Ok(written)
}

/// Staff row ready for the local cache.
#[derive(Debug, Clone)]
struct StaffRow {
    id: String,
    store_id: String,
    full_name: String,
    role: StaffRole,
    pin_hash: Option<String>,
    avatar_url: Option<String>,
}

/// Store staff first, then elevated staff not already present.
fn merge_staff(assigned: Vec<RemoteStaff>, elevated: Vec<RemoteStaff>) -> Vec<RemoteStaff> {
    let mut seen = HashSet::new();
    assigned
        .into_iter()
        .chain(elevated)
        .filter(|s| seen.insert(s.id.clone()))
        .collect()
}

fn hash_pin(pin: &str, existing: Option<&String>, cost: u32) -> Option<String> {
    if let Some(hash) = existing {
        if bcrypt::verify(pin, hash).unwrap_or(false) {
            return Some(hash.clone());
        }
    }
    match bcrypt::hash(pin, cost) {
        Ok(hash) => Some(hash),
        Err(e) => {
            warn!("failed to hash staff pin: {e}");
            None
        }
    }
}

fn replace_staff(conn: &Connection, rows: &[StaffRow]) -> PosResult<usize> {
    conn.execute("DELETE FROM local_staff_cache", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_staff_cache
            (id, store_id, full_name, role, pin_hash, avatar_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for s in rows {
        stmt.execute(params![
            s.id,
            s.store_id,
            s.full_name,
            s.role.as_str(),
            s.pin_hash,
            s.avatar_url
        ])?;
    }
    Ok(rows.len())
}

/// Locally created customers (`new_local`) survive the replacement.
fn replace_customers(conn: &Connection, rows: &[Customer]) -> PosResult<usize> {
    conn.execute(
        "DELETE FROM local_customers WHERE sync_status = ?1",
        params![SyncMarker::Synced.as_str()],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO local_customers (id, full_name, phone, address, loyalty_points, sync_status)
         VALUES (?1, ?2, ?3, ?4, ?5, 'synced')
         ON CONFLICT(id) DO UPDATE SET
            full_name = excluded.full_name,
            phone = excluded.phone,
            address = excluded.address,
            loyalty_points = excluded.loyalty_points,
            sync_status = 'synced'",
    )?;
    for c in rows {
        stmt.execute(params![
            c.id,
            c.full_name,
            c.phone,
            c.address,
            c.loyalty_points
        ])?;
    }
    Ok(rows.len())
}

// ---------------------------------------------------------------------------
// Live order helpers
// ---------------------------------------------------------------------------

/// Upsert one remote order and replace its items.
///
/// Returns `false` (and writes nothing) when the local row is locally owned
/// and not yet synced, or has a push waiting: local state wins until pushed.
fn upsert_remote_order(conn: &Connection, order: &RemoteOrder, store_id: &str) -> PosResult<bool> {
    let local_marker: Option<String> = conn
        .query_row(
            "SELECT sync_status FROM local_orders WHERE id = ?1",
            params![order.id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(marker) = local_marker.as_deref() {
        if marker != SyncMarker::Synced.as_str() {
            debug!(order_id = %order.id, marker, "local order not yet pushed, skipping");
            return Ok(false);
        }
    }
    if push_queue::has_pending(conn, &order.id)? {
        debug!(order_id = %order.id, "push pending, skipping remote copy");
        return Ok(false);
    }

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO local_orders (
            id, order_number, store_id, customer_id, customer_name, customer_phone,
            delivery_address, order_type, total_amount, status, payment_status,
            payment_method, channel, created_at, sync_status, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'synced', ?15)
         ON CONFLICT(id) DO UPDATE SET
            order_number = excluded.order_number,
            store_id = excluded.store_id,
            customer_id = excluded.customer_id,
            customer_name = excluded.customer_name,
            customer_phone = excluded.customer_phone,
            delivery_address = excluded.delivery_address,
            order_type = excluded.order_type,
            total_amount = excluded.total_amount,
            status = excluded.status,
            payment_status = excluded.payment_status,
            payment_method = excluded.payment_method,
            channel = excluded.channel,
            created_at = excluded.created_at,
            sync_status = 'synced',
            updated_at = excluded.updated_at",
        params![
            order.id,
            order.order_number,
            order
                .store_id
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(store_id),
            order.customer_id,
            order.customer_name,
            order.customer_phone,
            order.delivery_address,
            order.order_type.as_deref().unwrap_or("dine_in"),
            order.total_amount,
            order.status,
            order.payment_status.as_deref().unwrap_or(PAYMENT_PENDING),
            order.payment_method,
            order.channel.as_deref().unwrap_or(CHANNEL_POS),
            order.created_at.as_deref().unwrap_or(now.as_str()),
            now,
        ],
    )?;

    conn.execute(
        "DELETE FROM local_order_items WHERE order_id = ?1",
        params![order.id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO local_order_items
            (id, order_id, product_id, product_name, quantity, unit_price, total_price, options)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for item in &order.order_items {
        if item.quantity <= 0 {
            warn!(order_id = %order.id, item_id = %item.id, "remote item without quantity skipped");
            continue;
        }
        let options = ItemOptions::from_value(&item.options).unwrap_or_else(|e| {
            warn!(order_id = %order.id, item_id = %item.id, "unreadable item options: {e}");
            ItemOptions::default()
        });
        stmt.execute(params![
            item.id,
            order.id,
            item.product_id,
            item.product_name.as_deref().unwrap_or(UNKNOWN_PRODUCT),
            item.quantity,
            item.unit_price,
            item.total_price,
            serde_json::to_string(&options)?,
        ])?;
    }
    Ok(true)
}

/// Move an order's marker forward; never backwards.
pub(crate) fn advance_order_marker(
    conn: &Connection,
    order_id: &str,
    to: SyncMarker,
) -> PosResult<()> {
    let current: Option<String> = conn
        .query_row(
            "SELECT sync_status FROM local_orders WHERE id = ?1",
            params![order_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Ok(());
    };
    let current: SyncMarker = current.parse().unwrap_or(SyncMarker::NewLocal);
    let next = current.advance(to);
    if next != current {
        conn.execute(
            "UPDATE local_orders SET sync_status = ?1 WHERE id = ?2",
            params![next.as_str(), order_id],
        )?;
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::RemoteOrderItem;
    use crate::remote::fake::{FakeData, FakeDirectory};
    use serde_json::json;

    pub(crate) const STORE: &str = "store-1";

    pub(crate) fn catalog() -> FakeData {
        FakeData {
            scope: Some(StoreScope {
                brand_id: "brand-1".into(),
                store_name: "Centre".into(),
            }),
            categories: vec![
                Category {
                    id: "cat-pizza".into(),
                    name: "Pizzas".into(),
                    image_url: None,
                    display_order: 1,
                },
                Category {
                    id: "cat-drinks".into(),
                    name: "Drinks".into(),
                    image_url: None,
                    display_order: 2,
                },
            ],
            ingredients: vec![
                Ingredient {
                    id: "ing-onion".into(),
                    name: "Onion".into(),
                    is_available: true,
                },
                Ingredient {
                    id: "ing-basil".into(),
                    name: "Basil".into(),
                    is_available: true,
                },
            ],
            option_groups: vec![
                OptionGroup {
                    id: "grp-size".into(),
                    name: "Size".into(),
                    selection_kind: Some("single".into()),
                    min_selection: 1,
                    max_selection: 1,
                },
                OptionGroup {
                    id: "grp-extras".into(),
                    name: "Extras".into(),
                    selection_kind: Some("multiple".into()),
                    min_selection: 0,
                    max_selection: 0,
                },
            ],
            option_items: vec![
                OptionItem {
                    id: "opt-large".into(),
                    group_id: "grp-size".into(),
                    name: "Large".into(),
                    price: 10.0,
                    is_available: true,
                },
                OptionItem {
                    id: "opt-cheese".into(),
                    group_id: "grp-extras".into(),
                    name: "Cheese".into(),
                    price: 1.5,
                    is_available: true,
                },
                OptionItem {
                    id: "opt-bacon".into(),
                    group_id: "grp-extras".into(),
                    name: "Bacon".into(),
                    price: 2.25,
                    is_available: true,
                },
                OptionItem {
                    id: "opt-orphan".into(),
                    group_id: "grp-missing".into(),
                    name: "Ghost".into(),
                    price: 3.0,
                    is_available: true,
                },
            ],
            products: vec![
                Product {
                    id: "prod-pizza".into(),
                    category_id: Some("cat-pizza".into()),
                    name: "Pizza".into(),
                    description: Some("Wood fired".into()),
                    price: 0.0,
                    image_url: None,
                    is_available: true,
                    kind: crate::models::ProductKind::Variable,
                },
                Product {
                    id: "prod-cola".into(),
                    category_id: Some("cat-drinks".into()),
                    name: "Cola".into(),
                    description: None,
                    price: 2.5,
                    image_url: None,
                    is_available: true,
                    kind: crate::models::ProductKind::Simple,
                },
                Product {
                    id: "prod-lost".into(),
                    category_id: Some("cat-gone".into()),
                    name: "Mystery".into(),
                    description: None,
                    price: 4.0,
                    image_url: None,
                    is_available: true,
                    kind: crate::models::ProductKind::Simple,
                },
            ],
            variations: vec![
                ProductVariation {
                    id: "var-family".into(),
                    product_id: "prod-pizza".into(),
                    name: "Family".into(),
                    price: 45.0,
                    is_available: true,
                    sort_order: 1,
                },
                ProductVariation {
                    id: "var-orphan".into(),
                    product_id: "prod-missing".into(),
                    name: "Nope".into(),
                    price: 1.0,
                    is_available: true,
                    sort_order: 2,
                },
            ],
            option_links: vec![
                ProductOptionLink {
                    product_id: "prod-pizza".into(),
                    group_id: "grp-size".into(),
                    sort_order: 1,
                },
                ProductOptionLink {
                    product_id: "prod-pizza".into(),
                    group_id: "grp-extras".into(),
                    sort_order: 2,
                },
                ProductOptionLink {
                    product_id: "prod-missing".into(),
                    group_id: "grp-size".into(),
                    sort_order: 1,
                },
            ],
            product_ingredients: vec![
                ProductIngredient {
                    product_id: "prod-pizza".into(),
                    ingredient_id: "ing-onion".into(),
                },
                ProductIngredient {
                    product_id: "prod-pizza".into(),
                    ingredient_id: "ing-basil".into(),
                },
            ],
            staff: vec![RemoteStaff {
                id: "s1".into(),
                store_id: None,
                full_name: Some("Amal".into()),
                role: Some("cashier".into()),
                pos_pin: Some("123456".into()),
                avatar_url: None,
            }],
            elevated_staff: vec![
                RemoteStaff {
                    id: "s1".into(),
                    store_id: Some("store-9".into()),
                    full_name: Some("Amal (dup)".into()),
                    role: Some("admin".into()),
                    pos_pin: Some("123456".into()),
                    avatar_url: None,
                },
                RemoteStaff {
                    id: "boss".into(),
                    store_id: Some("store-9".into()),
                    full_name: Some("Head Office".into()),
                    role: Some("super_admin".into()),
                    pos_pin: Some("999999".into()),
                    avatar_url: None,
                },
            ],
            customers: vec![Customer {
                id: "cust-1".into(),
                full_name: "Yasmine".into(),
                phone: Some("0600000000".into()),
                address: Some("1 Main St".into()),
                loyalty_points: 12,
            }],
            live_orders: Vec::new(),
        }
    }

    pub(crate) fn engine_with(
        remote: Arc<FakeDirectory>,
    ) -> (Arc<SyncEngine>, Arc<DbState>) {
        let db = Arc::new(db::test_state());
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&db),
            remote,
            Arc::new(SyncContext::new(STORE)),
            Duration::from_secs(5),
            4,
        ));
        (engine, db)
    }

    pub(crate) fn remote_order(id: &str, status: &str, items: &[(&str, i64, f64)]) -> RemoteOrder {
        RemoteOrder {
            id: id.into(),
            order_number: Some("42".into()),
            store_id: Some(STORE.into()),
            customer_id: None,
            customer_name: Some("Web client".into()),
            customer_phone: None,
            delivery_address: None,
            order_type: Some("delivery".into()),
            total_amount: items.iter().map(|(_, q, p)| *q as f64 * p).sum(),
            status: status.into(),
            payment_status: Some("pending".into()),
            payment_method: None,
            channel: Some("web".into()),
            created_at: Some("2026-10-18T10:00:00Z".into()),
            order_items: items
                .iter()
                .map(|(item_id, qty, price)| RemoteOrderItem {
                    id: (*item_id).into(),
                    product_id: Some("prod-cola".into()),
                    product_name: Some("Cola".into()),
                    quantity: *qty,
                    unit_price: *price,
                    total_price: *qty as f64 * price,
                    options: json!("{\"note\":\"no ice\"}"),
                })
                .collect(),
        }
    }

    /// Every mirrored table as text, for byte-level comparisons.
    fn dump_mirror(db: &DbState) -> Vec<String> {
        let conn = db.lock().expect("lock");
        let mut out = Vec::new();
        for (table, order) in [
            ("local_categories", "id"),
            ("local_ingredients", "id"),
            ("local_option_groups", "id"),
            ("local_option_items", "id"),
            ("local_products", "id"),
            ("local_product_variations", "id"),
            ("local_product_option_links", "product_id, group_id"),
            ("local_product_ingredients", "product_id, ingredient_id"),
            ("local_staff_cache", "id"),
            ("local_customers", "id"),
        ] {
            let mut stmt = conn
                .prepare(&format!("SELECT * FROM {table} ORDER BY {order}"))
                .expect("prepare dump");
            let cols = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    let mut fields = Vec::with_capacity(cols);
                    for i in 0..cols {
                        let v: rusqlite::types::Value = row.get(i)?;
                        fields.push(format!("{v:?}"));
                    }
                    Ok(format!("{table}|{}", fields.join("|")))
                })
                .expect("query dump");
            out.extend(rows.map(|r| r.expect("row")));
        }
        out
    }

    fn count(db: &DbState, sql: &str) -> i64 {
        let conn = db.lock().expect("lock");
        conn.query_row(sql, [], |r| r.get(0)).expect("count")
    }

    #[tokio::test]
    async fn full_pull_is_idempotent() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(Arc::clone(&remote));

        let first = engine.full_pull().await.expect("first pull");
        let snapshot = dump_mirror(&db);
        let second = engine.full_pull().await.expect("second pull");

        assert_eq!(first, second);
        assert_eq!(snapshot, dump_mirror(&db));
        assert_eq!(first.categories, 2);
        assert_eq!(first.staff, 2);
    }

    #[tokio::test]
    async fn full_pull_drops_orphans() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(remote);
        let report = engine.full_pull().await.expect("pull");

        assert_eq!(report.option_items, 3);
        assert_eq!(report.variations, 1);
        assert_eq!(report.option_links, 2);
        for sql in [
            "SELECT COUNT(*) FROM local_product_variations v
             WHERE NOT EXISTS (SELECT 1 FROM local_products p WHERE p.id = v.product_id)",
            "SELECT COUNT(*) FROM local_option_items i
             WHERE NOT EXISTS (SELECT 1 FROM local_option_groups g WHERE g.id = i.group_id)",
            "SELECT COUNT(*) FROM local_product_option_links l
             WHERE NOT EXISTS (SELECT 1 FROM local_products p WHERE p.id = l.product_id)",
        ] {
            assert_eq!(count(&db, sql), 0, "orphans left by: {sql}");
        }
    }

    #[tokio::test]
    async fn dangling_category_falls_back_to_first_category() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(remote);
        engine.full_pull().await.expect("pull");

        let conn = db.lock().expect("lock");
        let category: Option<String> = conn
            .query_row(
                "SELECT category_id FROM local_products WHERE id = 'prod-lost'",
                [],
                |r| r.get(0),
            )
            .expect("product");
        assert_eq!(category.as_deref(), Some("cat-pizza"));
    }

    #[tokio::test]
    async fn staff_merge_dedups_and_hashes_pins() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(remote);
        engine.full_pull().await.expect("pull");

        let conn = db.lock().expect("lock");
        let (store_id, role, hash): (String, String, String) = conn
            .query_row(
                "SELECT store_id, role, pin_hash FROM local_staff_cache WHERE id = 's1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .expect("s1");
        assert_eq!(store_id, STORE);
        assert_eq!(role, "cashier");
        assert_ne!(hash, "123456");
        assert!(bcrypt::verify("123456", &hash).expect("verify"));
    }

    #[tokio::test]
    async fn failed_fetch_aborts_remaining_steps() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        remote.fail("products");
        let (engine, db) = engine_with(Arc::clone(&remote));

        let err = engine.full_pull().await.expect_err("must abort");
        assert!(matches!(err, PosError::Remote(_)));
        assert_eq!(count(&db, "SELECT COUNT(*) FROM local_categories"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM local_products"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM local_staff_cache"), 0);
        assert!(engine.status().expect("status").last_error.is_some());
    }

    #[tokio::test]
    async fn full_pull_requires_store() {
        let remote: Arc<dyn RemoteDirectory> = Arc::new(FakeDirectory::with_data(catalog()));
        let engine = SyncEngine::new(
            Arc::new(db::test_state()),
            remote,
            Arc::new(SyncContext::new("")),
            Duration::from_secs(5),
            4,
        );
        let err = engine.full_pull().await.expect_err("no store");
        assert!(matches!(err, PosError::Config(_)));
        let err = engine.live_pull().await.expect_err("no store");
        assert!(matches!(err, PosError::Config(_)));
    }

    #[tokio::test]
    async fn local_customers_survive_full_pull() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(remote);
        {
            let conn = db.lock().expect("lock");
            conn.execute(
                "INSERT INTO local_customers (id, full_name, phone, sync_status)
                 VALUES ('local-c', 'Walk-in', '0700', 'new_local')",
                [],
            )
            .expect("insert");
        }
        engine.full_pull().await.expect("pull");
        assert_eq!(count(&db, "SELECT COUNT(*) FROM local_customers"), 2);
    }

    #[tokio::test]
    async fn empty_remote_menu_keeps_local_catalog() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(Arc::clone(&remote));
        engine.full_pull().await.expect("pull");

        remote.update(|d| {
            d.categories.clear();
            d.products.clear();
        });
        engine.full_pull().await.expect("second pull");
        assert_eq!(count(&db, "SELECT COUNT(*) FROM local_categories"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM local_products"), 3);
    }

    #[tokio::test]
    async fn live_pull_converges_after_item_removal() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        remote.update(|d| {
            d.live_orders = vec![
                remote_order("web-1", "preparing", &[("i1", 2, 2.5), ("i2", 1, 3.0)]),
                remote_order("web-2", "delivered", &[("i3", 1, 2.5)]),
            ]
        });
        let (engine, db) = engine_with(Arc::clone(&remote));

        let report = engine.live_pull().await.expect("pull");
        assert_eq!(report.synced, 1);
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM local_order_items WHERE order_id = 'web-1'"),
            2
        );

        remote.update(|d| d.live_orders[0] = remote_order("web-1", "ready", &[("i1", 2, 2.5)]));
        engine.live_pull().await.expect("second pull");

        let conn = db.lock().expect("lock");
        let ids: Vec<String> = conn
            .prepare("SELECT id FROM local_order_items WHERE order_id = 'web-1' ORDER BY id")
            .expect("prepare")
            .query_map([], |r| r.get(0))
            .expect("query")
            .map(|r| r.expect("row"))
            .collect();
        assert_eq!(ids, vec!["i1".to_string()]);
        let (status, marker): (String, String) = conn
            .query_row(
                "SELECT status, sync_status FROM local_orders WHERE id = 'web-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("order");
        assert_eq!(status, "ready");
        assert_eq!(marker, "synced");
        let options: String = conn
            .query_row("SELECT options FROM local_order_items WHERE id = 'i1'", [], |r| {
                r.get(0)
            })
            .expect("options");
        let parsed: ItemOptions = serde_json::from_str(&options).expect("typed options");
        assert_eq!(parsed.note.as_deref(), Some("no ice"));
    }

    #[tokio::test]
    async fn orders_leaving_the_active_set_keep_their_last_local_copy() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        remote.update(|d| d.live_orders = vec![remote_order("web-1", "preparing", &[("i1", 1, 2.5)])]);
        let (engine, db) = engine_with(Arc::clone(&remote));
        engine.live_pull().await.expect("pull");

        // Delivered remotely: no longer part of the active set.
        remote.update(|d| d.live_orders[0] = remote_order("web-1", "delivered", &[("i1", 1, 2.5)]));
        let report = engine.live_pull().await.expect("second pull");
        assert_eq!((report.synced, report.skipped), (0, 0));

        let status: String = db
            .lock()
            .expect("lock")
            .query_row("SELECT status FROM local_orders WHERE id = 'web-1'", [], |r| r.get(0))
            .expect("order");
        assert_eq!(status, "preparing");
    }

    #[tokio::test]
    async fn failed_timestamp_write_does_not_fail_the_pull() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        remote.update(|d| d.live_orders = vec![remote_order("web-1", "ready", &[("i1", 1, 2.5)])]);
        let (engine, db) = engine_with(Arc::clone(&remote));
        db.lock()
            .expect("lock")
            .execute_batch(
                "CREATE TRIGGER no_live_stamp BEFORE INSERT ON local_config
                 WHEN NEW.key = 'LAST_LIVE_PULL'
                 BEGIN SELECT RAISE(ABORT, 'read-only key'); END;",
            )
            .expect("trigger");

        let report = engine.live_pull().await.expect("pull");
        assert_eq!(report.synced, 1);
        assert!(engine.status().expect("status").last_live_pull.is_some());
        let stored = db::get_config(&db.lock().expect("lock"), db::CONFIG_LAST_LIVE_PULL)
            .expect("config");
        assert_eq!(stored, None);
    }

    #[tokio::test]
    async fn live_pull_errors_are_reported_not_raised() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, _db) = engine_with(Arc::clone(&remote));
        engine.live_pull().await.expect("resolve context online");

        remote.set_offline(true);
        let err = engine.live_pull().await.expect_err("offline");
        assert!(matches!(err, PosError::Remote(_)));
        // The loop keeps ticking after a failure.
        engine.tick().await;
    }

    #[tokio::test]
    async fn overlapping_live_pulls_are_rejected() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        remote.set_live_delay(Duration::from_millis(200));
        let (engine, _db) = engine_with(Arc::clone(&remote));

        let (a, b) = tokio::join!(engine.live_pull(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            engine.live_pull().await
        });
        assert!(a.is_ok());
        assert!(matches!(b, Err(PosError::Busy(_))));
        assert_eq!(
            remote
                .live_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        remote.set_live_delay(Duration::from_secs(2));
        let db = Arc::new(db::test_state());
        let engine = SyncEngine::new(
            db,
            remote,
            Arc::new(SyncContext::new(STORE)),
            Duration::from_millis(100),
            4,
        );
        let err = engine.live_pull().await.expect_err("timeout");
        assert!(matches!(err, PosError::Timeout(d) if d == Duration::from_millis(100)));
        assert_eq!(err.to_string(), "Remote call timed out after 100ms");
    }

    #[tokio::test]
    async fn loop_stops_on_cancel() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, _db) = engine_with(Arc::clone(&remote));
        let cancel = CancellationToken::new();
        let handle = engine.start_live_order_loop(Duration::from_secs(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.status().expect("status").loop_running);
        cancel.cancel();
        handle.await.expect("join");
        assert!(!engine.status().expect("status").loop_running);
        assert!(remote.live_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn queued_push_is_retried_and_advances_marker() {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(Arc::clone(&remote));
        engine.live_pull().await.expect("resolve");

        let entry = {
            let conn = db.lock().expect("lock");
            conn.execute(
                "INSERT INTO local_orders (id, store_id, total_amount, created_at, sync_status)
                 VALUES ('o1', 'store-1', 10, datetime('now'), 'pending')",
                [],
            )
            .expect("order");
            push_queue::enqueue(
                &conn,
                "o1",
                &PushPayload::Status {
                    status: "ready".into(),
                },
            )
            .expect("enqueue")
        };

        remote.set_offline(true);
        assert!(!engine.push_order_status(&entry).await);
        remote.set_offline(false);

        let report = engine.drain_push_queue().await.expect("drain");
        assert_eq!(report.delivered, 1);
        assert_eq!(remote.pushes(), vec![("o1".to_string(), "status:ready".to_string())]);
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM local_orders WHERE id = 'o1' AND sync_status = 'synced'"),
            1
        );
    }
}

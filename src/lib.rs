//! Local POS - offline-first terminal core.
//!
//! A SQLite mirror of the store's catalog, staff and customers, an order
//! service that works without connectivity, and a sync engine that pulls
//! from and pushes to the remote directory. [`commands::PosCommands`] is
//! the surface the UI layer calls.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod context;
pub mod customers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod menu;
pub mod models;
pub mod orders;
pub mod pricing;
pub mod push_queue;
pub mod remote;
pub mod sessions;
pub mod storage;
pub mod sync;

pub use commands::PosCommands;
pub use config::TerminalConfig;
pub use error::{PosError, PosResult};
pub use sync::SyncEngine;

/// Initialize structured logging: console plus a daily rolling file under
/// `<data_dir>/logs`. Logs are flushed when the returned guard drops.
pub fn init_logging(data_dir: &Path) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,local_pos=debug"));

    let log_dir = diagnostics::log_dir(data_dir);
    std::fs::create_dir_all(&log_dir).ok();
    let pruned = diagnostics::prune_old_logs(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if pruned > 0 {
        info!(pruned, "old log files removed");
    }
    guard
}

/// Wire the local store, sync engine and command surface together.
pub struct Terminal {
    pub db: Arc<db::DbState>,
    pub engine: Arc<SyncEngine>,
    pub commands: PosCommands,
}

impl Terminal {
    pub fn open(cfg: &TerminalConfig) -> anyhow::Result<Self> {
        let db = Arc::new(db::init(&cfg.data_dir)?);
        let ctx = Arc::new(context::SyncContext::from_local_cache(&cfg.store_id, &db)?);
        let remote = Arc::new(api::SupabaseDirectory::new(
            &cfg.supabase_url,
            &cfg.anon_key,
            cfg.request_timeout,
        )?);
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&db),
            remote,
            ctx,
            cfg.request_timeout,
            cfg.pin_hash_cost,
        ));
        let commands = PosCommands::new(Arc::clone(&db), Arc::clone(&engine));
        Ok(Self {
            db,
            engine,
            commands,
        })
    }
}

/// Run the terminal core until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let cfg = TerminalConfig::load();
    let _log_guard = init_logging(&cfg.data_dir);

    let about = diagnostics::about();
    info!(
        git_sha = about.git_sha,
        platform = about.platform,
        "Starting Local POS v{}",
        about.version
    );
    info!(config = ?cfg, "configuration resolved");

    if cfg.has_remote() && !cfg.store_id.is_empty() && !storage::is_configured() {
        if let Err(e) =
            storage::store_terminal_credentials(&cfg.supabase_url, &cfg.anon_key, &cfg.store_id)
        {
            warn!("could not persist terminal credentials: {e}");
        }
    }

    let terminal = Terminal::open(&cfg)?;
    if !terminal.engine.context().is_configured() {
        warn!("no store id configured; sync stays idle until onboarding");
    } else if !cfg.has_remote() {
        warn!("remote directory not configured; running offline");
    } else {
        let result = terminal.commands.sync_full_pull().await;
        if result.success {
            info!(live_orders = ?result.count, "initial full pull complete");
        } else {
            warn!(
                error = result.error.as_deref().unwrap_or_default(),
                "initial full pull failed; serving the local mirror"
            );
        }
    }

    let cancel = CancellationToken::new();
    let live_loop = terminal
        .engine
        .start_live_order_loop(cfg.sync_interval, cancel.clone());

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();
    if let Err(e) = live_loop.await {
        warn!("live order loop ended abnormally: {e}");
    }
    Ok(())
}

/// Forget the stored onboarding credentials.
pub fn reset_credentials() -> anyhow::Result<()> {
    Ok(storage::clear_terminal_credentials()?)
}

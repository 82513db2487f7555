//! Store scope resolution for the sync engine.
//!
//! One `SyncContext` is built at startup and shared by handle. The
//! store -> brand lookup runs at most once per process; its result is
//! written to `local_config` so the next start can skip the round trip.

use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::StoreScope;
use crate::remote::{self, RemoteDirectory};

#[derive(Debug)]
pub struct SyncContext {
    store_id: String,
    scope: OnceCell<StoreScope>,
}

impl SyncContext {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into().trim().to_string(),
            scope: OnceCell::new(),
        }
    }

    /// Build a context seeded from `local_config`.
    ///
    /// An empty `store_id` falls back to the cached `STORE_ID`. The cached
    /// brand is reused only when it was resolved for the same store.
    pub fn from_local_cache(store_id: &str, db: &DbState) -> PosResult<Self> {
        let conn = db.lock()?;
        let cached_store = db::get_config(&conn, db::CONFIG_STORE_ID)?;
        let store_id = match store_id.trim() {
            "" => cached_store.clone().unwrap_or_default(),
            configured => configured.to_string(),
        };

        let ctx = Self::new(store_id);
        if cached_store.as_deref() == Some(ctx.store_id.as_str()) && !ctx.store_id.is_empty() {
            let brand = db::get_config(&conn, db::CONFIG_BRAND_ID)?;
            let name = db::get_config(&conn, db::CONFIG_STORE_NAME)?;
            if let Some(brand_id) = brand.filter(|b| !b.is_empty()) {
                let _ = ctx.scope.set(StoreScope {
                    brand_id,
                    store_name: name.unwrap_or_default(),
                });
                info!(store_id = %ctx.store_id, "sync context restored from local cache");
            }
        }
        Ok(ctx)
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn is_configured(&self) -> bool {
        !self.store_id.is_empty()
    }

    /// The resolved scope, if resolution already happened.
    pub fn scope(&self) -> Option<&StoreScope> {
        self.scope.get()
    }

    /// Resolve store -> brand once. Every sync entry point calls this first.
    pub async fn ensure_resolved(
        &self,
        db: &DbState,
        remote: &dyn RemoteDirectory,
        timeout: Duration,
    ) -> PosResult<&StoreScope> {
        if !self.is_configured() {
            return Err(PosError::Config("STORE_ID is not set".into()));
        }

        self.scope
            .get_or_try_init(|| async {
                let scope =
                    remote::bounded(timeout, remote.resolve_store_context(&self.store_id))
                        .await
                        .map_err(|e| {
                            warn!(store_id = %self.store_id, "store resolution failed: {e}");
                            match e {
                                PosError::Remote(_) | PosError::Timeout(_) => e,
                                other => PosError::Config(format!(
                                    "store {} could not be resolved: {other}",
                                    self.store_id
                                )),
                            }
                        })?;

                let conn = db.lock()?;
                db::with_transaction(&conn, |tx| {
                    db::set_config(tx, db::CONFIG_STORE_ID, &self.store_id)?;
                    db::set_config(tx, db::CONFIG_BRAND_ID, &scope.brand_id)?;
                    db::set_config(tx, db::CONFIG_STORE_NAME, &scope.store_name)
                })?;

                info!(
                    store_id = %self.store_id,
                    brand_id = %scope.brand_id,
                    store_name = %scope.store_name,
                    "sync context initialised"
                );
                Ok(scope)
            })
            .await
    }
}

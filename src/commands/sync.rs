use tracing::warn;

use super::{PosCommands, SyncResult};
use crate::sync::SyncStatus;

impl PosCommands {
    /// Refresh the whole local mirror. `count` is the number of live orders
    /// pulled at the end.
    pub async fn sync_full_pull(&self) -> SyncResult {
        match self.engine.full_pull().await {
            Ok(report) => SyncResult::ok(Some(report.live_orders)),
            Err(e) => {
                warn!("sync_full_pull failed: {e}");
                SyncResult::failed(e)
            }
        }
    }

    pub async fn sync_live_orders(&self) -> SyncResult {
        match self.engine.live_pull().await {
            Ok(report) => SyncResult::ok(Some(report.synced)),
            Err(e) => SyncResult::failed(e),
        }
    }

    pub fn get_sync_status(&self) -> Result<SyncStatus, String> {
        self.engine.status().map_err(|e| e.to_string())
    }
}

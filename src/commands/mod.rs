//! Command surface consumed by the UI layer.
//!
//! Every command returns a serializable value; failures come back as
//! `Err(message)` or a `{success: false, error}` result, never as a panic.
//! One file per area, each adding an `impl PosCommands` block.

use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;

use crate::db::DbState;
use crate::error::PosResult;
use crate::sync::SyncEngine;

pub mod customers;
pub mod menu;
pub mod orders;
pub mod sessions;
pub mod staff;
pub mod sync;

pub struct PosCommands {
    db: Arc<DbState>,
    engine: Arc<SyncEngine>,
}

impl PosCommands {
    pub fn new(db: Arc<DbState>, engine: Arc<SyncEngine>) -> Self {
        Self { db, engine }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Run `f` under the connection lock, flattening errors to strings.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> PosResult<T>) -> Result<T, String> {
        let conn = self.db.lock().map_err(|e| e.to_string())?;
        f(&conn).map_err(|e| e.to_string())
    }
}

/// `{success, count?, error?}` as returned by the sync commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn ok(count: Option<usize>) -> Self {
        Self {
            success: true,
            count,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            count: None,
            error: Some(error.to_string()),
        }
    }
}

/// `{success, orderId?, orderNumber?, error?}` as returned by `create_order`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::remote::fake::FakeDirectory;
    use crate::sync::tests::{catalog, engine_with};

    pub(crate) async fn seeded_commands() -> (PosCommands, Arc<FakeDirectory>) {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(Arc::clone(&remote));
        let commands = PosCommands::new(db, engine);
        let result = commands.sync_full_pull().await;
        assert!(result.success, "seed pull failed: {:?}", result.error);
        (commands, remote)
    }

    #[test]
    fn results_serialize_in_camel_case() {
        let json = serde_json::to_value(SyncResult::ok(Some(3))).expect("json");
        assert_eq!(json, serde_json::json!({"success": true, "count": 3}));

        let json = serde_json::to_value(CreateOrderResult {
            success: true,
            order_id: Some("o1".into()),
            order_number: Some("0001".into()),
            total_amount: Some(12.5),
            error: None,
        })
        .expect("json");
        assert_eq!(json["orderId"], "o1");
        assert!(json.get("error").is_none());

        let json = serde_json::to_value(SyncResult::failed("offline")).expect("json");
        assert_eq!(json, serde_json::json!({"success": false, "error": "offline"}));
    }
}

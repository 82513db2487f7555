use std::sync::Arc;

use super::PosCommands;
use crate::auth;
use crate::models::StaffMember;

impl PosCommands {
    /// PIN login. `Ok(None)` means no staff member has that PIN.
    pub async fn check_staff_pin(&self, pin: &str) -> Result<Option<StaffMember>, String> {
        let db = Arc::clone(&self.db);
        let pin = zeroize::Zeroizing::new(pin.to_string());
        tokio::task::spawn_blocking(move || {
            auth::check_staff_pin(&db, &pin).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| format!("PIN check failed: {e}"))?
    }

    pub fn get_staff_list(&self) -> Result<Vec<StaffMember>, String> {
        self.with_conn(auth::get_staff_list)
    }
}

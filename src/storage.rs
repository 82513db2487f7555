//! Terminal credentials in the OS credential store.
//!
//! Keychain on macOS, the Credential Manager on Windows and the Secret
//! Service on Linux, all through the `keyring` crate. Only the remote
//! directory URL, its anon key and the store id live here.

use keyring::Entry;
use tracing::{debug, info, warn};

use crate::error::{PosError, PosResult};

const SERVICE_NAME: &str = "local-pos";

pub const KEY_SUPABASE_URL: &str = "supabase_url";
pub const KEY_SUPABASE_ANON_KEY: &str = "supabase_anon_key";
pub const KEY_STORE_ID: &str = "store_id";

const ONBOARDING_KEYS: [&str; 3] = [KEY_SUPABASE_URL, KEY_SUPABASE_ANON_KEY, KEY_STORE_ID];

fn entry(key: &str) -> PosResult<Entry> {
    Entry::new(SERVICE_NAME, key)
        .map_err(|e| PosError::Config(format!("credential store unavailable for {key}: {e}")))
}

/// Read one credential. Missing entries, blank values and an unavailable
/// platform store all read as `None`.
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match entry(key) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(key, "{e}");
            return None;
        }
    };
    match entry.get_password() {
        Ok(value) => Some(value).filter(|v| !v.trim().is_empty()),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "credential read failed");
            None
        }
    }
}

fn set_credential(key: &str, value: &str) -> PosResult<()> {
    entry(key)?
        .set_password(value.trim())
        .map_err(|e| PosError::Config(format!("cannot store {key}: {e}")))
}

fn delete_credential(key: &str) -> PosResult<()> {
    match entry(key)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(PosError::Config(format!("cannot delete {key}: {e}"))),
    }
}

/// Onboarded once URL, anon key and store id are all stored.
pub fn is_configured() -> bool {
    ONBOARDING_KEYS.iter().all(|key| get_credential(key).is_some())
}

pub fn store_terminal_credentials(url: &str, anon_key: &str, store_id: &str) -> PosResult<()> {
    let values = ONBOARDING_KEYS.into_iter().zip([url, anon_key, store_id]);
    if let Some((key, _)) = values.clone().find(|(_, v)| v.trim().is_empty()) {
        return Err(PosError::Validation(format!("{key} must not be empty")));
    }
    for (key, value) in values {
        set_credential(key, value)?;
        debug!(key, "credential stored");
    }
    info!(store_id, "terminal credentials stored");
    Ok(())
}

/// Factory reset: forget every onboarding credential.
pub fn clear_terminal_credentials() -> PosResult<()> {
    for key in ONBOARDING_KEYS {
        delete_credential(key)?;
    }
    info!("terminal credentials cleared");
    Ok(())
}

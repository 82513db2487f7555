//! Terminal configuration.
//!
//! Resolution order for each value: process environment (after loading an
//! optional `.env` with dotenvy), then the OS credential store. The store id
//! may additionally come from the `local_config` cache, see
//! [`crate::context::SyncContext::from_local_cache`].

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::storage;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 15;
pub const MIN_SYNC_INTERVAL_SECS: u64 = 10;
pub const MAX_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BCRYPT_COST: u32 = 10;

pub struct TerminalConfig {
    pub supabase_url: String,
    pub anon_key: Zeroizing<String>,
    pub store_id: String,
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
    /// bcrypt cost used when hashing pulled staff PINs.
    pub pin_hash_cost: u32,
}

impl fmt::Debug for TerminalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalConfig")
            .field("supabase_url", &self.supabase_url)
            .field("anon_key", &"<redacted>")
            .field("store_id", &self.store_id)
            .field("data_dir", &self.data_dir)
            .field("sync_interval", &self.sync_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl TerminalConfig {
    /// Load `.env` (if present), then resolve from env and keyring.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => debug!("no .env file"),
            Err(e) => tracing::warn!("failed to load .env: {e}"),
        }
        Self::from_lookup(|key| std::env::var(key).ok(), storage::get_credential)
    }

    /// Build a config from an environment lookup and a credential lookup.
    pub fn from_lookup(
        env: impl Fn(&str) -> Option<String>,
        credential: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let env_any = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .filter_map(|k| env(*k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let onboarding = env_any(&["POS_CONNECTION_STRING"])
            .and_then(|raw| ConnectionString::decode(&raw));

        let supabase_url = env_any(&["POS_SUPABASE_URL", "SUPABASE_URL"])
            .or_else(|| onboarding.as_ref().and_then(|c| c.url.clone()))
            .or_else(|| credential(storage::KEY_SUPABASE_URL))
            .unwrap_or_default();
        let anon_key = env_any(&["POS_SUPABASE_ANON_KEY", "SUPABASE_ANON_KEY"])
            .or_else(|| onboarding.as_ref().and_then(|c| c.key.clone()))
            .or_else(|| credential(storage::KEY_SUPABASE_ANON_KEY))
            .unwrap_or_default();
        let store_id = env_any(&["POS_STORE_ID", "STORE_ID"])
            .or_else(|| onboarding.as_ref().and_then(|c| c.store.clone()))
            .or_else(|| credential(storage::KEY_STORE_ID))
            .unwrap_or_default();

        let data_dir = env_any(&["POS_DATA_DIR"])
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let sync_interval_secs = env_any(&["POS_SYNC_INTERVAL_SECS"])
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS)
            .clamp(MIN_SYNC_INTERVAL_SECS, MAX_SYNC_INTERVAL_SECS);
        let request_timeout_secs = env_any(&["POS_REQUEST_TIMEOUT_SECS"])
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        let pin_hash_cost = env_any(&["POS_PIN_HASH_COST"])
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|c| (4..=31).contains(c))
            .unwrap_or(DEFAULT_BCRYPT_COST);

        Self {
            supabase_url,
            anon_key: Zeroizing::new(anon_key),
            store_id,
            data_dir,
            sync_interval: Duration::from_secs(sync_interval_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            pin_hash_cost,
        }
    }

    pub fn has_remote(&self) -> bool {
        !self.supabase_url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

/// Platform data directory, e.g. `~/.local/share/com.localpos.terminal`.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.localpos.terminal")
}

// ---------------------------------------------------------------------------
// Onboarding connection string
// ---------------------------------------------------------------------------

/// `{ "url": ..., "key": ..., "store": ... }`, either raw JSON or
/// (url-safe) base64 of it.
#[derive(Debug, Default, PartialEq)]
pub struct ConnectionString {
    pub url: Option<String>,
    pub key: Option<String>,
    pub store: Option<String>,
}

impl ConnectionString {
    pub fn decode(raw: &str) -> Option<Self> {
        let payload = decode_payload(raw)?;
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| payload.get(*n).and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let decoded = Self {
            url: field(&["url", "supabaseUrl"]),
            key: field(&["key", "anonKey"]),
            store: field(&["store", "storeId", "store_id"]),
        };
        if decoded == Self::default() {
            return None;
        }
        Some(decoded)
    }
}

fn decode_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_wins_over_keyring() {
        let cfg = TerminalConfig::from_lookup(
            lookup(&[
                ("POS_SUPABASE_URL", "https://env.example.co"),
                ("SUPABASE_ANON_KEY", "anon-env"),
                ("STORE_ID", "store-env"),
            ]),
            lookup(&[
                ("supabase_url", "https://keyring.example.co"),
                ("store_id", "store-keyring"),
            ]),
        );
        assert_eq!(cfg.supabase_url, "https://env.example.co");
        assert_eq!(cfg.anon_key.as_str(), "anon-env");
        assert_eq!(cfg.store_id, "store-env");
        assert!(cfg.has_remote());
    }

    #[test]
    fn keyring_fills_missing_values() {
        let cfg = TerminalConfig::from_lookup(
            lookup(&[]),
            lookup(&[
                ("supabase_url", "https://keyring.example.co"),
                ("supabase_anon_key", "anon-keyring"),
            ]),
        );
        assert_eq!(cfg.supabase_url, "https://keyring.example.co");
        assert_eq!(cfg.store_id, "");
        assert_eq!(
            cfg.sync_interval,
            Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS)
        );
        assert_eq!(
            cfg.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }

    #[test]
    fn sync_interval_is_clamped() {
        let fast = TerminalConfig::from_lookup(lookup(&[("POS_SYNC_INTERVAL_SECS", "1")]), lookup(&[]));
        assert_eq!(fast.sync_interval, Duration::from_secs(MIN_SYNC_INTERVAL_SECS));
        let slow =
            TerminalConfig::from_lookup(lookup(&[("POS_SYNC_INTERVAL_SECS", "600")]), lookup(&[]));
        assert_eq!(slow.sync_interval, Duration::from_secs(MAX_SYNC_INTERVAL_SECS));
    }

    #[test]
    fn connection_string_base64_and_json() {
        let json = r#"{"url":"https://abc.supabase.co","key":"anon-123","store":"store-9"}"#;
        let encoded = BASE64_STANDARD.encode(json);
        let decoded = ConnectionString::decode(&encoded).expect("base64 decodes");
        assert_eq!(decoded.url.as_deref(), Some("https://abc.supabase.co"));
        assert_eq!(decoded.store.as_deref(), Some("store-9"));

        let raw = ConnectionString::decode(json).expect("json decodes");
        assert_eq!(raw, decoded);

        assert!(ConnectionString::decode("nope").is_none());
    }

    #[test]
    fn connection_string_feeds_config() {
        let json = r#"{"url":"https://abc.supabase.co","key":"anon-123","store":"store-9"}"#;
        let cfg = TerminalConfig::from_lookup(
            lookup(&[("POS_CONNECTION_STRING", json)]),
            lookup(&[]),
        );
        assert_eq!(cfg.store_id, "store-9");
        assert_eq!(cfg.anon_key.as_str(), "anon-123");
    }

    #[test]
    #[serial]
    fn process_env_is_read() {
        std::env::set_var("POS_STORE_ID", "store-from-process");
        std::env::set_var("POS_REQUEST_TIMEOUT_SECS", "3");
        let cfg = TerminalConfig::from_lookup(|k| std::env::var(k).ok(), |_| None);
        std::env::remove_var("POS_STORE_ID");
        std::env::remove_var("POS_REQUEST_TIMEOUT_SECS");
        assert_eq!(cfg.store_id, "store-from-process");
        assert_eq!(cfg.request_timeout, Duration::from_secs(3));
    }
}

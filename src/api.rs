//! Supabase (PostgREST) client implementing [`RemoteDirectory`].
//!
//! Store/menu/staff/live-order reads go through the backend's POS RPCs;
//! customers, elevated staff and the two push mutations use plain table
//! endpoints. Every request carries the anon key as both `apikey` and
//! bearer token.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{PosError, PosResult};
use crate::models::{
    Category, Customer, Ingredient, OptionGroup, OptionItem, OrderStatus, Product,
    ProductIngredient, ProductOptionLink, ProductVariation, RemoteOrder, RemoteStaff, StoreScope,
    PAYMENT_PAID,
};
use crate::remote::RemoteDirectory;

/// Reuse one menu snapshot across the eight catalog fetches of a full pull.
const MENU_SNAPSHOT_TTL: Duration = Duration::from_secs(60);

const RPC_STORE_CONFIG: &str = "get_pos_store_config";
const RPC_MENU_SYNC: &str = "get_pos_menu_sync";
const RPC_STAFF_SYNC: &str = "get_pos_staff_sync";
const RPC_LIVE_ORDERS: &str = "get_pos_live_orders";
const TABLE_STAFF: &str = "staff_profiles";
const TABLE_CUSTOMERS: &str = "cust_profiles";
const TABLE_ORDERS: &str = "orders";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the project URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes and a trailing `/rest/v1`
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/rest/v1") {
        url.truncate(url.len() - "/rest/v1".len());
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn friendly_error(url: &str, err: &reqwest::Error) -> PosError {
    if err.is_timeout() {
        return PosError::Remote(format!("Connection to {url} timed out"));
    }
    if err.is_connect() {
        return PosError::Remote(format!("Cannot reach remote directory at {url}"));
    }
    if err.is_builder() {
        return PosError::Config(format!("Invalid remote directory URL: {url}"));
    }
    PosError::Remote(format!("Network error communicating with {url}: {err}"))
}

fn status_error(status: StatusCode, detail: Option<String>) -> PosError {
    let base = match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Remote endpoint not found".to_string(),
        s if s >= 500 => format!("Remote server error (HTTP {s})"),
        s => format!("Unexpected response from remote (HTTP {s})"),
    };
    match detail {
        Some(d) if !d.is_empty() => PosError::Remote(format!("{base}: {d}")),
        _ => PosError::Remote(base),
    }
}

/// Pull a human message out of a PostgREST error body.
fn error_detail(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    ["message", "error", "hint", "details"]
        .iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .map(|s| s.to_string())
}

// ---------------------------------------------------------------------------
// Menu snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct MenuSnapshot {
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    ingredients: Vec<Ingredient>,
    #[serde(default)]
    option_groups: Vec<OptionGroup>,
    #[serde(default)]
    option_items: Vec<OptionItem>,
    #[serde(default)]
    products: Vec<Product>,
    #[serde(default)]
    product_variations: Vec<ProductVariation>,
    #[serde(default)]
    product_option_links: Vec<ProductOptionLink>,
    #[serde(default)]
    product_ingredients: Vec<ProductIngredient>,
}

struct CachedMenu {
    brand_id: String,
    fetched_at: Instant,
    snapshot: MenuSnapshot,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SupabaseDirectory {
    client: Client,
    base_url: String,
    anon_key: Zeroizing<String>,
    menu_cache: Mutex<Option<CachedMenu>>,
}

impl SupabaseDirectory {
    pub fn new(url: &str, anon_key: &str, timeout: Duration) -> PosResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PosError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(url),
            anon_key: Zeroizing::new(anon_key.trim().to_string()),
            menu_cache: Mutex::new(None),
        })
    }

    /// Perform an authenticated request against `/rest/v1{path}`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&str>,
    ) -> PosResult<Value> {
        if self.base_url.is_empty() || self.anon_key.is_empty() {
            return Err(PosError::Config("remote directory not configured".into()));
        }
        let full_url = format!("{}/rest/v1{path}", self.base_url);
        debug!(method = method.as_str(), path, "remote request");

        let mut req = self
            .client
            .request(method, &full_url)
            .header("apikey", self.anon_key.as_str())
            .bearer_auth(self.anon_key.as_str())
            .header("Accept", "application/json");
        if let Some(prefer) = prefer {
            req = req.header("Prefer", prefer);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        if !status.is_success() {
            let err = status_error(status, error_detail(&text));
            warn!(path, status = status.as_u16(), "remote request failed: {err}");
            return Err(err);
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn rpc<T: DeserializeOwned>(&self, name: &str, args: Value) -> PosResult<T> {
        let value = self
            .request(Method::POST, &format!("/rpc/{name}"), Some(args), None)
            .await?;
        Ok(serde_json::from_value(null_to_empty_array(value))?)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> PosResult<T> {
        let value = self
            .request(Method::GET, &format!("/{table}?{query}"), None, None)
            .await?;
        Ok(serde_json::from_value(null_to_empty_array(value))?)
    }

    /// PATCH rows matching `filter`; returns the number of rows changed.
    async fn patch(&self, table: &str, filter: &str, body: Value) -> PosResult<usize> {
        let value = self
            .request(
                Method::PATCH,
                &format!("/{table}?{filter}"),
                Some(body),
                Some("return=representation"),
            )
            .await?;
        Ok(value.as_array().map(Vec::len).unwrap_or(0))
    }

    async fn menu(&self, brand_id: &str) -> PosResult<MenuSnapshot> {
        if let Ok(guard) = self.menu_cache.lock() {
            if let Some(cached) = guard.as_ref() {
                if cached.brand_id == brand_id && cached.fetched_at.elapsed() < MENU_SNAPSHOT_TTL {
                    return Ok(cached.snapshot.clone());
                }
            }
        }

        let value = self
            .request(
                Method::POST,
                &format!("/rpc/{RPC_MENU_SYNC}"),
                Some(json!({ "p_brand_id": brand_id })),
                None,
            )
            .await?;
        let snapshot: MenuSnapshot = match value {
            Value::Null => MenuSnapshot::default(),
            other => serde_json::from_value(other)?,
        };
        info!(
            brand_id,
            products = snapshot.products.len(),
            categories = snapshot.categories.len(),
            "menu snapshot fetched"
        );

        if let Ok(mut guard) = self.menu_cache.lock() {
            *guard = Some(CachedMenu {
                brand_id: brand_id.to_string(),
                fetched_at: Instant::now(),
                snapshot: snapshot.clone(),
            });
        }
        Ok(snapshot)
    }
}

/// RPCs returning nothing deserialize as an empty list.
fn null_to_empty_array(value: Value) -> Value {
    if value.is_null() {
        Value::Array(Vec::new())
    } else {
        value
    }
}

/// `get_pos_store_config` returns either one row or a one-row array.
fn first_row(value: Value) -> Option<Value> {
    match value {
        Value::Array(mut rows) if !rows.is_empty() => Some(rows.swap_remove(0)),
        Value::Object(_) => Some(value),
        _ => None,
    }
}

/// Percent-encode a value used inside a PostgREST filter.
fn encode_filter_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[async_trait]
impl RemoteDirectory for SupabaseDirectory {
    async fn resolve_store_context(&self, store_id: &str) -> PosResult<StoreScope> {
        let value = self
            .request(
                Method::POST,
                &format!("/rpc/{RPC_STORE_CONFIG}"),
                Some(json!({ "p_store_id": store_id })),
                None,
            )
            .await?;
        let row = first_row(value)
            .ok_or_else(|| PosError::Config(format!("store {store_id} not found or access denied")))?;
        let scope: StoreScope = serde_json::from_value(row)?;
        if scope.brand_id.trim().is_empty() {
            return Err(PosError::Config(format!("store {store_id} has no brand")));
        }
        Ok(scope)
    }

    async fn fetch_categories(&self, brand_id: &str) -> PosResult<Vec<Category>> {
        Ok(self.menu(brand_id).await?.categories)
    }

    async fn fetch_ingredients(&self, brand_id: &str) -> PosResult<Vec<Ingredient>> {
        Ok(self.menu(brand_id).await?.ingredients)
    }

    async fn fetch_option_groups(&self, brand_id: &str) -> PosResult<Vec<OptionGroup>> {
        Ok(self.menu(brand_id).await?.option_groups)
    }

    async fn fetch_option_items(&self, brand_id: &str) -> PosResult<Vec<OptionItem>> {
        Ok(self.menu(brand_id).await?.option_items)
    }

    async fn fetch_products(&self, brand_id: &str) -> PosResult<Vec<Product>> {
        Ok(self.menu(brand_id).await?.products)
    }

    async fn fetch_variations(&self, brand_id: &str) -> PosResult<Vec<ProductVariation>> {
        Ok(self.menu(brand_id).await?.product_variations)
    }

    async fn fetch_option_links(&self, brand_id: &str) -> PosResult<Vec<ProductOptionLink>> {
        Ok(self.menu(brand_id).await?.product_option_links)
    }

    async fn fetch_product_ingredients(&self, brand_id: &str) -> PosResult<Vec<ProductIngredient>> {
        Ok(self.menu(brand_id).await?.product_ingredients)
    }

    async fn fetch_staff(&self, store_id: &str) -> PosResult<Vec<RemoteStaff>> {
        self.rpc(RPC_STAFF_SYNC, json!({ "p_store_id": store_id }))
            .await
    }

    async fn fetch_elevated_staff(&self) -> PosResult<Vec<RemoteStaff>> {
        self.select(
            TABLE_STAFF,
            "select=id,store_id,full_name,role,pos_pin,avatar_url&role=in.(super_admin,admin)",
        )
        .await
    }

    async fn fetch_customers(&self) -> PosResult<Vec<Customer>> {
        self.select(
            TABLE_CUSTOMERS,
            "select=id,full_name,phone,address,loyalty_points",
        )
        .await
    }

    async fn fetch_live_orders(
        &self,
        store_id: &str,
        statuses: &[OrderStatus],
    ) -> PosResult<Vec<RemoteOrder>> {
        let orders: Vec<RemoteOrder> = self
            .rpc(RPC_LIVE_ORDERS, json!({ "p_store_id": store_id }))
            .await?;
        // The RPC already scopes to active orders; filter again so the
        // caller's status set is authoritative.
        Ok(orders
            .into_iter()
            .filter(|o| {
                o.status
                    .parse::<OrderStatus>()
                    .map(|s| statuses.contains(&s))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn push_order_status(&self, order_id: &str, status: &str) -> PosResult<()> {
        let filter = format!("id=eq.{}", encode_filter_value(order_id));
        let changed = self
            .patch(TABLE_ORDERS, &filter, json!({ "status": status }))
            .await?;
        if changed == 0 {
            return Err(PosError::NotFound(format!("remote order {order_id}")));
        }
        Ok(())
    }

    async fn push_payment(&self, order_id: &str, method: &str, amount_received: f64) -> PosResult<()> {
        let id = encode_filter_value(order_id);
        let changed = self
            .patch(
                TABLE_ORDERS,
                &format!("id=eq.{id}"),
                json!({
                    "payment_status": PAYMENT_PAID,
                    "payment_method": method,
                    "amount_received": amount_received,
                }),
            )
            .await?;
        if changed == 0 {
            return Err(PosError::NotFound(format!("remote order {order_id}")));
        }
        // Only moves pending orders; anything further along is left alone.
        self.patch(
            TABLE_ORDERS,
            &format!("id=eq.{id}&status=eq.pending"),
            json!({ "status": OrderStatus::Confirmed.as_str() }),
        )
        .await?;
        Ok(())
    }
}

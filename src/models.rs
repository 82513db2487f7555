//! Domain types for the local store.
//!
//! Mirrored entities (catalog, staff, customers) deserialize straight from
//! remote directory rows; locally owned entities (sessions, orders, order
//! items) are read back from SQLite. Money is kept as `f64` at rest and
//! computed with `rust_decimal` in [`crate::pricing`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Accept a JSON string or number (PINs and order numbers arrive as either).
fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accept a JSON bool or 0/1 integer.
fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        None | Some(Value::Null) => true,
        _ => false,
    })
}

fn de_f64_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn de_i64_or_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn true_flag() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Catalog (mirrored)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, alias = "rank", deserialize_with = "de_i64_or_zero")]
    pub display_order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    #[default]
    Simple,
    Variable,
    Combo,
}

impl ProductKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductKind::Simple => "simple",
            ProductKind::Variable => "variable",
            ProductKind::Combo => "combo",
        }
    }

    /// Unknown kinds fall back to `simple`.
    pub fn parse_lossy(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("variable") => ProductKind::Variable,
            Some("combo") => ProductKind::Combo,
            _ => ProductKind::Simple,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "true_flag", deserialize_with = "de_flag")]
    pub is_available: bool,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: ProductKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariation {
    pub id: String,
    pub product_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub price: f64,
    #[serde(default = "true_flag", deserialize_with = "de_flag")]
    pub is_available: bool,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionGroup {
    pub id: String,
    pub name: String,
    /// Selection kind as sent by the remote (`single`, `multiple`, ...).
    #[serde(default, rename = "type", alias = "selection_kind")]
    pub selection_kind: Option<String>,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub min_selection: i64,
    /// 0 means unbounded.
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub max_selection: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub id: String,
    pub group_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub price: f64,
    #[serde(default = "true_flag", deserialize_with = "de_flag")]
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductOptionLink {
    pub product_id: String,
    pub group_id: String,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    #[serde(default = "true_flag", deserialize_with = "de_flag")]
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductIngredient {
    pub product_id: String,
    pub ingredient_id: String,
}

/// An option group linked to a product, with its available items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductOptionGroup {
    #[serde(flatten)]
    pub group: OptionGroup,
    pub sort_order: i64,
    pub items: Vec<OptionItem>,
}

// ---------------------------------------------------------------------------
// Staff & customers (mirrored)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Owner,
    Manager,
    Cashier,
    Staff,
    Driver,
    SuperAdmin,
    Admin,
}

impl StaffRole {
    /// Roles allowed to authenticate at any store's terminal.
    pub const ELEVATED: [StaffRole; 2] = [StaffRole::SuperAdmin, StaffRole::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            StaffRole::Owner => "owner",
            StaffRole::Manager => "manager",
            StaffRole::Cashier => "cashier",
            StaffRole::Staff => "staff",
            StaffRole::Driver => "driver",
            StaffRole::SuperAdmin => "super_admin",
            StaffRole::Admin => "admin",
        }
    }

    /// Unknown or missing roles are treated as plain `staff`.
    pub fn parse_lossy(raw: Option<&str>) -> Self {
        raw.and_then(|r| r.parse().ok()).unwrap_or(StaffRole::Staff)
    }

    pub fn is_elevated(self) -> bool {
        Self::ELEVATED.contains(&self)
    }
}

impl FromStr for StaffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "owner" => Ok(StaffRole::Owner),
            "manager" => Ok(StaffRole::Manager),
            "cashier" => Ok(StaffRole::Cashier),
            "staff" => Ok(StaffRole::Staff),
            "driver" => Ok(StaffRole::Driver),
            "super_admin" => Ok(StaffRole::SuperAdmin),
            "admin" => Ok(StaffRole::Admin),
            other => Err(format!("unknown staff role: {other}")),
        }
    }
}

/// Staff row as delivered by the remote directory (carries the PIN).
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStaff {
    pub id: String,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, alias = "pin", deserialize_with = "de_opt_string_or_number")]
    pub pos_pin: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Staff member as exposed to the UI. Never carries the PIN hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffMember {
    pub id: String,
    pub store_id: Option<String>,
    pub full_name: String,
    pub role: StaffRole,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub loyalty_points: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    #[serde(alias = "full_name")]
    pub full_name: String,
    pub phone: String,
    #[serde(default)]
    pub address: Option<String>,
}

// ---------------------------------------------------------------------------
// Sync marker & order status
// ---------------------------------------------------------------------------

/// Per-row push state. Moves forward only: new_local -> pending -> synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMarker {
    NewLocal,
    Pending,
    Synced,
}

impl SyncMarker {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMarker::NewLocal => "new_local",
            SyncMarker::Pending => "pending",
            SyncMarker::Synced => "synced",
        }
    }

    /// Returns the later of the two markers.
    pub fn advance(self, to: SyncMarker) -> SyncMarker {
        self.max(to)
    }
}

impl FromStr for SyncMarker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_local" => Ok(SyncMarker::NewLocal),
            "pending" => Ok(SyncMarker::Pending),
            "synced" => Ok(SyncMarker::Synced),
            other => Err(format!("unknown sync marker: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Statuses pulled by the live-order sync.
    pub const ACTIVE: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::OutForDelivery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// The nominal lifecycle. Only used for diagnostics; updates are not
    /// rejected when this returns false.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Preparing)
                | (Preparing, Ready)
                | (Ready, OutForDelivery)
                | (Ready, Delivered)
                | (OutForDelivery, Delivered)
        )
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "preparing" => Ok(OrderStatus::Preparing),
            "ready" => Ok(OrderStatus::Ready),
            "out_for_delivery" => Ok(OrderStatus::OutForDelivery),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    #[default]
    DineIn,
    Takeaway,
    Delivery,
    Phone,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::DineIn => "dine_in",
            OrderType::Takeaway => "takeaway",
            OrderType::Delivery => "delivery",
            OrderType::Phone => "phone",
        }
    }
}

pub const CHANNEL_POS: &str = "pos";
pub const PAYMENT_PAID: &str = "paid";
pub const PAYMENT_PENDING: &str = "pending";

// ---------------------------------------------------------------------------
// Order item options payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedChoice {
    pub name: String,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub price: f64,
}

/// Snapshot of a line's customisation, stored as JSON text on the item row
/// so historical orders render after the catalog changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemOptions {
    #[serde(default)]
    pub variation: Option<PricedChoice>,
    #[serde(default)]
    pub options: Vec<PricedChoice>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default, alias = "removedIngredients")]
    pub removed_ingredients: Vec<String>,
}

impl ItemOptions {
    /// Parse a stored payload. Remote rows may carry a JSON string, an
    /// object, or nothing at all.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::String(s) if s.trim().is_empty() => Ok(Self::default()),
            Value::String(s) => serde_json::from_str(s),
            other => serde_json::from_value(other.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions, orders (locally owned)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub store_id: String,
    pub opened_by: String,
    pub opened_at: String,
    pub closed_at: Option<String>,
    pub opening_balance: f64,
    pub closing_balance: Option<f64>,
    pub actual_closing_balance: Option<f64>,
    pub notes: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: String,
    pub order_number: Option<String>,
    pub store_id: String,
    pub session_id: Option<String>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub delivery_address: Option<String>,
    pub order_type: String,
    pub total_amount: f64,
    pub status: String,
    pub payment_status: String,
    pub payment_method: Option<String>,
    pub amount_received: Option<f64>,
    pub amount_returned: Option<f64>,
    pub channel: String,
    pub created_at: String,
    pub sync_status: SyncMarker,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: Option<String>,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_price: f64,
    pub options: ItemOptions,
}

// ---------------------------------------------------------------------------
// Remote live orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrder {
    pub id: String,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub order_number: Option<String>,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default, alias = "user_id")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub total_amount: f64,
    pub status: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, alias = "items")]
    pub order_items: Vec<RemoteOrderItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrderItem {
    pub id: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub unit_price: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub total_price: f64,
    #[serde(default)]
    pub options: Value,
}

/// Store resolution result from the remote directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreScope {
    pub brand_id: String,
    #[serde(default, alias = "name")]
    pub store_name: String,
}

// ---------------------------------------------------------------------------
// Order creation input
// ---------------------------------------------------------------------------

/// One cart line. Prices are resolved from the local catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[serde(alias = "product_id")]
    pub product_id: String,
    #[serde(default, alias = "variation_id")]
    pub variation_id: Option<String>,
    #[serde(alias = "qty")]
    pub quantity: i64,
    #[serde(default, alias = "option_item_ids")]
    pub option_item_ids: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default, alias = "removed_ingredients")]
    pub removed_ingredients: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    #[serde(alias = "payment_method")]
    pub method: String,
    #[serde(default, alias = "amount_received")]
    pub amount_received: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderContext {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default, alias = "customer_id")]
    pub customer_id: Option<String>,
    #[serde(default, alias = "order_type")]
    pub order_type: OrderType,
    #[serde(default, alias = "delivery_address")]
    pub delivery_address: Option<String>,
}

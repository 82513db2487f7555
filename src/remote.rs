//! Contract between the sync engine and the authoritative backend.
//!
//! The engine only ever talks to a `dyn RemoteDirectory`; the production
//! implementation is [`crate::api::SupabaseDirectory`].

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::{PosError, PosResult};
use crate::models::{
    Category, Customer, Ingredient, OptionGroup, OptionItem, OrderStatus, Product,
    ProductIngredient, ProductOptionLink, ProductVariation, RemoteOrder, RemoteStaff, StoreScope,
};

#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// Resolve a store id to its brand and display name.
    async fn resolve_store_context(&self, store_id: &str) -> PosResult<StoreScope>;

    async fn fetch_categories(&self, brand_id: &str) -> PosResult<Vec<Category>>;
    async fn fetch_ingredients(&self, brand_id: &str) -> PosResult<Vec<Ingredient>>;
    async fn fetch_option_groups(&self, brand_id: &str) -> PosResult<Vec<OptionGroup>>;
    async fn fetch_option_items(&self, brand_id: &str) -> PosResult<Vec<OptionItem>>;
    async fn fetch_products(&self, brand_id: &str) -> PosResult<Vec<Product>>;
    async fn fetch_variations(&self, brand_id: &str) -> PosResult<Vec<ProductVariation>>;
    async fn fetch_option_links(&self, brand_id: &str) -> PosResult<Vec<ProductOptionLink>>;
    async fn fetch_product_ingredients(&self, brand_id: &str)
        -> PosResult<Vec<ProductIngredient>>;

    /// Staff assigned to this store.
    async fn fetch_staff(&self, store_id: &str) -> PosResult<Vec<RemoteStaff>>;
    /// Staff holding an elevated role, across all stores.
    async fn fetch_elevated_staff(&self) -> PosResult<Vec<RemoteStaff>>;

    async fn fetch_customers(&self) -> PosResult<Vec<Customer>>;

    /// Orders of `store_id` whose status is in `statuses`, items embedded.
    async fn fetch_live_orders(
        &self,
        store_id: &str,
        statuses: &[OrderStatus],
    ) -> PosResult<Vec<RemoteOrder>>;

    async fn push_order_status(&self, order_id: &str, status: &str) -> PosResult<()>;

    /// Record a payment; also advances a `pending` order to `confirmed`.
    async fn push_payment(&self, order_id: &str, method: &str, amount_received: f64)
        -> PosResult<()>;
}

/// Bound a remote call. An elapsed timer is reported as [`PosError::Timeout`].
pub async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = PosResult<T>>,
) -> PosResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(PosError::Timeout(timeout)),
    }
}

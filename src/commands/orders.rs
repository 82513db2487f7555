use serde::Deserialize;
use tracing::{debug, warn};

use super::{CreateOrderResult, PosCommands};
use crate::models::{CartLine, Order, OrderContext, PaymentInfo};
use crate::orders;

/// Payload of `create_order`, as sent by the order screen.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderPayload {
    #[serde(alias = "lines", alias = "cart")]
    pub items: Vec<CartLine>,
    #[serde(flatten)]
    pub context: OrderContext,
    #[serde(default, alias = "payment_method")]
    pub payment_method: Option<String>,
    #[serde(default, alias = "amount_received")]
    pub amount_received: Option<f64>,
}

impl CreateOrderPayload {
    fn payment(&self) -> Option<PaymentInfo> {
        self.payment_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(|method| PaymentInfo {
                method: method.to_string(),
                amount_received: self.amount_received,
            })
    }
}

impl PosCommands {
    /// Create an order locally. Works offline; the store id falls back to
    /// the terminal's own when the payload leaves it empty.
    pub fn create_order(&self, payload: &CreateOrderPayload) -> CreateOrderResult {
        let mut context = payload.context.clone();
        if context.store_id.trim().is_empty() {
            context.store_id = self.engine.context().store_id().to_string();
        }
        let payment = payload.payment();

        match self.with_conn(|conn| {
            orders::create_order(conn, &payload.items, &context, payment.as_ref())
        }) {
            Ok(created) => CreateOrderResult {
                success: true,
                order_id: Some(created.id),
                order_number: Some(created.order_number),
                total_amount: Some(created.total_amount),
                error: None,
            },
            Err(e) => {
                warn!("order creation rejected: {e}");
                CreateOrderResult {
                    success: false,
                    order_id: None,
                    order_number: None,
                    total_amount: None,
                    error: Some(e),
                }
            }
        }
    }

    pub fn get_live_orders(&self) -> Result<Vec<Order>, String> {
        self.with_conn(orders::get_live_orders)
    }

    /// Apply locally, then try the push once. A failed push stays queued
    /// and does not fail the command.
    pub async fn update_order_status(&self, order_id: &str, status: &str) -> Result<(), String> {
        let entry = self.with_conn(|conn| orders::update_order_status(conn, order_id, status))?;
        if !self.engine.push_order_status(&entry).await {
            debug!(order_id, "status push deferred to the queue");
        }
        Ok(())
    }

    /// Record a payment. `true` once the local write succeeded, whatever
    /// happens to the push.
    pub async fn pay_order(&self, order_id: &str, method: &str, amount_received: f64) -> bool {
        let entry = match self
            .with_conn(|conn| orders::pay_order(conn, order_id, method, amount_received))
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!(order_id, "payment not recorded: {e}");
                return false;
            }
        };
        if !self.engine.push_payment(&entry).await {
            debug!(order_id, "payment push deferred to the queue");
        }
        true
    }
}

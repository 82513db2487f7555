//! Order service: atomic order creation plus the local side of status and
//! payment updates.
//!
//! Prices never come from the caller. Each cart line carries catalog ids and
//! is priced from the local mirror inside the same `BEGIN IMMEDIATE`
//! transaction that writes the order, so a concurrent full pull cannot change
//! a price between validation and insert.

use chrono::{Local, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{PosError, PosResult};
use crate::models::{
    CartLine, ItemOptions, Order, OrderContext, OrderItem, OrderStatus, PaymentInfo, PricedChoice,
    SyncMarker, CHANNEL_POS, PAYMENT_PAID, PAYMENT_PENDING,
};
use crate::pricing::{self, LinePrice};
use crate::push_queue::{self, PushEntry, PushPayload};
use crate::sync::advance_order_marker;

/// Customer name stored on walk-in orders.
pub const WALK_IN_CUSTOMER: &str = "Client Comptoir";

/// How many orders `get_live_orders` returns.
const LIVE_ORDER_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub id: String,
    pub order_number: String,
    pub total_amount: f64,
    pub amount_returned: Option<f64>,
}

// ---------------------------------------------------------------------------
// Line resolution
// ---------------------------------------------------------------------------

/// A cart line priced against the local catalog.
struct ResolvedLine {
    product_id: String,
    product_name: String,
    quantity: i64,
    price: LinePrice,
    options: ItemOptions,
}

struct LinkedGroup {
    name: String,
    min_selection: i64,
    max_selection: i64,
}

fn resolve_line(conn: &Connection, index: usize, line: &CartLine) -> PosResult<ResolvedLine> {
    let n = index + 1;
    if line.quantity < 1 {
        return Err(PosError::Validation(format!(
            "line {n}: quantity must be at least 1"
        )));
    }

    let (product_name, base_price): (String, f64) = conn
        .query_row(
            "SELECT name, price FROM local_products WHERE id = ?1",
            params![line.product_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| {
            PosError::Validation(format!("line {n}: unknown product {}", line.product_id))
        })?;

    let variation = match line.variation_id.as_deref().filter(|v| !v.is_empty()) {
        Some(variation_id) => Some(
            conn.query_row(
                "SELECT name, price FROM local_product_variations
                 WHERE id = ?1 AND product_id = ?2",
                params![variation_id, line.product_id],
                |row| {
                    Ok(PricedChoice {
                        name: row.get(0)?,
                        price: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| {
                PosError::Validation(format!(
                    "line {n}: variation {variation_id} does not belong to {product_name}"
                ))
            })?,
        ),
        None => None,
    };

    let groups: HashMap<String, LinkedGroup> = {
        let mut stmt = conn.prepare(
            "SELECT g.id, g.name, g.min_selection, g.max_selection
             FROM local_product_option_links l
             JOIN local_option_groups g ON g.id = l.group_id
             WHERE l.product_id = ?1",
        )?;
        let rows = stmt.query_map(params![line.product_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                LinkedGroup {
                    name: row.get(1)?,
                    min_selection: row.get(2)?,
                    max_selection: row.get(3)?,
                },
            ))
        })?;
        let groups = rows.collect::<Result<_, _>>()?;
        groups
    };

    let mut selected: HashMap<&str, i64> = HashMap::new();
    let mut chosen = Vec::with_capacity(line.option_item_ids.len());
    for option_id in &line.option_item_ids {
        let (name, price, group_id): (String, f64, String) = conn
            .query_row(
                "SELECT name, price, group_id FROM local_option_items WHERE id = ?1",
                params![option_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or_else(|| {
                PosError::Validation(format!("line {n}: unknown option {option_id}"))
            })?;
        let Some((group_key, _)) = groups.get_key_value(group_id.as_str()) else {
            return Err(PosError::Validation(format!(
                "line {n}: option {name} is not offered for {product_name}"
            )));
        };
        *selected.entry(group_key.as_str()).or_default() += 1;
        chosen.push(PricedChoice { name, price });
    }

    for (group_id, group) in &groups {
        let count = selected.get(group_id.as_str()).copied().unwrap_or(0);
        if count < group.min_selection {
            return Err(PosError::Validation(format!(
                "line {n}: {} requires at least {} selection(s)",
                group.name, group.min_selection
            )));
        }
        if group.max_selection > 0 && count > group.max_selection {
            return Err(PosError::Validation(format!(
                "line {n}: {} allows at most {} selection(s)",
                group.name, group.max_selection
            )));
        }
    }

    let deltas: Vec<f64> = chosen.iter().map(|o| o.price).collect();
    let price = pricing::price_line(
        base_price,
        variation.as_ref().map(|v| v.price),
        &deltas,
        line.quantity,
    );

    Ok(ResolvedLine {
        product_id: line.product_id.clone(),
        product_name,
        quantity: line.quantity,
        price,
        options: ItemOptions {
            variation,
            options: chosen,
            note: line
                .note
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            removed_ingredients: line.removed_ingredients.clone(),
        },
    })
}

/// Next human-facing order number. The counter restarts every local day.
fn next_order_number(conn: &Connection) -> PosResult<String> {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let last_date = db::get_config(conn, db::CONFIG_ORDER_COUNTER_DATE)?;
    let current = if last_date.as_deref() == Some(today.as_str()) {
        db::get_config(conn, db::CONFIG_ORDER_COUNTER)?
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    } else {
        0
    };
    let next = current + 1;
    db::set_config(conn, db::CONFIG_ORDER_COUNTER, &next.to_string())?;
    db::set_config(conn, db::CONFIG_ORDER_COUNTER_DATE, &today)?;
    Ok(format!("{next:04}"))
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Create an order and its items in one transaction.
///
/// With `payment` the order starts `confirmed`/`paid`, otherwise
/// `pending`/`pending`. Nothing is written when any line fails validation
/// or any insert fails.
pub fn create_order(
    conn: &Connection,
    cart: &[CartLine],
    ctx: &OrderContext,
    payment: Option<&PaymentInfo>,
) -> PosResult<CreatedOrder> {
    if cart.is_empty() {
        return Err(PosError::Validation("cart is empty".into()));
    }
    let store_id = ctx.store_id.trim();
    if store_id.is_empty() {
        return Err(PosError::Validation("store id is required".into()));
    }
    if let Some(p) = payment {
        if p.method.trim().is_empty() {
            return Err(PosError::Validation("payment method is required".into()));
        }
    }

    let created = db::with_transaction(conn, |tx| {
        let lines = cart
            .iter()
            .enumerate()
            .map(|(i, line)| resolve_line(tx, i, line))
            .collect::<PosResult<Vec<_>>>()?;
        let prices: Vec<LinePrice> = lines.iter().map(|l| l.price).collect();
        let total = pricing::order_total(&prices);

        let (received, returned) = match payment {
            Some(p) => {
                let received = match p.amount_received {
                    Some(amount) if !amount.is_finite() => {
                        return Err(PosError::Validation("amount received is not a number".into()))
                    }
                    Some(amount) => pricing::round_money(pricing::to_decimal(amount)),
                    None => total,
                };
                if received < total {
                    return Err(PosError::Validation(format!(
                        "amount received {received} is less than total {total}"
                    )));
                }
                (Some(received), Some(pricing::change_due(total, received)))
            }
            None => (None, None),
        };

        let (customer_name, customer_phone, customer_address) = match ctx
            .customer_id
            .as_deref()
            .filter(|c| !c.is_empty())
        {
            Some(customer_id) => customer_snapshot(tx, customer_id)?,
            None => (WALK_IN_CUSTOMER.to_string(), None, None),
        };
        let delivery_address = ctx
            .delivery_address
            .clone()
            .filter(|a| !a.trim().is_empty())
            .or(customer_address);

        let (status, payment_status) = if payment.is_some() {
            (OrderStatus::Confirmed.as_str(), PAYMENT_PAID)
        } else {
            (OrderStatus::Pending.as_str(), PAYMENT_PENDING)
        };

        let order_id = Uuid::new_v4().to_string();
        let order_number = next_order_number(tx)?;
        let now = now_timestamp();

        tx.execute(
            "INSERT INTO local_orders (
                id, order_number, store_id, pos_session_id, customer_id, customer_name,
                customer_phone, delivery_address, order_type, total_amount, status,
                payment_status, payment_method, amount_received, amount_returned,
                channel, created_at, sync_status, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, ?17)",
            params![
                order_id,
                order_number,
                store_id,
                ctx.session_id,
                ctx.customer_id,
                customer_name,
                customer_phone,
                delivery_address,
                ctx.order_type.as_str(),
                pricing::to_f64(total),
                status,
                payment_status,
                payment.map(|p| p.method.trim()),
                received.map(pricing::to_f64),
                returned.map(pricing::to_f64),
                CHANNEL_POS,
                now,
                SyncMarker::NewLocal.as_str(),
            ],
        )?;

        let mut stmt = tx.prepare(
            "INSERT INTO local_order_items
                (id, order_id, product_id, product_name, quantity, unit_price, total_price, options)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for line in &lines {
            stmt.execute(params![
                Uuid::new_v4().to_string(),
                order_id,
                line.product_id,
                line.product_name,
                line.quantity,
                pricing::to_f64(line.price.unit_price),
                pricing::to_f64(line.price.total_price),
                serde_json::to_string(&line.options)?,
            ])?;
        }

        Ok(CreatedOrder {
            id: order_id,
            order_number,
            total_amount: pricing::to_f64(total),
            amount_returned: returned.map(pricing::to_f64),
        })
    })?;

    info!(
        order_id = %created.id,
        order_number = %created.order_number,
        total = created.total_amount,
        paid = payment.is_some(),
        "order created"
    );
    Ok(created)
}

fn customer_snapshot(
    conn: &Connection,
    customer_id: &str,
) -> PosResult<(String, Option<String>, Option<String>)> {
    conn.query_row(
        "SELECT full_name, phone, address FROM local_customers WHERE id = ?1",
        params![customer_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()?
    .ok_or_else(|| PosError::Validation(format!("unknown customer {customer_id}")))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

const ORDER_COLUMNS: &str = "id, order_number, store_id, pos_session_id, customer_id,
    customer_name, customer_phone, delivery_address, order_type, total_amount, status,
    payment_status, payment_method, amount_received, amount_returned, channel, created_at,
    sync_status";

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let marker: String = row.get(17)?;
    Ok(Order {
        id: row.get(0)?,
        order_number: row.get(1)?,
        store_id: row.get(2)?,
        session_id: row.get(3)?,
        customer_id: row.get(4)?,
        customer_name: row.get(5)?,
        customer_phone: row.get(6)?,
        delivery_address: row.get(7)?,
        order_type: row.get(8)?,
        total_amount: row.get(9)?,
        status: row.get(10)?,
        payment_status: row.get(11)?,
        payment_method: row.get(12)?,
        amount_received: row.get(13)?,
        amount_returned: row.get(14)?,
        channel: row.get(15)?,
        created_at: row.get(16)?,
        sync_status: marker.parse().unwrap_or(SyncMarker::NewLocal),
        items: Vec::new(),
    })
}

fn load_items(conn: &Connection, order_id: &str) -> PosResult<Vec<OrderItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, order_id, product_id, product_name, quantity, unit_price, total_price, options
         FROM local_order_items WHERE order_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![order_id], |row| {
        Ok((
            OrderItem {
                id: row.get(0)?,
                order_id: row.get(1)?,
                product_id: row.get(2)?,
                product_name: row.get(3)?,
                quantity: row.get(4)?,
                unit_price: row.get(5)?,
                total_price: row.get(6)?,
                options: ItemOptions::default(),
            },
            row.get::<_, Option<String>>(7)?,
        ))
    })?;

    let mut items = Vec::new();
    for row in rows {
        let (mut item, raw) = row?;
        if let Some(raw) = raw.filter(|r| !r.trim().is_empty()) {
            match serde_json::from_str(&raw) {
                Ok(options) => item.options = options,
                Err(e) => warn!(item_id = %item.id, "unreadable item options: {e}"),
            }
        }
        items.push(item);
    }
    Ok(items)
}

pub fn get_order(conn: &Connection, order_id: &str) -> PosResult<Order> {
    let mut order = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM local_orders WHERE id = ?1"),
            params![order_id],
            order_from_row,
        )
        .optional()?
        .ok_or_else(|| PosError::NotFound(format!("order {order_id}")))?;
    order.items = load_items(conn, order_id)?;
    Ok(order)
}

/// Most recent non-terminal orders, newest first, items included.
pub fn get_live_orders(conn: &Connection) -> PosResult<Vec<Order>> {
    let mut orders = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM local_orders
             WHERE status NOT IN ('cancelled', 'delivered')
             ORDER BY created_at DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![LIVE_ORDER_LIMIT], order_from_row)?;
        let orders = rows.collect::<Result<Vec<_>, _>>()?;
        orders
    };
    for order in &mut orders {
        order.items = load_items(conn, &order.id)?;
    }
    Ok(orders)
}

// ---------------------------------------------------------------------------
// Local mutations
// ---------------------------------------------------------------------------

/// Apply a status change locally and queue it for push.
///
/// Any non-empty status is accepted; transitions outside the nominal
/// lifecycle are logged and applied.
pub fn update_order_status(conn: &Connection, order_id: &str, status: &str) -> PosResult<PushEntry> {
    let status = status.trim();
    if status.is_empty() {
        return Err(PosError::Validation("status is required".into()));
    }

    db::with_transaction(conn, |tx| {
        let current: String = tx
            .query_row(
                "SELECT status FROM local_orders WHERE id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| PosError::NotFound(format!("order {order_id}")))?;

        match (current.parse::<OrderStatus>(), status.parse::<OrderStatus>()) {
            (Ok(from), Ok(to)) if from != to && !from.can_transition_to(to) => {
                warn!(order_id, from = %from, to = %to, "status change outside the order lifecycle");
            }
            (_, Err(_)) => warn!(order_id, status, "unknown order status applied"),
            _ => {}
        }

        tx.execute(
            "UPDATE local_orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, now_timestamp(), order_id],
        )?;
        advance_order_marker(tx, order_id, SyncMarker::Pending)?;
        push_queue::enqueue(
            tx,
            order_id,
            &PushPayload::Status {
                status: status.to_string(),
            },
        )
    })
}

/// Record a payment locally and queue it for push. A `pending` order
/// becomes `confirmed`.
pub fn pay_order(
    conn: &Connection,
    order_id: &str,
    method: &str,
    amount_received: f64,
) -> PosResult<PushEntry> {
    let method = method.trim();
    if method.is_empty() {
        return Err(PosError::Validation("payment method is required".into()));
    }
    if !amount_received.is_finite() || amount_received < 0.0 {
        return Err(PosError::Validation("amount received is not valid".into()));
    }

    db::with_transaction(conn, |tx| {
        let total: f64 = tx
            .query_row(
                "SELECT total_amount FROM local_orders WHERE id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| PosError::NotFound(format!("order {order_id}")))?;

        let total = pricing::to_decimal(total);
        let received = pricing::round_money(pricing::to_decimal(amount_received));
        if received < total {
            return Err(PosError::Validation(format!(
                "amount received {received} is less than total {total}"
            )));
        }
        let returned = pricing::change_due(total, received);
        tx.execute(
            "UPDATE local_orders SET
                payment_status = ?1,
                payment_method = ?2,
                amount_received = ?3,
                amount_returned = ?4,
                status = CASE WHEN status = 'pending' THEN 'confirmed' ELSE status END,
                updated_at = ?5
             WHERE id = ?6",
            params![
                PAYMENT_PAID,
                method,
                pricing::to_f64(received),
                pricing::to_f64(returned),
                now_timestamp(),
                order_id
            ],
        )?;
        advance_order_marker(tx, order_id, SyncMarker::Pending)?;
        push_queue::enqueue(
            tx,
            order_id,
            &PushPayload::Payment {
                method: method.to_string(),
                amount_received: pricing::to_f64(received),
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;
    use crate::sync::tests::{catalog, engine_with, remote_order, STORE};
    use crate::remote::fake::FakeDirectory;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn items_total(conn: &Connection, order_id: &str) -> PosResult<Decimal> {
        let totals: Vec<f64> = {
            let mut stmt =
                conn.prepare("SELECT total_price FROM local_order_items WHERE order_id = ?1")?;
            let rows = stmt.query_map(params![order_id], |row| row.get(0))?;
            let totals = rows.collect::<Result<_, _>>()?;
            totals
        };
        Ok(pricing::round_money(
            totals.into_iter().map(pricing::to_decimal).sum(),
        ))
    }

    fn line(product: &str, variation: Option<&str>, qty: i64, options: &[&str]) -> CartLine {
        CartLine {
            product_id: product.into(),
            variation_id: variation.map(str::to_string),
            quantity: qty,
            option_item_ids: options.iter().map(|s| s.to_string()).collect(),
            note: None,
            removed_ingredients: Vec::new(),
        }
    }

    fn ctx() -> OrderContext {
        OrderContext {
            store_id: STORE.into(),
            session_id: None,
            customer_id: None,
            order_type: OrderType::Takeaway,
            delivery_address: None,
        }
    }

    async fn seeded() -> (Arc<crate::sync::SyncEngine>, Arc<db::DbState>, Arc<FakeDirectory>) {
        let remote = Arc::new(FakeDirectory::with_data(catalog()));
        let (engine, db) = engine_with(Arc::clone(&remote));
        engine.full_pull().await.expect("seed catalog");
        (engine, db, remote)
    }

    fn order_count(conn: &Connection) -> (i64, i64) {
        let orders = conn
            .query_row("SELECT COUNT(*) FROM local_orders", [], |r| r.get(0))
            .expect("orders");
        let items = conn
            .query_row("SELECT COUNT(*) FROM local_order_items", [], |r| r.get(0))
            .expect("items");
        (orders, items)
    }

    #[tokio::test]
    async fn variable_product_pricing() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let mut pizza = line("prod-pizza", Some("var-family"), 2, &["opt-large"]);
        pizza.note = Some("  well done ".into());
        pizza.removed_ingredients = vec!["Onion".into()];

        let created = create_order(&conn, &[pizza], &ctx(), None).expect("create");
        assert_eq!(created.total_amount, 110.0);

        let order = get_order(&conn, &created.id).expect("order");
        assert_eq!(order.items.len(), 1);
        let item = &order.items[0];
        assert_eq!(item.unit_price, 55.0);
        assert_eq!(item.total_price, 110.0);
        assert_eq!(
            item.options.variation,
            Some(PricedChoice {
                name: "Family".into(),
                price: 45.0
            })
        );
        assert_eq!(item.options.note.as_deref(), Some("well done"));
        assert_eq!(item.options.removed_ingredients, vec!["Onion".to_string()]);
        assert_eq!(order.status, "pending");
        assert_eq!(order.payment_status, "pending");
        assert_eq!(order.customer_name.as_deref(), Some(WALK_IN_CUSTOMER));
        assert_eq!(order.channel, "pos");
        assert_eq!(order.sync_status, SyncMarker::NewLocal);
    }

    #[tokio::test]
    async fn order_total_matches_items() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let cart = [
            line("prod-pizza", Some("var-family"), 1, &["opt-large", "opt-cheese", "opt-bacon"]),
            line("prod-cola", None, 3, &[]),
        ];
        let created = create_order(&conn, &cart, &ctx(), None).expect("create");

        // 45 + 10 + 1.5 + 2.25 = 58.75; 3 x 2.5 = 7.5
        assert_eq!(created.total_amount, 66.25);
        assert_eq!(
            items_total(&conn, &created.id).expect("items"),
            pricing::to_decimal(created.total_amount)
        );
    }

    #[tokio::test]
    async fn paid_order_is_confirmed_with_change() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let payment = PaymentInfo {
            method: "cash".into(),
            amount_received: Some(10.0),
        };
        let created = create_order(&conn, &[line("prod-cola", None, 3, &[])], &ctx(), Some(&payment))
            .expect("create");
        assert_eq!(created.amount_returned, Some(2.5));

        let order = get_order(&conn, &created.id).expect("order");
        assert_eq!(order.status, "confirmed");
        assert_eq!(order.payment_status, "paid");
        assert_eq!(order.payment_method.as_deref(), Some("cash"));
        assert_eq!(order.amount_received, Some(10.0));
    }

    #[tokio::test]
    async fn rejects_invalid_carts_without_writing() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let short = PaymentInfo {
            method: "cash".into(),
            amount_received: Some(1.0),
        };
        let nan = PaymentInfo {
            method: "cash".into(),
            amount_received: Some(f64::NAN),
        };

        let cases: Vec<(Vec<CartLine>, Option<&PaymentInfo>)> = vec![
            (vec![], None),
            (vec![line("prod-cola", None, 0, &[])], None),
            (vec![line("prod-nope", None, 1, &[])], None),
            // variation of another product
            (vec![line("prod-cola", Some("var-family"), 1, &[])], None),
            // option not linked to the product
            (vec![line("prod-cola", None, 1, &["opt-cheese"])], None),
            // size group requires exactly one
            (vec![line("prod-pizza", Some("var-family"), 1, &[])], None),
            (
                vec![line("prod-pizza", Some("var-family"), 1, &["opt-large", "opt-large"])],
                None,
            ),
            (vec![line("prod-cola", None, 1, &[])], Some(&short)),
            (vec![line("prod-cola", None, 1, &[])], Some(&nan)),
        ];
        for (cart, payment) in cases {
            let err = create_order(&conn, &cart, &ctx(), payment).expect_err("must reject");
            assert!(matches!(err, PosError::Validation(_)), "unexpected: {err}");
        }
        assert_eq!(order_count(&conn), (0, 0));
        // Rejected attempts do not consume order numbers.
        assert_eq!(db::get_config(&conn, db::CONFIG_ORDER_COUNTER).expect("get"), None);
    }

    #[tokio::test]
    async fn failed_item_insert_rolls_back_everything() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        conn.execute_batch(
            "CREATE TRIGGER fail_on_cola BEFORE INSERT ON local_order_items
             WHEN NEW.product_name = 'Cola'
             BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
        )
        .expect("trigger");

        let cart = [
            line("prod-pizza", Some("var-family"), 1, &["opt-large"]),
            line("prod-cola", None, 1, &[]),
        ];
        let err = create_order(&conn, &cart, &ctx(), None).expect_err("must fail");
        assert!(matches!(err, PosError::Store(_)));
        assert_eq!(order_count(&conn), (0, 0));
    }

    #[tokio::test]
    async fn order_numbers_count_up_within_a_day() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let a = create_order(&conn, &[line("prod-cola", None, 1, &[])], &ctx(), None).expect("a");
        let b = create_order(&conn, &[line("prod-cola", None, 1, &[])], &ctx(), None).expect("b");
        assert_eq!(a.order_number, "0001");
        assert_eq!(b.order_number, "0002");

        db::set_config(&conn, db::CONFIG_ORDER_COUNTER_DATE, "2000-01-01").expect("set");
        let c = create_order(&conn, &[line("prod-cola", None, 1, &[])], &ctx(), None).expect("c");
        assert_eq!(c.order_number, "0001");
    }

    #[tokio::test]
    async fn customer_is_snapshotted() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let mut context = ctx();
        context.customer_id = Some("cust-1".into());
        context.order_type = OrderType::Delivery;
        let created =
            create_order(&conn, &[line("prod-cola", None, 1, &[])], &context, None).expect("create");

        conn.execute("UPDATE local_customers SET full_name = 'Renamed'", [])
            .expect("rename");
        let order = get_order(&conn, &created.id).expect("order");
        assert_eq!(order.customer_name.as_deref(), Some("Yasmine"));
        assert_eq!(order.customer_phone.as_deref(), Some("0600000000"));
        assert_eq!(order.delivery_address.as_deref(), Some("1 Main St"));
        assert_eq!(order.order_type, "delivery");
    }

    #[tokio::test]
    async fn status_update_survives_push_failure() {
        let (engine, db, remote) = seeded().await;
        let (order_id, entry) = {
            let conn = db.lock().expect("lock");
            let created =
                create_order(&conn, &[line("prod-cola", None, 1, &[])], &ctx(), None).expect("create");
            let entry = update_order_status(&conn, &created.id, "preparing").expect("update");
            (created.id, entry)
        };

        remote.set_offline(true);
        assert!(!engine.push_order_status(&entry).await);

        let conn = db.lock().expect("lock");
        let order = get_order(&conn, &order_id).expect("order");
        assert_eq!(order.status, "preparing");
        assert_eq!(order.sync_status, SyncMarker::Pending);
        assert!(push_queue::has_pending(&conn, &order_id).expect("queue"));
    }

    #[tokio::test]
    async fn out_of_order_status_is_applied() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let created =
            create_order(&conn, &[line("prod-cola", None, 1, &[])], &ctx(), None).expect("create");
        update_order_status(&conn, &created.id, "delivered").expect("delivered");
        update_order_status(&conn, &created.id, "pending").expect("back to pending");
        assert_eq!(get_order(&conn, &created.id).expect("order").status, "pending");

        let err = update_order_status(&conn, "missing", "ready").expect_err("missing order");
        assert!(matches!(err, PosError::NotFound(_)));
    }

    #[tokio::test]
    async fn pay_order_confirms_pending_orders_only() {
        let (engine, db, remote) = seeded().await;
        let (pending_id, ready_id, entry) = {
            let conn = db.lock().expect("lock");
            let a = create_order(&conn, &[line("prod-cola", None, 2, &[])], &ctx(), None).expect("a");
            let b = create_order(&conn, &[line("prod-cola", None, 1, &[])], &ctx(), None).expect("b");
            update_order_status(&conn, &b.id, "ready").expect("ready");
            let entry = pay_order(&conn, &a.id, "card", 5.0).expect("pay a");
            pay_order(&conn, &b.id, "cash", 5.0).expect("pay b");
            (a.id, b.id, entry)
        };

        assert!(engine.push_payment(&entry).await);
        assert_eq!(
            remote.pushes(),
            vec![(pending_id.clone(), "payment:card:5".to_string())]
        );

        let conn = db.lock().expect("lock");
        let a = get_order(&conn, &pending_id).expect("a");
        assert_eq!((a.status.as_str(), a.payment_status.as_str()), ("confirmed", "paid"));
        assert_eq!(a.amount_returned, Some(0.0));
        let b = get_order(&conn, &ready_id).expect("b");
        assert_eq!(b.status, "ready");
        assert_eq!(b.amount_returned, Some(2.5));
    }

    #[tokio::test]
    async fn short_payment_is_rejected_before_any_write() {
        let (_engine, db, remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let created = create_order(
            &conn,
            &[line("prod-pizza", Some("var-family"), 2, &["opt-large"])],
            &ctx(),
            None,
        )
        .expect("order");
        assert_eq!(created.total_amount, 110.0);

        let err = pay_order(&conn, &created.id, "cash", 1.0).expect_err("short");
        assert!(matches!(err, PosError::Validation(_)));
        assert!(err.to_string().contains("less than total"));

        let order = get_order(&conn, &created.id).expect("order");
        assert_eq!(order.payment_status, PAYMENT_PENDING);
        assert_eq!(order.status, "pending");
        assert_eq!(order.amount_received, None);
        assert!(!push_queue::has_pending(&conn, &created.id).expect("queue"));
        assert!(remote.pushes().is_empty());

        // The exact total is accepted.
        pay_order(&conn, &created.id, "cash", 110.0).expect("exact");
        assert_eq!(get_order(&conn, &created.id).expect("order").amount_returned, Some(0.0));
    }

    #[tokio::test]
    async fn live_orders_exclude_terminal_and_hydrate_items() {
        let (_engine, db, _remote) = seeded().await;
        let conn = db.lock().expect("lock");
        let open = create_order(
            &conn,
            &[line("prod-pizza", Some("var-family"), 1, &["opt-large"])],
            &ctx(),
            None,
        )
        .expect("open");
        let done = create_order(&conn, &[line("prod-cola", None, 1, &[])], &ctx(), None).expect("done");
        update_order_status(&conn, &done.id, "delivered").expect("deliver");

        let live = get_live_orders(&conn).expect("live");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, open.id);
        assert_eq!(live[0].items[0].options.options[0].name, "Large");
    }

    #[tokio::test]
    async fn offline_order_survives_late_sync() {
        let (engine, db, remote) = seeded().await;
        remote.set_offline(true);
        let created = {
            let conn = db.lock().expect("lock");
            create_order(&conn, &[line("prod-cola", None, 2, &[])], &ctx(), None).expect("offline create")
        };
        assert!(engine.live_pull().await.is_err());

        // The remote comes back and even echoes an order with the same id.
        remote.set_offline(false);
        remote.update(|d| {
            d.live_orders = vec![
                remote_order(&created.id, "preparing", &[("remote-item", 9, 1.0)]),
                remote_order("web-7", "pending", &[("w1", 1, 2.5)]),
            ]
        });
        let report = engine.live_pull().await.expect("late sync");
        assert_eq!(report.synced, 1);
        assert_eq!(report.skipped, 1);

        let conn = db.lock().expect("lock");
        let order = get_order(&conn, &created.id).expect("local order");
        assert_eq!(order.status, "pending");
        assert_eq!(order.total_amount, 5.0);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.sync_status, SyncMarker::NewLocal);
        let copies: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM local_orders WHERE id = ?1",
                params![created.id],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(copies, 1);
    }
}

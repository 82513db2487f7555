use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::error::{PosError, PosResult};
use crate::models::{Customer, NewCustomer, SyncMarker};

const SEARCH_LIMIT: i64 = 10;

fn customer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        full_name: row.get(1)?,
        phone: row.get(2)?,
        address: row.get(3)?,
        loyalty_points: row.get(4)?,
    })
}

/// Escape LIKE wildcards so a query of `50%` matches literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Customers whose name or phone contains `query`, at most ten.
pub fn search_customers(conn: &Connection, query: &str) -> PosResult<Vec<Customer>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let pattern = like_pattern(query);
    let mut stmt = conn.prepare(
        "SELECT id, full_name, phone, address, loyalty_points FROM local_customers
         WHERE full_name LIKE ?1 ESCAPE '\\' OR phone LIKE ?1 ESCAPE '\\'
         ORDER BY full_name ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![pattern, SEARCH_LIMIT], customer_from_row)?;
    let customers = rows.collect::<Result<_, _>>()?;
    Ok(customers)
}

/// Create a customer on this terminal. It stays `new_local`, so full pulls
/// keep it.
pub fn create_customer(conn: &Connection, data: &NewCustomer) -> PosResult<Customer> {
    let full_name = data.full_name.trim();
    let phone = data.phone.trim();
    if full_name.is_empty() {
        return Err(PosError::Validation("customer name is required".into()));
    }
    if phone.is_empty() {
        return Err(PosError::Validation("customer phone is required".into()));
    }
    let address = data
        .address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    let customer = Customer {
        id: Uuid::new_v4().to_string(),
        full_name: full_name.to_string(),
        phone: Some(phone.to_string()),
        address,
        loyalty_points: 0,
    };
    conn.execute(
        "INSERT INTO local_customers (id, full_name, phone, address, loyalty_points, sync_status)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![
            customer.id,
            customer.full_name,
            customer.phone,
            customer.address,
            SyncMarker::NewLocal.as_str()
        ],
    )?;
    info!(customer_id = %customer.id, "customer created locally");
    Ok(customer)
}

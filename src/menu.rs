//! Menu reads for the order screen.
//!
//! Everything here reads the local catalog mirror only; the terminal keeps
//! selling from whatever the last full pull left behind.

use rusqlite::{params, Connection};
use std::collections::HashMap;

use crate::error::PosResult;
use crate::models::{
    Category, Ingredient, OptionGroup, OptionItem, Product, ProductKind, ProductOptionGroup,
    ProductVariation,
};

// ---------------------------------------------------------------------------
// Categories & products
// ---------------------------------------------------------------------------

pub fn get_categories(conn: &Connection) -> PosResult<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, image_url, display_order FROM local_categories
         ORDER BY display_order ASC, name ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            image_url: row.get(2)?,
            display_order: row.get(3)?,
        })
    })?;
    let categories = rows.collect::<Result<_, _>>()?;
    Ok(categories)
}

/// Available products of one category.
pub fn get_products_by_category(conn: &Connection, category_id: &str) -> PosResult<Vec<Product>> {
    let mut stmt = conn.prepare(
        "SELECT id, category_id, name, description, price, image_url, is_available, type
         FROM local_products
         WHERE category_id = ?1 AND is_available = 1
         ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![category_id], |row| {
        Ok(Product {
            id: row.get(0)?,
            category_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            price: row.get(4)?,
            image_url: row.get(5)?,
            is_available: row.get(6)?,
            kind: ProductKind::parse_lossy(row.get::<_, Option<String>>(7)?.as_deref()),
        })
    })?;
    let products = rows.collect::<Result<_, _>>()?;
    Ok(products)
}

pub fn get_product_variations(
    conn: &Connection,
    product_id: &str,
) -> PosResult<Vec<ProductVariation>> {
    let mut stmt = conn.prepare(
        "SELECT id, product_id, name, price, is_available, sort_order
         FROM local_product_variations
         WHERE product_id = ?1
         ORDER BY sort_order ASC, name ASC",
    )?;
    let rows = stmt.query_map(params![product_id], |row| {
        Ok(ProductVariation {
            id: row.get(0)?,
            product_id: row.get(1)?,
            name: row.get(2)?,
            price: row.get(3)?,
            is_available: row.get(4)?,
            sort_order: row.get(5)?,
        })
    })?;
    let variations = rows.collect::<Result<_, _>>()?;
    Ok(variations)
}

// ---------------------------------------------------------------------------
// Options & ingredients
// ---------------------------------------------------------------------------

/// Option groups linked to a product, in link order, each with its
/// available items.
pub fn get_product_options(
    conn: &Connection,
    product_id: &str,
) -> PosResult<Vec<ProductOptionGroup>> {
    let mut groups: Vec<ProductOptionGroup> = {
        let mut stmt = conn.prepare(
            "SELECT g.id, g.name, g.type, g.min_selection, g.max_selection, l.sort_order
             FROM local_product_option_links l
             JOIN local_option_groups g ON g.id = l.group_id
             WHERE l.product_id = ?1
             ORDER BY l.sort_order ASC, g.name ASC",
        )?;
        let rows = stmt.query_map(params![product_id], |row| {
            Ok(ProductOptionGroup {
                group: OptionGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    selection_kind: row.get(2)?,
                    min_selection: row.get(3)?,
                    max_selection: row.get(4)?,
                },
                sort_order: row.get(5)?,
                items: Vec::new(),
            })
        })?;
        let groups = rows.collect::<Result<_, _>>()?;
        groups
    };
    if groups.is_empty() {
        return Ok(groups);
    }

    let mut items: HashMap<String, Vec<OptionItem>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT i.id, i.group_id, i.name, i.price, i.is_available
             FROM local_option_items i
             JOIN local_product_option_links l ON l.group_id = i.group_id
             WHERE l.product_id = ?1 AND i.is_available = 1
             ORDER BY i.price ASC, i.name ASC",
        )?;
        let rows = stmt.query_map(params![product_id], |row| {
            Ok(OptionItem {
                id: row.get(0)?,
                group_id: row.get(1)?,
                name: row.get(2)?,
                price: row.get(3)?,
                is_available: row.get(4)?,
            })
        })?;
        for item in rows {
            let item = item?;
            items.entry(item.group_id.clone()).or_default().push(item);
        }
    }

    for group in &mut groups {
        group.items = items.remove(&group.group.id).unwrap_or_default();
    }
    Ok(groups)
}

/// Ingredients a cashier can mark as removed, by name.
pub fn get_product_ingredients(conn: &Connection, product_id: &str) -> PosResult<Vec<Ingredient>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.name, i.is_available
         FROM local_product_ingredients pi
         JOIN local_ingredients i ON i.id = pi.ingredient_id
         WHERE pi.product_id = ?1
         ORDER BY i.name ASC",
    )?;
    let rows = stmt.query_map(params![product_id], |row| {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            is_available: row.get(2)?,
        })
    })?;
    let ingredients = rows.collect::<Result<_, _>>()?;
    Ok(ingredients)
}

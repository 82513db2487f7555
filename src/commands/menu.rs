use super::PosCommands;
use crate::menu;
use crate::models::{Category, Ingredient, Product, ProductOptionGroup, ProductVariation};

impl PosCommands {
    pub fn get_categories(&self) -> Result<Vec<Category>, String> {
        self.with_conn(menu::get_categories)
    }

    pub fn get_products_by_category(&self, category_id: &str) -> Result<Vec<Product>, String> {
        self.with_conn(|conn| menu::get_products_by_category(conn, category_id.trim()))
    }

    pub fn get_product_variations(&self, product_id: &str) -> Result<Vec<ProductVariation>, String> {
        self.with_conn(|conn| menu::get_product_variations(conn, product_id.trim()))
    }

    pub fn get_product_options(&self, product_id: &str) -> Result<Vec<ProductOptionGroup>, String> {
        self.with_conn(|conn| menu::get_product_options(conn, product_id.trim()))
    }

    pub fn get_product_ingredients(&self, product_id: &str) -> Result<Vec<Ingredient>, String> {
        self.with_conn(|conn| menu::get_product_ingredients(conn, product_id.trim()))
    }
}

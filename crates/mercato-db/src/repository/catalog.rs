//! # Catalog Repository
//!
//! Products, categories, and sellable units.
//!
//! The catalog is deliberately thin: the interesting behavior lives in the
//! promotion engine and the ledger, which consume catalog data through
//! [`SellableUnitInfo`] lookups and category ancestor chains.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use mercato_core::category::check_reparent;
use mercato_core::validation::{validate_conversion_factor, validate_name};
use mercato_core::{Category, CoreError, Product, SellableUnit, SellableUnitInfo};

/// Repository for catalog operations.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Categories
    // =========================================================================

    /// Creates a category under an optional parent.
    pub async fn create_category(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> DbResult<Category> {
        validate_name(name).map_err(CoreError::from)?;

        if let Some(parent_id) = parent_id {
            if self.get_category(parent_id).await?.is_none() {
                return Err(CoreError::not_found("Category", parent_id).into());
            }
        }

        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            parent_id: parent_id.map(|p| p.to_string()),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO categories (id, name, parent_id, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&category.id)
            .bind(&category.name)
            .bind(&category.parent_id)
            .bind(category.created_at)
            .execute(&self.pool)
            .await?;

        Ok(category)
    }

    /// Gets a category by ID.
    pub async fn get_category(&self, id: &str) -> DbResult<Option<Category>> {
        let category: Option<Category> =
            sqlx::query_as("SELECT id, name, parent_id, created_at FROM categories WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(category)
    }

    /// Loads all categories as a map, keyed by id.
    ///
    /// The category tree is small (hundreds of rows, not millions); loading
    /// it whole keeps the cycle guard and ancestor walks pure.
    pub async fn category_map(&self) -> DbResult<HashMap<String, Category>> {
        let categories: Vec<Category> =
            sqlx::query_as("SELECT id, name, parent_id, created_at FROM categories")
                .fetch_all(&self.pool)
                .await?;

        Ok(categories.into_iter().map(|c| (c.id.clone(), c)).collect())
    }

    /// Moves a category under a new parent, rejecting cycles.
    pub async fn reparent_category(
        &self,
        category_id: &str,
        new_parent_id: Option<&str>,
    ) -> DbResult<()> {
        let categories = self.category_map().await?;
        check_reparent(&categories, category_id, new_parent_id).map_err(DbError::from)?;

        sqlx::query("UPDATE categories SET parent_id = ?2 WHERE id = ?1")
            .bind(category_id)
            .bind(new_parent_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Creates a product.
    pub async fn create_product(&self, name: &str, category_id: Option<&str>) -> DbResult<Product> {
        validate_name(name).map_err(CoreError::from)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            category_id: category_id.map(|c| c.to_string()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO products (id, name, category_id, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.category_id)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a product by ID.
    pub async fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let product: Option<Product> = sqlx::query_as(
            "SELECT id, name, category_id, is_active, created_at, updated_at FROM products WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    // =========================================================================
    // Sellable Units
    // =========================================================================

    /// Creates a sellable unit for a product.
    ///
    /// ## Errors
    /// - `CoreError::Conflict` - a second active base unit for the product
    pub async fn create_unit(
        &self,
        product_id: &str,
        name: &str,
        conversion_factor: i64,
        is_base_unit: bool,
    ) -> DbResult<SellableUnit> {
        validate_name(name).map_err(CoreError::from)?;
        validate_conversion_factor(conversion_factor).map_err(CoreError::from)?;

        if self.get_product(product_id).await?.is_none() {
            return Err(CoreError::not_found("Product", product_id).into());
        }

        let now = Utc::now();
        let unit = SellableUnit {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            name: name.trim().to_string(),
            conversion_factor,
            is_base_unit,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO sellable_units (
                id, product_id, name, conversion_factor, is_base_unit, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&unit.id)
        .bind(&unit.product_id)
        .bind(&unit.name)
        .bind(unit.conversion_factor)
        .bind(unit.is_base_unit)
        .bind(unit.is_active)
        .bind(unit.created_at)
        .bind(unit.updated_at)
        .execute(&self.pool)
        .await;

        // The partial unique index backs the one-base-unit invariant
        match result {
            Ok(_) => Ok(unit),
            Err(sqlx::Error::Database(e)) if e.message().contains("idx_units_one_base_per_product") => {
                Err(CoreError::conflict(format!(
                    "product {product_id} already has an active base unit"
                ))
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Gets a sellable unit by ID.
    pub async fn get_unit(&self, id: &str) -> DbResult<Option<SellableUnit>> {
        let unit: Option<SellableUnit> = sqlx::query_as(
            r#"
            SELECT id, product_id, name, conversion_factor, is_base_unit, is_active,
                   created_at, updated_at
            FROM sellable_units
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(unit)
    }

    /// Joined lookup: unit + its product name and category, for pricing
    /// context assembly and error messages.
    pub async fn unit_info(&self, unit_id: &str) -> DbResult<Option<SellableUnitInfo>> {
        let info: Option<SellableUnitInfo> = sqlx::query_as(
            r#"
            SELECT u.id AS unit_id,
                   u.product_id,
                   p.name AS product_name,
                   u.name AS unit_name,
                   u.conversion_factor,
                   u.is_base_unit,
                   p.category_id
            FROM sellable_units u
            JOIN products p ON p.id = u.product_id
            WHERE u.id = ?1 AND u.is_active = 1 AND p.is_active = 1
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(info)
    }

    /// Deactivates a unit (soft delete).
    ///
    /// Units referenced by ledger history are never hard-deleted; the audit
    /// trail must keep resolving.
    pub async fn deactivate_unit(&self, unit_id: &str) -> DbResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE sellable_units SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
        )
        .bind(unit_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SellableUnit", unit_id));
        }

        debug!(unit_id, "Unit deactivated");
        Ok(())
    }
}

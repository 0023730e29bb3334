//! Shared fixtures for the database tests.
//!
//! Every test gets its own in-memory database (single connection, fully
//! isolated) seeded with a tiny catalog and one CURRENT price list.

use chrono::{Duration, Utc};

use crate::pool::{Database, DbConfig};
use mercato_core::{Discount, PromotionDetail, PromotionRule};

pub(crate) const WAREHOUSE: &str = "wh-main";

/// A seeded test database: two priced units in a small category tree.
pub(crate) struct TestStore {
    pub db: Database,
    /// "Cola Carton", priced 10000, category beverages → food.
    pub unit_a: String,
    /// "Chips Bag", priced 2000, category snacks → food.
    pub unit_b: String,
    pub category_food: String,
    pub category_beverages: String,
    pub price_list_id: String,
}

pub(crate) async fn seeded_store() -> TestStore {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let catalog = db.catalog();

    let food = catalog.create_category("Food", None).await.unwrap();
    let beverages = catalog
        .create_category("Beverages", Some(&food.id))
        .await
        .unwrap();
    let snacks = catalog
        .create_category("Snacks", Some(&food.id))
        .await
        .unwrap();

    let cola = catalog
        .create_product("Cola", Some(&beverages.id))
        .await
        .unwrap();
    let chips = catalog
        .create_product("Chips", Some(&snacks.id))
        .await
        .unwrap();

    let unit_a = catalog
        .create_unit(&cola.id, "Carton", 12, true)
        .await
        .unwrap();
    let unit_b = catalog.create_unit(&chips.id, "Bag", 1, true).await.unwrap();

    let price_lists = db.price_lists();
    let list = price_lists
        .create(
            "BASE-2026",
            "Base prices",
            Utc::now() - Duration::days(1),
            None,
        )
        .await
        .unwrap();
    price_lists
        .upsert_entry(&list.id, &unit_a.id, 10000)
        .await
        .unwrap();
    price_lists
        .upsert_entry(&list.id, &unit_b.id, 2000)
        .await
        .unwrap();
    price_lists.activate(&list.id).await.unwrap();

    TestStore {
        db,
        unit_a: unit_a.id,
        unit_b: unit_b.id,
        category_food: food.id,
        category_beverages: beverages.id,
        price_list_id: list.id,
    }
}

/// Creates an active rule valid for the next 30 days.
pub(crate) async fn active_rule(
    db: &Database,
    code: &str,
    detail: PromotionDetail,
) -> PromotionRule {
    db.promotions()
        .create(
            code,
            &format!("Rule {code}"),
            Utc::now() - Duration::days(1),
            Utc::now() + Duration::days(30),
            None,
            detail,
        )
        .await
        .unwrap()
}

/// 10% off a single unit.
pub(crate) fn ten_percent_off(unit_id: &str) -> PromotionDetail {
    PromotionDetail::ProductDiscount {
        discount: Discount::Percent { bps: 1000 },
        scope: mercato_core::DiscountScope::Unit {
            unit_id: unit_id.to_string(),
        },
        min_order_value_minor: None,
    }
}

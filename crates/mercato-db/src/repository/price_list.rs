//! # Price List Repository
//!
//! Price list lifecycle and current-price resolution.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPCOMING ──activate──► CURRENT ──pause──► PAUSED                       │
//! │                            │    ◄─resume──   │                          │
//! │                            │                 │                          │
//! │                            └───expire───► EXPIRED ◄──expire─────┘       │
//! │                                           (terminal)                    │
//! │                                                                         │
//! │  INVARIANT: a unit appears in at most one CURRENT list at any instant.  │
//! │  Activation checks the overlap inside the same transaction as the       │
//! │  status flip; the error names the offending list's code.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrent Transitions
//! Manual transitions and the background sweep can race. Every status flip
//! is a guarded UPDATE (`WHERE id = ? AND status = ?`); zero rows affected
//! means the other writer won and the loser reports a conflict instead of
//! silently double-applying.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use mercato_core::validation::{validate_code, validate_date_window, validate_name, validate_price_minor};
use mercato_core::{CoreError, PriceEntry, PriceList, PriceListStatus};

/// Repository for price list operations.
#[derive(Debug, Clone)]
pub struct PriceListRepository {
    pool: SqlitePool,
}

impl PriceListRepository {
    /// Creates a new PriceListRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PriceListRepository { pool }
    }

    /// Creates a price list in the `Upcoming` state.
    pub async fn create(
        &self,
        code: &str,
        name: &str,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
    ) -> DbResult<PriceList> {
        validate_code(code).map_err(CoreError::from)?;
        validate_name(name).map_err(CoreError::from)?;
        validate_date_window(start_date, end_date).map_err(CoreError::from)?;

        let now = Utc::now();
        let list = PriceList {
            id: Uuid::new_v4().to_string(),
            code: code.trim().to_string(),
            name: name.trim().to_string(),
            status: PriceListStatus::Upcoming,
            start_date,
            end_date,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO price_lists (id, code, name, status, start_date, end_date, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&list.id)
        .bind(&list.code)
        .bind(&list.name)
        .bind(list.status)
        .bind(list.start_date)
        .bind(list.end_date)
        .bind(list.created_at)
        .bind(list.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(code = %list.code, "Price list created");
        Ok(list)
    }

    /// Gets a price list by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PriceList>> {
        let list: Option<PriceList> = sqlx::query_as(
            r#"
            SELECT id, code, name, status, start_date, end_date, created_at, updated_at
            FROM price_lists WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(list)
    }

    /// Gets a price list by business code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<PriceList>> {
        let list: Option<PriceList> = sqlx::query_as(
            r#"
            SELECT id, code, name, status, start_date, end_date, created_at, updated_at
            FROM price_lists WHERE code = ?1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(list)
    }

    /// Sets (inserts or replaces) one unit's price on an `Upcoming` list.
    ///
    /// Prices on a live list are immutable; changing a current price means
    /// publishing a new list.
    pub async fn upsert_entry(
        &self,
        price_list_id: &str,
        unit_id: &str,
        sale_price_minor: i64,
    ) -> DbResult<()> {
        validate_price_minor(sale_price_minor).map_err(CoreError::from)?;

        let list = self
            .get_by_id(price_list_id)
            .await?
            .ok_or_else(|| DbError::not_found("PriceList", price_list_id))?;

        if list.status != PriceListStatus::Upcoming {
            return Err(CoreError::conflict(format!(
                "price list {} is {:?}; only upcoming lists are editable",
                list.code, list.status
            ))
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO price_entries (price_list_id, unit_id, sale_price_minor)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (price_list_id, unit_id) DO UPDATE SET
                sale_price_minor = excluded.sale_price_minor
            "#,
        )
        .bind(price_list_id)
        .bind(unit_id)
        .bind(sale_price_minor)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All entries of a list.
    pub async fn entries(&self, price_list_id: &str) -> DbResult<Vec<PriceEntry>> {
        let entries: Vec<PriceEntry> = sqlx::query_as(
            r#"
            SELECT price_list_id, unit_id, sale_price_minor
            FROM price_entries
            WHERE price_list_id = ?1
            ORDER BY unit_id
            "#,
        )
        .bind(price_list_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Activates a list: `Upcoming → Current` or `Paused → Current`.
    ///
    /// ## Errors
    /// - `CoreError::IllegalTransition` - the state machine forbids the move
    /// - `CoreError::Conflict` - the list has not started yet, has no
    ///   entries, or a unit of it is already priced by another CURRENT
    ///   list (the message names its code)
    pub async fn activate(&self, id: &str) -> DbResult<()> {
        self.transition(id, PriceListStatus::Current).await
    }

    /// Pauses a current list.
    pub async fn pause(&self, id: &str) -> DbResult<()> {
        self.transition(id, PriceListStatus::Paused).await
    }

    /// Expires a list (terminal).
    pub async fn expire(&self, id: &str) -> DbResult<()> {
        self.transition(id, PriceListStatus::Expired).await
    }

    /// Applies a guarded status transition.
    async fn transition(&self, id: &str, to: PriceListStatus) -> DbResult<()> {
        let list = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("PriceList", id))?;

        if !list.status.can_transition(to) {
            return Err(
                CoreError::illegal_transition("PriceList", id, list.status, to).into(),
            );
        }

        if to == PriceListStatus::Current {
            if list.start_date > Utc::now() {
                return Err(CoreError::conflict(format!(
                    "price list {} does not start until {}",
                    list.code, list.start_date
                ))
                .into());
            }

            let entry_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM price_entries WHERE price_list_id = ?1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
            if entry_count == 0 {
                return Err(CoreError::conflict(format!(
                    "price list {} has no entries",
                    list.code
                ))
                .into());
            }
        }

        let mut tx = self.pool.begin().await?;

        if to == PriceListStatus::Current {
            // Overlap check inside the same transaction as the flip
            let offender: Option<String> = sqlx::query_scalar(
                r#"
                SELECT pl.code
                FROM price_entries pe
                JOIN price_lists pl ON pl.id = pe.price_list_id
                WHERE pl.status = 'current'
                  AND pl.id != ?1
                  AND pe.unit_id IN (SELECT unit_id FROM price_entries WHERE price_list_id = ?1)
                LIMIT 1
                "#,
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(code) = offender {
                return Err(CoreError::conflict(format!(
                    "unit already priced by CURRENT list {code}"
                ))
                .into());
            }
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE price_lists SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        )
        .bind(id)
        .bind(list.status)
        .bind(to)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Zero rows: a concurrent writer (sweep or operator) moved it first
        if result.rows_affected() == 0 {
            return Err(CoreError::conflict(format!(
                "price list {} changed status concurrently",
                list.code
            ))
            .into());
        }

        tx.commit().await?;

        debug!(code = %list.code, to = ?to, "Price list transitioned");
        Ok(())
    }

    /// Resolves a unit's current sale price, if any CURRENT list prices it.
    pub async fn current_price(&self, unit_id: &str) -> DbResult<Option<i64>> {
        let price: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT pe.sale_price_minor
            FROM price_entries pe
            JOIN price_lists pl ON pl.id = pe.price_list_id
            WHERE pe.unit_id = ?1 AND pl.status = 'current'
            LIMIT 1
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }

    /// Batch current-price resolution for cart evaluation.
    pub async fn current_prices(&self, unit_ids: &[String]) -> DbResult<HashMap<String, i64>> {
        let mut prices = HashMap::with_capacity(unit_ids.len());
        for unit_id in unit_ids {
            if let Some(price) = self.current_price(unit_id).await? {
                prices.insert(unit_id.clone(), price);
            }
        }
        Ok(prices)
    }

    /// Lists due for activation: `Upcoming` with `start_date <= now` and
    /// at least one entry. Entry-less lists are never promoted; the sweep
    /// leaves them for the operator to fill in or delete.
    pub async fn due_for_activation(&self, now: DateTime<Utc>) -> DbResult<Vec<PriceList>> {
        let lists: Vec<PriceList> = sqlx::query_as(
            r#"
            SELECT id, code, name, status, start_date, end_date, created_at, updated_at
            FROM price_lists
            WHERE status = 'upcoming' AND start_date <= ?1
              AND EXISTS (SELECT 1 FROM price_entries WHERE price_list_id = price_lists.id)
            ORDER BY start_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(lists)
    }

    /// Lists due for expiry: live lists with `end_date <= now`.
    pub async fn due_for_expiry(&self, now: DateTime<Utc>) -> DbResult<Vec<PriceList>> {
        let lists: Vec<PriceList> = sqlx::query_as(
            r#"
            SELECT id, code, name, status, start_date, end_date, created_at, updated_at
            FROM price_lists
            WHERE status IN ('current', 'paused')
              AND end_date IS NOT NULL AND end_date <= ?1
            ORDER BY end_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(lists)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded_store;
    use chrono::Duration;

    #[tokio::test]
    async fn test_current_price_resolution() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        assert_eq!(
            price_lists.current_price(&store.unit_a).await.unwrap(),
            Some(10000)
        );
        assert_eq!(price_lists.current_price("u-ghost").await.unwrap(), None);
    }

    /// A unit may be priced by at most one CURRENT list; the conflict
    /// message names the offending list.
    #[tokio::test]
    async fn test_single_current_invariant() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        let second = price_lists
            .create("SPRING-2026", "Spring prices", Utc::now(), None)
            .await
            .unwrap();
        price_lists
            .upsert_entry(&second.id, &store.unit_a, 9000)
            .await
            .unwrap();

        let err = price_lists.activate(&second.id).await.unwrap_err();
        assert!(err.to_string().contains("BASE-2026"), "got: {err}");

        // The seeded list still prices the unit
        assert_eq!(
            price_lists.current_price(&store.unit_a).await.unwrap(),
            Some(10000)
        );
    }

    #[tokio::test]
    async fn test_disjoint_lists_may_both_be_current() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        // Retire the seeded list so the successor has nothing to overlap
        price_lists.expire(&store.price_list_id).await.unwrap();

        let list = price_lists
            .create("NEW-2026", "New prices", Utc::now(), None)
            .await
            .unwrap();
        price_lists
            .upsert_entry(&list.id, &store.unit_a, 11000)
            .await
            .unwrap();
        price_lists.activate(&list.id).await.unwrap();

        assert_eq!(
            price_lists.current_price(&store.unit_a).await.unwrap(),
            Some(11000)
        );
        // unit_b lost its price when the old list expired
        assert_eq!(price_lists.current_price(&store.unit_b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        price_lists.pause(&store.price_list_id).await.unwrap();
        assert_eq!(price_lists.current_price(&store.unit_a).await.unwrap(), None);

        price_lists.activate(&store.price_list_id).await.unwrap();
        price_lists.expire(&store.price_list_id).await.unwrap();

        // Expired is terminal
        let err = price_lists.activate(&store.price_list_id).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::DbError::Domain(CoreError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_live_list_entries_immutable() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        let err = price_lists
            .upsert_entry(&store.price_list_id, &store.unit_a, 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::DbError::Domain(CoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_activation_requires_entries() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        let empty = price_lists
            .create("EMPTY-2026", "Nothing priced", Utc::now() - Duration::hours(1), None)
            .await
            .unwrap();

        let err = price_lists.activate(&empty.id).await.unwrap_err();
        assert!(err.to_string().contains("no entries"), "got: {err}");

        let list = price_lists.get_by_id(&empty.id).await.unwrap().unwrap();
        assert_eq!(list.status, PriceListStatus::Upcoming);
    }

    #[tokio::test]
    async fn test_activation_before_start_date_rejected() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        let future = price_lists
            .create("FUTURE-2026", "Next week", Utc::now() + Duration::days(7), None)
            .await
            .unwrap();
        price_lists
            .upsert_entry(&future.id, &store.unit_a, 9000)
            .await
            .unwrap();

        let err = price_lists.activate(&future.id).await.unwrap_err();
        assert!(err.to_string().contains("does not start"), "got: {err}");

        let list = price_lists.get_by_id(&future.id).await.unwrap().unwrap();
        assert_eq!(list.status, PriceListStatus::Upcoming);
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        let err = price_lists
            .create("BASE-2026", "Duplicate", Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_due_queries() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();
        let now = Utc::now();

        let due_now = price_lists
            .create("DUE-NOW", "Due", now - Duration::hours(1), None)
            .await
            .unwrap();
        price_lists
            .upsert_entry(&due_now.id, &store.unit_a, 9500)
            .await
            .unwrap();
        price_lists
            .create("NOT-YET", "Later", now + Duration::days(1), None)
            .await
            .unwrap();
        // Due by date but empty: never offered for activation
        price_lists
            .create("DUE-EMPTY", "No entries", now - Duration::hours(1), None)
            .await
            .unwrap();

        let due = price_lists.due_for_activation(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].code, "DUE-NOW");

        // Seeded list has no end date, never expires on its own
        assert!(price_lists.due_for_expiry(now).await.unwrap().is_empty());
    }
}

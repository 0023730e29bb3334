//! # Stock Ledger Repository
//!
//! The append-only stock ledger: current on-hand quantities plus an
//! immutable transaction trail per (sellable unit, warehouse).
//!
//! ## The Ledger Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              Every Mutation Is One Atomic Unit                          │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    1. READ   before = quantity_on_hand (0 if no record yet)            │
//! │    2. COMPUTE after = before + delta                                    │
//! │    3. GUARD  after < 0 → ROLLBACK with InsufficientStock               │
//! │    4. UPSERT stock_records.quantity_on_hand = after                     │
//! │    5. APPEND stock_transactions (before, delta, after, kind, ref)       │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  The record and its trail can never drift apart:                        │
//! │  quantity_on_hand = Σ deltas, always.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sign Conventions
//! - `StockIn` / `Return`: delta > 0
//! - `Sale`: delta < 0
//! - `Adjustment`: either sign (stocktake correction)

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use mercato_core::validation::validate_stock_delta;
use mercato_core::{CoreError, StockRecord, StockTransaction, StockTxKind};

/// Repository for stock ledger operations.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Current on-hand quantity. A unit with no record yet is simply zero.
    pub async fn quantity_on_hand(&self, unit_id: &str, warehouse_id: &str) -> DbResult<i64> {
        let qty: Option<i64> = sqlx::query_scalar(
            "SELECT quantity_on_hand FROM stock_records WHERE unit_id = ?1 AND warehouse_id = ?2",
        )
        .bind(unit_id)
        .bind(warehouse_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(qty.unwrap_or(0))
    }

    /// Gets the stock record for a (unit, warehouse) pair, if one exists.
    pub async fn record(&self, unit_id: &str, warehouse_id: &str) -> DbResult<Option<StockRecord>> {
        let record: Option<StockRecord> = sqlx::query_as(
            r#"
            SELECT unit_id, warehouse_id, quantity_on_hand, updated_at
            FROM stock_records
            WHERE unit_id = ?1 AND warehouse_id = ?2
            "#,
        )
        .bind(unit_id)
        .bind(warehouse_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Applies one ledger mutation in its own transaction.
    ///
    /// ## Errors
    /// - `ValidationError::BadDeltaSign` - delta sign violates the kind's
    ///   convention
    /// - `CoreError::InsufficientStock` - the result would be negative;
    ///   nothing is written
    pub async fn adjust(
        &self,
        unit_id: &str,
        warehouse_id: &str,
        kind: StockTxKind,
        delta: i64,
        reference_id: &str,
        notes: Option<&str>,
    ) -> DbResult<StockTransaction> {
        validate_stock_delta(kind, delta).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;
        let entry = adjust_in_tx(&mut tx, unit_id, warehouse_id, kind, delta, reference_id, notes)
            .await?;
        tx.commit().await?;

        Ok(entry)
    }

    /// Records a goods receipt (supplier delivery).
    pub async fn receive(
        &self,
        unit_id: &str,
        warehouse_id: &str,
        quantity: i64,
        reference_id: &str,
    ) -> DbResult<StockTransaction> {
        self.adjust(
            unit_id,
            warehouse_id,
            StockTxKind::StockIn,
            quantity,
            reference_id,
            None,
        )
        .await
    }

    /// Records a stocktake: sets on-hand to the externally counted value.
    ///
    /// The delta is whatever closes the gap between the ledger and the
    /// count; a count matching the ledger writes nothing.
    pub async fn stocktake(
        &self,
        unit_id: &str,
        warehouse_id: &str,
        counted: i64,
        reference_id: &str,
        notes: Option<&str>,
    ) -> DbResult<Option<StockTransaction>> {
        if counted < 0 {
            return Err(CoreError::from(
                mercato_core::ValidationError::MustBePositive {
                    field: "counted quantity".to_string(),
                },
            )
            .into());
        }

        let mut tx = self.pool.begin().await?;

        let before: Option<i64> = sqlx::query_scalar(
            "SELECT quantity_on_hand FROM stock_records WHERE unit_id = ?1 AND warehouse_id = ?2",
        )
        .bind(unit_id)
        .bind(warehouse_id)
        .fetch_optional(&mut *tx)
        .await?;
        let before = before.unwrap_or(0);

        let delta = counted - before;
        if delta == 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let entry = adjust_in_tx(
            &mut tx,
            unit_id,
            warehouse_id,
            StockTxKind::Adjustment,
            delta,
            reference_id,
            notes,
        )
        .await?;
        tx.commit().await?;

        Ok(Some(entry))
    }

    /// Ledger history for a (unit, warehouse) pair, newest first.
    pub async fn history(
        &self,
        unit_id: &str,
        warehouse_id: &str,
        limit: i64,
    ) -> DbResult<Vec<StockTransaction>> {
        let entries: Vec<StockTransaction> = sqlx::query_as(
            r#"
            SELECT id, unit_id, warehouse_id, before_quantity, delta, after_quantity,
                   kind, reference_id, notes, created_at
            FROM stock_transactions
            WHERE unit_id = ?1 AND warehouse_id = ?2
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(unit_id)
        .bind(warehouse_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Sum of all deltas ever recorded for a (unit, warehouse) pair.
    ///
    /// Always equals `quantity_on_hand`; used by tests and consistency
    /// checks.
    pub async fn ledger_sum(&self, unit_id: &str, warehouse_id: &str) -> DbResult<i64> {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(delta) FROM stock_transactions WHERE unit_id = ?1 AND warehouse_id = ?2",
        )
        .bind(unit_id)
        .bind(warehouse_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum.unwrap_or(0))
    }
}

/// Applies one ledger mutation on an existing connection.
///
/// Used directly by the checkout orchestrator and return processor so stock
/// debits/credits share the caller's transaction; callers are responsible
/// for validating the delta sign first.
pub async fn adjust_in_tx(
    conn: &mut SqliteConnection,
    unit_id: &str,
    warehouse_id: &str,
    kind: StockTxKind,
    delta: i64,
    reference_id: &str,
    notes: Option<&str>,
) -> DbResult<StockTransaction> {
    let before: Option<i64> = sqlx::query_scalar(
        "SELECT quantity_on_hand FROM stock_records WHERE unit_id = ?1 AND warehouse_id = ?2",
    )
    .bind(unit_id)
    .bind(warehouse_id)
    .fetch_optional(&mut *conn)
    .await?;
    let before = before.unwrap_or(0);
    let after = before + delta;

    if after < 0 {
        let unit = display_name(conn, unit_id).await?;
        return Err(CoreError::InsufficientStock {
            unit,
            available: before,
            requested: -delta,
        }
        .into());
    }

    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO stock_records (unit_id, warehouse_id, quantity_on_hand, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (unit_id, warehouse_id) DO UPDATE SET
            quantity_on_hand = excluded.quantity_on_hand,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(unit_id)
    .bind(warehouse_id)
    .bind(after)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let entry = StockTransaction {
        id: Uuid::new_v4().to_string(),
        unit_id: unit_id.to_string(),
        warehouse_id: warehouse_id.to_string(),
        before_quantity: before,
        delta,
        after_quantity: after,
        kind,
        reference_id: reference_id.to_string(),
        notes: notes.map(|n| n.to_string()),
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO stock_transactions (
            id, unit_id, warehouse_id, before_quantity, delta, after_quantity,
            kind, reference_id, notes, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.unit_id)
    .bind(&entry.warehouse_id)
    .bind(entry.before_quantity)
    .bind(entry.delta)
    .bind(entry.after_quantity)
    .bind(entry.kind)
    .bind(&entry.reference_id)
    .bind(&entry.notes)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;

    debug!(
        unit_id,
        warehouse_id,
        delta,
        after,
        kind = ?kind,
        "Ledger entry appended"
    );

    Ok(entry)
}

/// Product + unit name for error messages; falls back to the raw id.
async fn display_name(conn: &mut SqliteConnection, unit_id: &str) -> DbResult<String> {
    let name: Option<String> = sqlx::query_scalar(
        r#"
        SELECT p.name || ' ' || u.name
        FROM sellable_units u
        JOIN products p ON p.id = u.product_id
        WHERE u.id = ?1
        "#,
    )
    .bind(unit_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(name.unwrap_or_else(|| unit_id.to_string()))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::testutil::{seeded_store, WAREHOUSE};
    use mercato_core::ValidationError;

    #[tokio::test]
    async fn test_receive_sale_return_cycle() {
        let store = seeded_store().await;
        let stock = store.db.stock();

        stock
            .receive(&store.unit_a, WAREHOUSE, 10, "GRN-1")
            .await
            .unwrap();
        stock
            .adjust(&store.unit_a, WAREHOUSE, StockTxKind::Sale, -4, "ORD-1", None)
            .await
            .unwrap();
        stock
            .adjust(&store.unit_a, WAREHOUSE, StockTxKind::Return, 1, "RET-1", None)
            .await
            .unwrap();

        assert_eq!(stock.quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(), 7);
    }

    /// quantity_on_hand always equals the sum of ledger deltas.
    #[tokio::test]
    async fn test_record_matches_ledger_sum() {
        let store = seeded_store().await;
        let stock = store.db.stock();

        stock.receive(&store.unit_a, WAREHOUSE, 20, "GRN-1").await.unwrap();
        stock
            .adjust(&store.unit_a, WAREHOUSE, StockTxKind::Sale, -5, "ORD-1", None)
            .await
            .unwrap();
        stock
            .stocktake(&store.unit_a, WAREHOUSE, 12, "CNT-1", Some("damaged"))
            .await
            .unwrap();

        let on_hand = stock.quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap();
        let sum = stock.ledger_sum(&store.unit_a, WAREHOUSE).await.unwrap();
        assert_eq!(on_hand, 12);
        assert_eq!(sum, on_hand);
    }

    #[tokio::test]
    async fn test_overdraw_rolls_back_cleanly() {
        let store = seeded_store().await;
        let stock = store.db.stock();

        stock.receive(&store.unit_a, WAREHOUSE, 3, "GRN-1").await.unwrap();

        let err = stock
            .adjust(&store.unit_a, WAREHOUSE, StockTxKind::Sale, -5, "ORD-1", None)
            .await
            .unwrap_err();
        match err {
            DbError::Domain(CoreError::InsufficientStock {
                available,
                requested,
                ref unit,
            }) => {
                assert_eq!(available, 3);
                assert_eq!(requested, 5);
                // Error names the unit, not its uuid
                assert!(unit.contains("Cola"));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        // Nothing was written: no phantom ledger entry, quantity unchanged
        assert_eq!(stock.quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(), 3);
        assert_eq!(stock.history(&store.unit_a, WAREHOUSE, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delta_sign_conventions_enforced() {
        let store = seeded_store().await;
        let stock = store.db.stock();

        let err = stock
            .adjust(&store.unit_a, WAREHOUSE, StockTxKind::StockIn, -5, "GRN-1", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::Validation(ValidationError::BadDeltaSign { .. }))
        ));

        let err = stock
            .adjust(&store.unit_a, WAREHOUSE, StockTxKind::Sale, 5, "ORD-1", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::Validation(ValidationError::BadDeltaSign { .. }))
        ));
    }

    #[tokio::test]
    async fn test_stocktake_noop_when_count_matches() {
        let store = seeded_store().await;
        let stock = store.db.stock();

        stock.receive(&store.unit_a, WAREHOUSE, 8, "GRN-1").await.unwrap();

        let entry = stock
            .stocktake(&store.unit_a, WAREHOUSE, 8, "CNT-1", None)
            .await
            .unwrap();
        assert!(entry.is_none());
        assert_eq!(stock.history(&store.unit_a, WAREHOUSE, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_entries_chain() {
        let store = seeded_store().await;
        let stock = store.db.stock();

        stock.receive(&store.unit_a, WAREHOUSE, 10, "GRN-1").await.unwrap();
        stock
            .adjust(&store.unit_a, WAREHOUSE, StockTxKind::Sale, -2, "ORD-1", None)
            .await
            .unwrap();

        let history = stock.history(&store.unit_a, WAREHOUSE, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        // Newest first; every row satisfies after = before + delta
        for entry in &history {
            assert_eq!(entry.after_quantity, entry.before_quantity + entry.delta);
        }
        assert_eq!(history[0].kind, StockTxKind::Sale);
        assert_eq!(history[0].reference_id, "ORD-1");
    }
}

//! # Return Processor
//!
//! Whole-invoice returns after delivery.
//!
//! ## Return Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Invoice (ISSUED)                                                       │
//! │       │  process_return(invoice_id, reason)                             │
//! │       ▼                                                                 │
//! │  One transaction:                                                       │
//! │    1. Invoice ISSUED → RETURNED (guarded; a second return fails)        │
//! │    2. Ledger RETURN credit per unit, gifts included                     │
//! │    3. ReturnDocument { refund = amount paid at sale time }              │
//! │                                                                         │
//! │  The refund is the historical amount paid - current price lists play    │
//! │  no part in it. The order itself stays COMPLETED; RETURNED is a         │
//! │  terminal invoice state, not an order state.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::checkout::credit_lines;
use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::order::{generate_return_code, mark_invoice_returned_in_tx};
use mercato_core::{CoreError, InvoiceStatus, ReturnDocument};

/// Processes whole-invoice returns.
#[derive(Debug, Clone)]
pub struct ReturnProcessor {
    db: Database,
}

impl ReturnProcessor {
    /// Creates a new return processor over a database handle.
    pub fn new(db: Database) -> Self {
        ReturnProcessor { db }
    }

    /// Returns a delivered invoice in full.
    ///
    /// ## Errors
    /// - `DbError::NotFound` - unknown invoice
    /// - `CoreError::Conflict` - the invoice was already returned
    pub async fn process_return(
        &self,
        invoice_id: &str,
        reason: &str,
    ) -> DbResult<ReturnDocument> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::from(mercato_core::ValidationError::Required {
                field: "reason".to_string(),
            })
            .into());
        }

        let orders = self.db.orders();
        let invoice = orders
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;

        if invoice.status != InvoiceStatus::Issued {
            return Err(CoreError::conflict(format!(
                "invoice {} was already returned",
                invoice.code
            ))
            .into());
        }

        let order = orders
            .get_by_id(&invoice.order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", &invoice.order_id))?;
        let lines = orders.lines(&order.id).await?;

        let document = ReturnDocument {
            id: Uuid::new_v4().to_string(),
            code: generate_return_code(),
            invoice_id: invoice.id.clone(),
            reason: reason.to_string(),
            // Historical: what was actually paid, not today's prices
            refund_amount_minor: invoice.amount_paid_minor,
            created_at: Utc::now(),
        };

        let mut tx = self.db.pool().begin().await?;

        mark_invoice_returned_in_tx(&mut tx, &invoice.id).await?;
        credit_lines(&mut tx, &lines, &order.warehouse_id, &document.code).await?;

        sqlx::query(
            r#"
            INSERT INTO return_documents (id, code, invoice_id, reason, refund_amount_minor, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&document.id)
        .bind(&document.code)
        .bind(&document.invoice_id)
        .bind(&document.reason)
        .bind(document.refund_amount_minor)
        .bind(document.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            code = %document.code,
            invoice = %invoice.code,
            refund = document.refund_amount_minor,
            "Invoice returned"
        );
        Ok(document)
    }

    /// Gets a return document by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<ReturnDocument>> {
        let document: Option<ReturnDocument> = sqlx::query_as(
            r#"
            SELECT id, code, invoice_id, reason, refund_amount_minor, created_at
            FROM return_documents WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(document)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::CheckoutRequest;
    use crate::testutil::{active_rule, seeded_store, ten_percent_off, TestStore, WAREHOUSE};
    use mercato_core::{CartLine, Invoice, OrderStatus, PaymentMethod};

    /// Stocks up, sells `quantity` of unit_a for cash, and walks the order
    /// through to delivery. Returns the issued invoice.
    async fn sell_and_deliver(store: &TestStore, quantity: i64) -> Invoice {
        store
            .db
            .stock()
            .receive(&store.unit_a, WAREHOUSE, 10, "PO-TEST")
            .await
            .unwrap();

        let checkout = store.db.checkout();
        let order = checkout
            .checkout(CheckoutRequest {
                lines: vec![CartLine {
                    unit_id: store.unit_a.clone(),
                    quantity,
                }],
                payment_method: PaymentMethod::Cash,
                warehouse_id: WAREHOUSE.to_string(),
                customer_ref: None,
                delivery_address: None,
            })
            .await
            .unwrap();
        checkout.transition(&order.id, OrderStatus::Prepared).await.unwrap();
        checkout.transition(&order.id, OrderStatus::Delivered).await.unwrap();

        store
            .db
            .orders()
            .invoice_for_order(&order.id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_return_credits_stock_and_refunds_amount_paid() {
        let store = seeded_store().await;
        let invoice = sell_and_deliver(&store, 3).await;

        let stock = store.db.stock();
        assert_eq!(stock.quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(), 7);

        let document = store
            .db
            .returns()
            .process_return(&invoice.id, "damaged in transit")
            .await
            .unwrap();

        assert_eq!(document.refund_amount_minor, invoice.amount_paid_minor);
        assert_eq!(stock.quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(), 10);

        let returned = store
            .db
            .orders()
            .get_invoice(&invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(returned.status, InvoiceStatus::Returned);

        // The order record itself is untouched by the return
        let order = store
            .db
            .orders()
            .get_by_id(&invoice.order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_double_return_rejected() {
        let store = seeded_store().await;
        let invoice = sell_and_deliver(&store, 1).await;

        store
            .db
            .returns()
            .process_return(&invoice.id, "wrong item")
            .await
            .unwrap();

        let err = store
            .db
            .returns()
            .process_return(&invoice.id, "wrong item")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Conflict { .. })));

        // Stock credited exactly once
        assert_eq!(
            store
                .db
                .stock()
                .quantity_on_hand(&store.unit_a, WAREHOUSE)
                .await
                .unwrap(),
            10
        );
    }

    /// The refund is what was paid, not what the unit costs today.
    #[tokio::test]
    async fn test_refund_survives_price_change() {
        let store = seeded_store().await;
        active_rule(&store.db, "COLA-10", ten_percent_off(&store.unit_a)).await;
        let invoice = sell_and_deliver(&store, 2).await;
        assert_eq!(invoice.amount_paid_minor, 18000);

        // Reprice the unit before the customer comes back
        let price_lists = store.db.price_lists();
        price_lists.expire(&store.price_list_id).await.unwrap();
        let repriced = price_lists
            .create("REPRICE-2026", "New prices", Utc::now(), None)
            .await
            .unwrap();
        price_lists
            .upsert_entry(&repriced.id, &store.unit_a, 50000)
            .await
            .unwrap();
        price_lists.activate(&repriced.id).await.unwrap();

        let document = store
            .db
            .returns()
            .process_return(&invoice.id, "changed my mind")
            .await
            .unwrap();
        assert_eq!(document.refund_amount_minor, 18000);
    }

    #[tokio::test]
    async fn test_blank_reason_rejected() {
        let store = seeded_store().await;
        let invoice = sell_and_deliver(&store, 1).await;

        let err = store
            .db
            .returns()
            .process_return(&invoice.id, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
    }
}

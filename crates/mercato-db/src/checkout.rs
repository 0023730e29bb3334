//! # Checkout Orchestrator
//!
//! Drives a cart through evaluation, stock-debited order creation, payment
//! confirmation, and the order state machine.
//!
//! ## Checkout Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. EVALUATE   cart + current prices + rules → PricedCart               │
//! │                (pure, in mercato-core; this module assembles context)   │
//! │                                                                         │
//! │  2. AGGREGATE  required quantity per unit over ALL lines,               │
//! │                paying and gift alike - a gift consumes real stock       │
//! │                                                                         │
//! │  3. PERSIST    one transaction:                                         │
//! │                  INSERT order + lines                                   │
//! │                  per distinct unit: ledger SALE debit                   │
//! │                any failed debit rolls back everything                   │
//! │                                                                         │
//! │  4. PAY        confirm_payment: UNPAID → PENDING, idempotent            │
//! │                                                                         │
//! │  5. FULFILL    PENDING → PREPARED → [SHIPPING] → DELIVERED              │
//! │                DELIVERED issues the invoice, counts rule usage once     │
//! │                per distinct rule, and auto-advances to COMPLETED        │
//! │                                                                         │
//! │  X. CANCEL     any pre-delivery state; credits stock back (RETURN)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Contention
//! SQLite allows a single writer. A `database is locked` failure is retried
//! a bounded number of times with a short backoff; domain failures such as
//! InsufficientStock are surfaced immediately, never retried.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::order::{
    generate_invoice_code, generate_order_code, insert_invoice_in_tx, insert_line_in_tx,
    insert_order_in_tx, update_status_guarded_in_tx,
};
use crate::repository::promotion::increment_usage_in_tx;
use crate::repository::stock::adjust_in_tx;
use mercato_core::cart::CartSession;
use mercato_core::category::ancestor_chain;
use mercato_core::validation::validate_cart_lines;
use mercato_core::{
    evaluate, CartLine, CoreError, Invoice, InvoiceStatus, Money, Order, OrderLine, OrderStatus,
    PaymentMethod, PricedCart, PromotionDetail, StockTxKind, UnitContext,
};

/// Bounded retries for SQLite write contention.
const BUSY_RETRIES: u32 = 3;

/// A checkout submission.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub lines: Vec<CartLine>,
    pub payment_method: PaymentMethod,
    /// Warehouse the stock is debited from.
    pub warehouse_id: String,
    pub customer_ref: Option<String>,
    pub delivery_address: Option<String>,
}

/// Orchestrates checkout and the order lifecycle.
#[derive(Debug, Clone)]
pub struct CheckoutOrchestrator {
    db: Database,
}

impl CheckoutOrchestrator {
    /// Creates a new orchestrator over a database handle.
    pub fn new(db: Database) -> Self {
        CheckoutOrchestrator { db }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Prices a cart against current price lists and eligible rules.
    ///
    /// Read-only: no stock is touched, no order is created. The storefront
    /// calls this on every cart change.
    pub async fn evaluate_cart(&self, lines: &[CartLine]) -> DbResult<PricedCart> {
        validate_cart_lines(lines).map_err(CoreError::from)?;

        let now = Utc::now();
        let rules = self.db.promotions().eligible_rules(now).await?;

        // Context must cover requested units AND potential gift units, so
        // a triggered rule can price the line it synthesizes.
        let mut unit_ids: BTreeSet<String> =
            lines.iter().map(|l| l.unit_id.clone()).collect();
        for rule in &rules {
            if let PromotionDetail::BuyXGetY { gift_unit_id, .. } = &rule.detail {
                unit_ids.insert(gift_unit_id.clone());
            }
        }

        let catalog = self.db.catalog();
        let price_lists = self.db.price_lists();
        let categories = catalog.category_map().await?;
        let ids: Vec<String> = unit_ids.iter().cloned().collect();
        let prices = price_lists.current_prices(&ids).await?;

        let mut units: HashMap<String, UnitContext> = HashMap::with_capacity(unit_ids.len());
        for unit_id in &unit_ids {
            let Some(info) = catalog.unit_info(unit_id).await? else {
                // Unknown units stay absent; the engine reports NotFound
                // only for lines that actually reference them.
                continue;
            };
            let price = prices.get(unit_id).copied().map(Money::from_minor);
            let category_chain = info
                .category_id
                .as_deref()
                .map(|c| ancestor_chain(&categories, c))
                .unwrap_or_default();

            units.insert(
                unit_id.clone(),
                UnitContext {
                    unit_id: info.unit_id,
                    display_name: format!("{} {}", info.product_name, info.unit_name),
                    price,
                    category_chain,
                },
            );
        }

        let cart = evaluate(lines, &units, &rules, now)?;
        Ok(cart)
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Evaluates the cart and creates the order, debiting stock atomically.
    ///
    /// ## Errors
    /// - `CoreError::InsufficientStock` - any unit (gift quantities counted
    ///   in) short; the whole checkout rolls back
    /// - `DbError::Busy` - write contention outlasted the bounded retry
    pub async fn checkout(&self, request: CheckoutRequest) -> DbResult<Order> {
        let priced = self.evaluate_cart(&request.lines).await?;

        let mut attempt = 0;
        loop {
            match self.persist_checkout(&request, &priced).await {
                Err(e) if e.is_busy() && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "Checkout hit write contention, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                other => return other,
            }
        }
    }

    /// Checks out an in-memory cart session, clearing it once the order
    /// is committed. A failed checkout leaves the cart intact for retry.
    pub async fn checkout_session(
        &self,
        session: &CartSession,
        payment_method: PaymentMethod,
        warehouse_id: &str,
    ) -> DbResult<Order> {
        let lines = session.with_cart(|cart| cart.lines().to_vec());
        let order = self
            .checkout(CheckoutRequest {
                lines,
                payment_method,
                warehouse_id: warehouse_id.to_string(),
                customer_ref: None,
                delivery_address: None,
            })
            .await?;

        session.with_cart_mut(|cart| cart.clear());
        Ok(order)
    }

    /// One attempt at the checkout transaction.
    async fn persist_checkout(
        &self,
        request: &CheckoutRequest,
        priced: &PricedCart,
    ) -> DbResult<Order> {
        let now = Utc::now();
        let order_id = Uuid::new_v4().to_string();
        let code = generate_order_code();

        // Cash settles on delivery; online orders start unpaid and wait
        // for the gateway confirmation.
        let status = match request.payment_method {
            PaymentMethod::Cash => OrderStatus::Pending,
            PaymentMethod::Online => OrderStatus::Unpaid,
        };

        let order = Order {
            id: order_id.clone(),
            code: code.clone(),
            status,
            payment_method: request.payment_method,
            warehouse_id: request.warehouse_id.clone(),
            customer_ref: request.customer_ref.clone(),
            delivery_address: request.delivery_address.clone(),
            subtotal_minor: priced.subtotal.minor(),
            line_item_discount_minor: priced.line_item_discount.minor(),
            order_discount_minor: priced.order_discount.minor(),
            total_amount_minor: priced.total_payable.minor(),
            amount_paid_minor: 0,
            order_discount_rule_id: priced.order_discount_rule_id.clone(),
            payment_txn_ref: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        // Gift lines consume real stock: aggregate per unit over all lines
        // before debiting, so two lines of one unit cannot slip past the
        // availability guard separately.
        let mut required: BTreeMap<String, i64> = BTreeMap::new();
        for line in &priced.lines {
            *required.entry(line.unit_id.clone()).or_insert(0) += line.quantity;
        }

        let mut tx = self.db.pool().begin().await?;

        insert_order_in_tx(&mut tx, &order).await?;

        for line in &priced.lines {
            let order_line = OrderLine {
                id: line.line_id.clone(),
                order_id: order_id.clone(),
                unit_id: line.unit_id.clone(),
                name_snapshot: line.display_name.clone(),
                quantity: line.quantity,
                unit_price_minor: line.unit_price.minor(),
                line_subtotal_minor: line.line_subtotal.minor(),
                discount_minor: line.discount.minor(),
                line_total_minor: line.line_total.minor(),
                applied_rule_id: line.applied_rule_id.clone(),
                source_line_id: line.source_line_id.clone(),
                is_gift: line.is_gift,
                created_at: now,
            };
            insert_line_in_tx(&mut tx, &order_line).await?;
        }

        for (unit_id, quantity) in &required {
            adjust_in_tx(
                &mut tx,
                unit_id,
                &request.warehouse_id,
                StockTxKind::Sale,
                -quantity,
                &code,
                None,
            )
            .await?;
        }

        tx.commit().await?;

        info!(
            code = %order.code,
            total = order.total_amount_minor,
            lines = priced.lines.len(),
            "Order created"
        );
        Ok(order)
    }

    // =========================================================================
    // Payment
    // =========================================================================

    /// Confirms an online payment: `UNPAID → PENDING`, stamping the gateway
    /// transaction reference.
    ///
    /// Idempotent: a repeat confirmation with the same reference returns the
    /// order unchanged (gateway callbacks redeliver).
    pub async fn confirm_payment(&self, order_id: &str, txn_ref: &str) -> DbResult<Order> {
        let orders = self.db.orders();
        let order = orders
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))?;

        // Redelivered callback for an already confirmed payment
        if order.status != OrderStatus::Unpaid {
            if order.payment_txn_ref.as_deref() == Some(txn_ref) {
                debug!(order_id, txn_ref, "Payment already confirmed");
                return Ok(order);
            }
            return Err(CoreError::conflict(format!(
                "order {} is {:?} with a different payment reference",
                order.code, order.status
            ))
            .into());
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = 'pending',
                amount_paid_minor = total_amount_minor,
                payment_txn_ref = ?2,
                updated_at = ?3
            WHERE id = ?1 AND status = 'unpaid'
            "#,
        )
        .bind(order_id)
        .bind(txn_ref)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            // Lost the race to a concurrent confirmation; re-check
            let current = orders
                .get_by_id(order_id)
                .await?
                .ok_or_else(|| DbError::not_found("Order", order_id))?;
            if current.payment_txn_ref.as_deref() == Some(txn_ref) {
                return Ok(current);
            }
            return Err(CoreError::conflict(format!(
                "order {} was confirmed with a different payment reference",
                current.code
            ))
            .into());
        }

        info!(order_id, txn_ref, "Payment confirmed");
        orders
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))
    }

    // =========================================================================
    // State Machine
    // =========================================================================

    /// Moves an order to a new status, running the transition's side
    /// effects atomically.
    ///
    /// ## Special Transitions
    /// - `DELIVERED`: issues the invoice, counts each distinct applied
    ///   rule's usage once, and auto-advances to `COMPLETED`
    /// - `CANCELLED`: credits debited stock back (RETURN entries)
    /// - `COMPLETED`: rejected; it is only reachable through `DELIVERED`
    pub async fn transition(&self, order_id: &str, to: OrderStatus) -> DbResult<Order> {
        let orders = self.db.orders();
        let order = orders
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))?;

        // Completed is the automatic tail of Delivered, never a manual move
        if to == OrderStatus::Completed || !order.status.can_transition(to) {
            return Err(
                CoreError::illegal_transition("Order", order_id, order.status, to).into(),
            );
        }

        match to {
            OrderStatus::Delivered => self.deliver(&order).await?,
            OrderStatus::Cancelled => self.cancel(&order).await?,
            _ => {
                let mut tx = self.db.pool().begin().await?;
                let moved =
                    update_status_guarded_in_tx(&mut tx, order_id, order.status, to).await?;
                if !moved {
                    return Err(concurrent_move(&order).into());
                }
                tx.commit().await?;
            }
        }

        orders
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))
    }

    /// The DELIVERED transition and its side effects, in one transaction.
    async fn deliver(&self, order: &Order) -> DbResult<()> {
        let mut tx = self.db.pool().begin().await?;

        let moved =
            update_status_guarded_in_tx(&mut tx, &order.id, order.status, OrderStatus::Delivered)
                .await?;
        if !moved {
            return Err(concurrent_move(order).into());
        }

        // Cash settles at the door
        if order.payment_method == PaymentMethod::Cash {
            sqlx::query(
                "UPDATE orders SET amount_paid_minor = total_amount_minor WHERE id = ?1",
            )
            .bind(&order.id)
            .execute(&mut *tx)
            .await?;
        }

        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            code: generate_invoice_code(),
            order_id: order.id.clone(),
            status: InvoiceStatus::Issued,
            total_amount_minor: order.total_amount_minor,
            amount_paid_minor: order.total_amount_minor,
            issued_at: Utc::now(),
        };
        insert_invoice_in_tx(&mut tx, &invoice).await?;

        let rule_ids =
            crate::repository::order::distinct_rule_ids_in_tx(&mut tx, &order.id).await?;
        for rule_id in &rule_ids {
            increment_usage_in_tx(&mut tx, rule_id).await?;
        }

        // Delivered is transient; the order lands in Completed
        let completed = update_status_guarded_in_tx(
            &mut tx,
            &order.id,
            OrderStatus::Delivered,
            OrderStatus::Completed,
        )
        .await?;
        if !completed {
            return Err(concurrent_move(order).into());
        }

        tx.commit().await?;

        info!(
            code = %order.code,
            invoice = %invoice.code,
            rules_counted = rule_ids.len(),
            "Order delivered and completed"
        );
        Ok(())
    }

    /// Cancellation: status flip plus stock credit, in one transaction.
    async fn cancel(&self, order: &Order) -> DbResult<()> {
        let mut tx = self.db.pool().begin().await?;

        let moved =
            update_status_guarded_in_tx(&mut tx, &order.id, order.status, OrderStatus::Cancelled)
                .await?;
        if !moved {
            return Err(concurrent_move(order).into());
        }

        // Credit back exactly what checkout debited
        let lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT id, order_id, unit_id, name_snapshot, quantity,
                   unit_price_minor, line_subtotal_minor, discount_minor,
                   line_total_minor, applied_rule_id, source_line_id, is_gift,
                   created_at
            FROM order_lines WHERE order_id = ?1
            "#,
        )
        .bind(&order.id)
        .fetch_all(&mut *tx)
        .await?;

        credit_lines(&mut tx, &lines, &order.warehouse_id, &order.code).await?;

        tx.commit().await?;

        info!(code = %order.code, "Order cancelled, stock credited");
        Ok(())
    }
}

/// Credits the stock of a set of order lines back, aggregated per unit.
pub(crate) async fn credit_lines(
    conn: &mut SqliteConnection,
    lines: &[OrderLine],
    warehouse_id: &str,
    reference_id: &str,
) -> DbResult<()> {
    let mut credits: BTreeMap<String, i64> = BTreeMap::new();
    for line in lines {
        *credits.entry(line.unit_id.clone()).or_insert(0) += line.quantity;
    }

    for (unit_id, quantity) in &credits {
        adjust_in_tx(
            conn,
            unit_id,
            warehouse_id,
            StockTxKind::Return,
            *quantity,
            reference_id,
            None,
        )
        .await?;
    }

    Ok(())
}

fn concurrent_move(order: &Order) -> CoreError {
    CoreError::conflict(format!(
        "order {} changed status concurrently",
        order.code
    ))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{active_rule, seeded_store, ten_percent_off, TestStore, WAREHOUSE};
    use mercato_core::{Discount, DiscountScope, TriggerTarget, TriggerThreshold};

    fn line(unit_id: &str, quantity: i64) -> CartLine {
        CartLine {
            unit_id: unit_id.to_string(),
            quantity,
        }
    }

    fn request(store: &TestStore, lines: Vec<CartLine>, payment: PaymentMethod) -> CheckoutRequest {
        CheckoutRequest {
            lines,
            payment_method: payment,
            warehouse_id: WAREHOUSE.to_string(),
            customer_ref: None,
            delivery_address: None,
        }
    }

    async fn stock_up(store: &TestStore, unit_id: &str, quantity: i64) {
        store
            .db
            .stock()
            .receive(unit_id, WAREHOUSE, quantity, "PO-TEST")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_evaluate_cart_layers_line_then_order_discounts() {
        let store = seeded_store().await;

        // 10% off colas, then 5% off the whole order above 150.00
        active_rule(&store.db, "COLA-10", ten_percent_off(&store.unit_a)).await;
        active_rule(
            &store.db,
            "BIG-BASKET",
            PromotionDetail::OrderDiscount {
                discount: Discount::Percent { bps: 500 },
                max_discount_minor: None,
                min_order_value_minor: Some(15000),
                min_order_quantity: None,
            },
        )
        .await;

        let priced = store
            .db
            .checkout()
            .evaluate_cart(&[line(&store.unit_a, 2), line(&store.unit_b, 1)])
            .await
            .unwrap();

        // 2 x 10000 + 1 x 2000 = 22000; 10% off colas = 2000;
        // 5% of (22000 - 2000) = 1000
        assert_eq!(priced.subtotal.minor(), 22000);
        assert_eq!(priced.line_item_discount.minor(), 2000);
        assert_eq!(priced.order_discount.minor(), 1000);
        assert_eq!(priced.total_payable.minor(), 19000);
        assert!(priced.order_discount_rule_id.is_some());
    }

    #[tokio::test]
    async fn test_checkout_debits_gift_stock() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 10).await;
        stock_up(&store, &store.unit_b, 5).await;

        // Buy 3 cartons of cola, get a bag of chips free
        active_rule(
            &store.db,
            "COLA-CHIPS",
            PromotionDetail::BuyXGetY {
                trigger: TriggerTarget::Unit {
                    unit_id: store.unit_a.clone(),
                },
                threshold: TriggerThreshold::MinQuantity { quantity: 3 },
                gift_unit_id: store.unit_b.clone(),
                gift_quantity: 1,
                gift_discount: Discount::Percent { bps: 10000 },
                gift_max_quantity: 1,
            },
        )
        .await;

        let order = store
            .db
            .checkout()
            .checkout(request(&store, vec![line(&store.unit_a, 3)], PaymentMethod::Cash))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.subtotal_minor, 32000);
        assert_eq!(order.line_item_discount_minor, 2000);
        assert_eq!(order.total_amount_minor, 30000);

        let lines = store.db.orders().lines(&order.id).await.unwrap();
        assert_eq!(lines.len(), 2);
        let gift = lines.iter().find(|l| l.is_gift).unwrap();
        assert_eq!(gift.unit_id, store.unit_b);
        assert_eq!(gift.line_total_minor, 0);
        assert!(gift.source_line_id.is_some());

        let stock = store.db.stock();
        assert_eq!(stock.quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(), 7);
        assert_eq!(stock.quantity_on_hand(&store.unit_b, WAREHOUSE).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failed_checkout_leaves_no_trace() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 2).await;

        let err = store
            .db
            .checkout()
            .checkout(request(&store, vec![line(&store.unit_a, 5)], PaymentMethod::Cash))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { available: 2, requested: 5, .. })
        ));

        // Order rolled back, stock untouched
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(store.db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            store.db.stock().quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_one_wins() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 3).await;

        let checkout = store.db.checkout();
        let a = checkout.checkout(request(
            &store,
            vec![line(&store.unit_a, 2)],
            PaymentMethod::Cash,
        ));
        let b = checkout.checkout(request(
            &store,
            vec![line(&store.unit_a, 2)],
            PaymentMethod::Cash,
        ));
        let (ra, rb) = tokio::join!(a, b);

        let failures = [&ra, &rb].iter().filter(|r| r.is_err()).count();
        assert_eq!(failures, 1, "exactly one side must run out of stock");

        let loser = if ra.is_err() { ra } else { rb };
        assert!(matches!(
            loser.unwrap_err(),
            DbError::Domain(CoreError::InsufficientStock { .. })
        ));
        assert_eq!(
            store.db.stock().quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_payment_confirmation_idempotent() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 5).await;

        let checkout = store.db.checkout();
        let order = checkout
            .checkout(request(&store, vec![line(&store.unit_a, 1)], PaymentMethod::Online))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Unpaid);
        assert_eq!(order.amount_paid_minor, 0);

        let paid = checkout.confirm_payment(&order.id, "txn-123").await.unwrap();
        assert_eq!(paid.status, OrderStatus::Pending);
        assert_eq!(paid.amount_paid_minor, paid.total_amount_minor);

        // Redelivered callback: same reference is a no-op
        let again = checkout.confirm_payment(&order.id, "txn-123").await.unwrap();
        assert_eq!(again.status, OrderStatus::Pending);

        // A different reference on a settled order is an error
        let err = checkout.confirm_payment(&order.id, "txn-999").await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_delivery_issues_invoice_and_counts_usage() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 5).await;

        let rule = active_rule(&store.db, "COLA-10", ten_percent_off(&store.unit_a)).await;

        let checkout = store.db.checkout();
        let order = checkout
            .checkout(request(&store, vec![line(&store.unit_a, 2)], PaymentMethod::Cash))
            .await
            .unwrap();

        checkout.transition(&order.id, OrderStatus::Prepared).await.unwrap();
        let delivered = checkout
            .transition(&order.id, OrderStatus::Delivered)
            .await
            .unwrap();

        // Delivered is transient; the order lands in Completed with cash settled
        assert_eq!(delivered.status, OrderStatus::Completed);
        assert_eq!(delivered.amount_paid_minor, delivered.total_amount_minor);
        assert!(delivered.completed_at.is_some());

        let invoice = store
            .db
            .orders()
            .invoice_for_order(&order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Issued);
        assert_eq!(invoice.amount_paid_minor, delivered.total_amount_minor);

        let counted = store
            .db
            .promotions()
            .get_by_id(&rule.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counted.usage_count, 1);
    }

    #[tokio::test]
    async fn test_cart_session_cleared_on_success_kept_on_failure() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 5).await;

        let session = CartSession::new();
        session
            .with_cart_mut(|cart| cart.add_line(&store.unit_a, 8))
            .unwrap();

        let checkout = store.db.checkout();

        // Not enough stock: the order fails and the cart survives for retry
        let err = checkout
            .checkout_session(&session, PaymentMethod::Cash, WAREHOUSE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { .. })
        ));
        assert_eq!(session.with_cart(|cart| cart.total_quantity()), 8);

        session.with_cart_mut(|cart| cart.set_quantity(&store.unit_a, 3)).unwrap();
        let order = checkout
            .checkout_session(&session, PaymentMethod::Cash, WAREHOUSE)
            .await
            .unwrap();
        assert_eq!(order.subtotal_minor, 30000);
        assert!(session.with_cart(|cart| cart.is_empty()));
    }

    /// One rule discounting several lines is still a single redemption.
    #[tokio::test]
    async fn test_rule_spanning_lines_counted_once_at_delivery() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 5).await;
        stock_up(&store, &store.unit_b, 5).await;

        let rule = active_rule(
            &store.db,
            "EVERYTHING-10",
            PromotionDetail::ProductDiscount {
                discount: Discount::Percent { bps: 1000 },
                scope: DiscountScope::All,
                min_order_value_minor: None,
            },
        )
        .await;

        let checkout = store.db.checkout();
        let order = checkout
            .checkout(request(
                &store,
                vec![line(&store.unit_a, 1), line(&store.unit_b, 2)],
                PaymentMethod::Cash,
            ))
            .await
            .unwrap();

        // Both lines carry the rule
        let lines = store.db.orders().lines(&order.id).await.unwrap();
        assert!(lines
            .iter()
            .all(|l| l.applied_rule_id.as_deref() == Some(rule.id.as_str())));

        checkout.transition(&order.id, OrderStatus::Prepared).await.unwrap();
        checkout.transition(&order.id, OrderStatus::Delivered).await.unwrap();

        let counted = store
            .db
            .promotions()
            .get_by_id(&rule.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counted.usage_count, 1);
    }

    #[tokio::test]
    async fn test_manual_completion_rejected() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 5).await;

        let checkout = store.db.checkout();
        let order = checkout
            .checkout(request(&store, vec![line(&store.unit_a, 1)], PaymentMethod::Cash))
            .await
            .unwrap();

        let err = checkout
            .transition(&order.id, OrderStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::IllegalTransition { .. })
        ));

        // Skipping Prepared is equally forbidden
        let err = checkout
            .transition(&order.id, OrderStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_credits_stock() {
        let store = seeded_store().await;
        stock_up(&store, &store.unit_a, 5).await;

        let checkout = store.db.checkout();
        let order = checkout
            .checkout(request(&store, vec![line(&store.unit_a, 3)], PaymentMethod::Cash))
            .await
            .unwrap();
        assert_eq!(
            store.db.stock().quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(),
            2
        );

        let cancelled = checkout
            .transition(&order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(
            store.db.stock().quantity_on_hand(&store.unit_a, WAREHOUSE).await.unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_unpriced_unit_fails_whole_cart() {
        let store = seeded_store().await;
        store
            .db
            .price_lists()
            .pause(&store.price_list_id)
            .await
            .unwrap();

        let err = store
            .db
            .checkout()
            .evaluate_cart(&[line(&store.unit_a, 1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::PricingUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_product_discount_scopes_to_ancestor_category() {
        let store = seeded_store().await;

        // Scoped to "Food": covers colas through beverages → food
        active_rule(
            &store.db,
            "FOOD-WIDE",
            PromotionDetail::ProductDiscount {
                discount: Discount::Percent { bps: 2000 },
                scope: DiscountScope::Category {
                    category_id: store.category_food.clone(),
                },
                min_order_value_minor: None,
            },
        )
        .await;

        let priced = store
            .db
            .checkout()
            .evaluate_cart(&[line(&store.unit_a, 1)])
            .await
            .unwrap();
        assert_eq!(priced.line_item_discount.minor(), 2000);
        assert_eq!(priced.total_payable.minor(), 8000);
    }
}

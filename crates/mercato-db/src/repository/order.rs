//! # Order Repository
//!
//! Storage operations for orders, order lines, and invoices.
//!
//! The state machine and its side effects (stock debits, invoice issuance,
//! rule usage counting) are orchestrated in [`crate::checkout`]; this module
//! only knows how to read and write the rows. Mutations that must share a
//! transaction with ledger writes take a `&mut SqliteConnection`.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use mercato_core::{Invoice, Order, OrderLine, OrderStatus};

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

const ORDER_COLUMNS: &str = r#"
    SELECT id, code, status, payment_method, warehouse_id, customer_ref,
           delivery_address, subtotal_minor, line_item_discount_minor,
           order_discount_minor, total_amount_minor, amount_paid_minor,
           order_discount_rule_id, payment_txn_ref,
           created_at, updated_at, completed_at
    FROM orders
"#;

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets an order by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let order: Option<Order> = sqlx::query_as(&format!("{ORDER_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
    }

    /// Gets an order by business code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Order>> {
        let order: Option<Order> = sqlx::query_as(&format!("{ORDER_COLUMNS} WHERE code = ?1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
    }

    /// All lines of an order, gifts included, in insertion order.
    pub async fn lines(&self, order_id: &str) -> DbResult<Vec<OrderLine>> {
        let lines: Vec<OrderLine> = sqlx::query_as(
            r#"
            SELECT id, order_id, unit_id, name_snapshot, quantity,
                   unit_price_minor, line_subtotal_minor, discount_minor,
                   line_total_minor, applied_rule_id, source_line_id, is_gift,
                   created_at
            FROM order_lines
            WHERE order_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Gets the invoice issued for an order, if any.
    pub async fn invoice_for_order(&self, order_id: &str) -> DbResult<Option<Invoice>> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            SELECT id, code, order_id, status, total_amount_minor, amount_paid_minor, issued_at
            FROM invoices WHERE order_id = ?1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }

    /// Gets an invoice by ID.
    pub async fn get_invoice(&self, id: &str) -> DbResult<Option<Invoice>> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            SELECT id, code, order_id, status, total_amount_minor, amount_paid_minor, issued_at
            FROM invoices WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }
}

// =============================================================================
// Transaction-scoped writes
// =============================================================================

/// Inserts an order header.
pub async fn insert_order_in_tx(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, code, status, payment_method, warehouse_id, customer_ref,
            delivery_address, subtotal_minor, line_item_discount_minor,
            order_discount_minor, total_amount_minor, amount_paid_minor,
            order_discount_rule_id, payment_txn_ref,
            created_at, updated_at, completed_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9,
            ?10, ?11, ?12,
            ?13, ?14,
            ?15, ?16, ?17
        )
        "#,
    )
    .bind(&order.id)
    .bind(&order.code)
    .bind(order.status)
    .bind(order.payment_method)
    .bind(&order.warehouse_id)
    .bind(&order.customer_ref)
    .bind(&order.delivery_address)
    .bind(order.subtotal_minor)
    .bind(order.line_item_discount_minor)
    .bind(order.order_discount_minor)
    .bind(order.total_amount_minor)
    .bind(order.amount_paid_minor)
    .bind(&order.order_discount_rule_id)
    .bind(&order.payment_txn_ref)
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(order.completed_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Inserts one order line.
pub async fn insert_line_in_tx(conn: &mut SqliteConnection, line: &OrderLine) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_lines (
            id, order_id, unit_id, name_snapshot, quantity,
            unit_price_minor, line_subtotal_minor, discount_minor,
            line_total_minor, applied_rule_id, source_line_id, is_gift,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&line.id)
    .bind(&line.order_id)
    .bind(&line.unit_id)
    .bind(&line.name_snapshot)
    .bind(line.quantity)
    .bind(line.unit_price_minor)
    .bind(line.line_subtotal_minor)
    .bind(line.discount_minor)
    .bind(line.line_total_minor)
    .bind(&line.applied_rule_id)
    .bind(&line.source_line_id)
    .bind(line.is_gift)
    .bind(line.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Status flip guarded by the expected current status.
///
/// Zero rows affected means a concurrent writer moved the order first;
/// the caller decides whether that is a conflict or an idempotent no-op.
pub async fn update_status_guarded_in_tx(
    conn: &mut SqliteConnection,
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> DbResult<bool> {
    let now = Utc::now();
    let completed_at = if to == OrderStatus::Completed {
        Some(now)
    } else {
        None
    };

    let result = sqlx::query(
        r#"
        UPDATE orders SET
            status = ?3,
            completed_at = COALESCE(?4, completed_at),
            updated_at = ?5
        WHERE id = ?1 AND status = ?2
        "#,
    )
    .bind(order_id)
    .bind(from)
    .bind(to)
    .bind(completed_at)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Issues the invoice for a delivered order.
pub async fn insert_invoice_in_tx(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO invoices (id, code, order_id, status, total_amount_minor, amount_paid_minor, issued_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.code)
    .bind(&invoice.order_id)
    .bind(invoice.status)
    .bind(invoice.total_amount_minor)
    .bind(invoice.amount_paid_minor)
    .bind(invoice.issued_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Flips an invoice `Issued → Returned`, guarded against double returns.
pub async fn mark_invoice_returned_in_tx(
    conn: &mut SqliteConnection,
    invoice_id: &str,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE invoices SET status = 'returned' WHERE id = ?1 AND status = 'issued'",
    )
    .bind(invoice_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::Domain(mercato_core::CoreError::conflict(format!(
            "invoice {invoice_id} was already returned"
        ))));
    }

    Ok(())
}

/// Distinct promotion rules applied anywhere on an order: line-level rules
/// plus the order-level winner. Each gets its usage counted exactly once
/// per order.
pub async fn distinct_rule_ids_in_tx(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> DbResult<Vec<String>> {
    let rule_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT applied_rule_id FROM order_lines
        WHERE order_id = ?1 AND applied_rule_id IS NOT NULL
        UNION
        SELECT order_discount_rule_id FROM orders
        WHERE id = ?1 AND order_discount_rule_id IS NOT NULL
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rule_ids)
}

// =============================================================================
// Code Generation
// =============================================================================

/// Generates an order code in format: ORD-YYYYMMDD-NNNN.
pub fn generate_order_code() -> String {
    generate_code("ORD")
}

/// Generates an invoice code in format: INV-YYYYMMDD-NNNN.
pub fn generate_invoice_code() -> String {
    generate_code("INV")
}

/// Generates a return code in format: RET-YYYYMMDD-NNNN.
pub fn generate_return_code() -> String {
    generate_code("RET")
}

fn generate_code(prefix: &str) -> String {
    let now = Utc::now();
    // Uuid suffix keeps codes unique without a daily counter table
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, now.format("%Y%m%d"), &suffix[..8])
}

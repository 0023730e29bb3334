//! # Domain Types
//!
//! Core domain types used throughout mercato.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  SellableUnit   │   │   PriceList     │   │     Order       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  code (biz id)  │   │  code (biz id)  │       │
//! │  │  product_id     │   │  status         │   │  status machine │       │
//! │  │  conversion     │   │  entries        │   │  totals         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  StockRecord    │   │StockTransaction │   │    Invoice      │       │
//! │  │  qty_on_hand ≥0 │   │  append-only    │   │  issued/returned│       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID where one exists: (price list code, order code, ...) -
//!   human-readable, shown to operators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Catalog: Product / Category / SellableUnit
// =============================================================================

/// A product in the catalog. Products own sellable units; the unit is what
/// actually gets priced and sold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name.
    pub name: String,

    /// Category this product belongs to, if any.
    pub category_id: Option<String>,

    /// Whether the product is active (soft delete).
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A node in the category tree. Categories form a tree, never a cycle;
/// re-parenting is guarded by [`crate::category::check_reparent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Category {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A purchasable unit of a product (e.g., "box of 12").
///
/// ## Immutability
/// Once a unit is referenced by any stock transaction it can no longer be
/// deleted; otherwise it is logically deleted via `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SellableUnit {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Product this unit packages.
    pub product_id: String,

    /// Unit display name (e.g., "Carton", "Single").
    pub name: String,

    /// How many base units this unit contains.
    pub conversion_factor: i64,

    /// Whether this unit *is* the product's base unit.
    /// At most one active base unit per product, enforced at write time.
    pub is_base_unit: bool,

    /// Whether the unit is active (soft delete).
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog lookup result for display and validation, as consumed by the
/// rest of the system (product name + unit name together).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SellableUnitInfo {
    pub unit_id: String,
    pub product_id: String,
    pub product_name: String,
    pub unit_name: String,
    pub conversion_factor: i64,
    pub is_base_unit: bool,
    pub category_id: Option<String>,
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// The kind of a stock transaction.
///
/// Sign conventions: `StockIn`/`Return` carry a positive delta, `Sale` a
/// negative one. `Adjustment` (stocktake) may be either sign - its `after`
/// quantity is an externally counted value, not a computed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum StockTxKind {
    /// Goods receipt from a supplier import.
    StockIn,
    /// Checkout debit.
    Sale,
    /// Credit back: cancellation or invoice return.
    Return,
    /// Manual stocktake correction.
    Adjustment,
}

impl StockTxKind {
    /// Checks the sign convention for a delta under this kind.
    pub fn accepts_delta(&self, delta: i64) -> bool {
        match self {
            StockTxKind::StockIn | StockTxKind::Return => delta > 0,
            StockTxKind::Sale => delta < 0,
            StockTxKind::Adjustment => true,
        }
    }
}

/// Current on-hand quantity for one (sellable unit, warehouse) pair.
///
/// ## Invariant
/// `quantity_on_hand` is never negative, and every mutation is paired with
/// exactly one appended [`StockTransaction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockRecord {
    pub unit_id: String,
    pub warehouse_id: String,
    pub quantity_on_hand: i64,
    pub updated_at: DateTime<Utc>,
}

/// One immutable, append-only ledger entry.
///
/// `after_quantity = before_quantity + delta` always. Rows are never updated
/// or deleted after creation - they are the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockTransaction {
    pub id: String,
    pub unit_id: String,
    pub warehouse_id: String,
    pub before_quantity: i64,
    pub delta: i64,
    pub after_quantity: i64,
    pub kind: StockTxKind,
    /// What caused this movement: order code, return code, import code...
    pub reference_id: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Price Lists
// =============================================================================

/// Lifecycle state of a price list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PriceListStatus {
    /// Created, not yet in effect.
    Upcoming,
    /// In effect: the unique source of current prices for its units.
    Current,
    /// Temporarily suspended; can return to Current.
    Paused,
    /// Terminal.
    Expired,
}

impl PriceListStatus {
    /// Whether the state machine permits moving from `self` to `to`.
    ///
    /// `UPCOMING → CURRENT`, `CURRENT → {PAUSED, EXPIRED}`,
    /// `PAUSED → {CURRENT, EXPIRED}`, `EXPIRED` terminal.
    pub fn can_transition(&self, to: PriceListStatus) -> bool {
        use PriceListStatus::*;
        matches!(
            (self, to),
            (Upcoming, Current) | (Current, Paused) | (Current, Expired) | (Paused, Current)
                | (Paused, Expired)
        )
    }
}

/// A named, dated set of per-unit sale prices.
///
/// ## Invariant
/// A given unit may appear in at most one list whose status is `Current`
/// at any instant. Activation and the background sweep both enforce this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PriceList {
    pub id: String,
    /// Business code, unique (e.g., "SPRING-2026").
    pub code: String,
    pub name: String,
    pub status: PriceListStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One unit's sale price inside a price list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PriceEntry {
    pub price_list_id: String,
    pub unit_id: String,
    pub sale_price_minor: i64,
}

impl PriceEntry {
    /// Returns the sale price as Money.
    #[inline]
    pub fn sale_price(&self) -> Money {
        Money::from_minor(self.sale_price_minor)
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Payment method chosen at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash on delivery / at the counter.
    Cash,
    /// Online payment confirmed by a gateway callback.
    Online,
}

/// The status of an order.
///
/// ## State Machine
/// ```text
/// UNPAID → PENDING → PREPARED → SHIPPING? → DELIVERED → COMPLETED
///                                   │
///   CANCELLED ← (any pre-DELIVERED state)
/// ```
/// `Delivered` is transient: entering it issues the invoice, counts rule
/// usage, and immediately advances to `Completed` (orchestrator side
/// effect). Manual transition into `Completed` is rejected there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Unpaid,
    Pending,
    Prepared,
    Shipping,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (Unpaid, Pending) => true,
            (Pending, Prepared) => true,
            // Shipping is optional: home delivery passes through it,
            // counter pickup goes straight to Delivered.
            (Prepared, Shipping) | (Prepared, Delivered) => true,
            (Shipping, Delivered) => true,
            (Delivered, Completed) => true,
            (from, Cancelled) => from.is_pre_delivery(),
            _ => false,
        }
    }

    /// States from which cancellation is still possible.
    pub fn is_pre_delivery(&self) -> bool {
        use OrderStatus::*;
        matches!(self, Unpaid | Pending | Prepared | Shipping)
    }

    /// Terminal states: no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// A persisted order header. Created at checkout; mutated only by the
/// checkout orchestrator and the return processor; never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    /// Business code shown to operators and used as the ledger reference.
    pub code: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    /// Warehouse the stock was debited from.
    pub warehouse_id: String,
    /// Opaque identity reference of the actor placing the order.
    pub customer_ref: Option<String>,
    pub delivery_address: Option<String>,
    pub subtotal_minor: i64,
    pub line_item_discount_minor: i64,
    pub order_discount_minor: i64,
    pub total_amount_minor: i64,
    pub amount_paid_minor: i64,
    /// The winning order-level rule, if one applied.
    pub order_discount_rule_id: Option<String>,
    /// Gateway transaction reference stamped on payment confirmation.
    pub payment_txn_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Returns the total amount as Money.
    #[inline]
    pub fn total_amount(&self) -> Money {
        Money::from_minor(self.total_amount_minor)
    }

    /// Returns the amount paid as Money.
    #[inline]
    pub fn amount_paid(&self) -> Money {
        Money::from_minor(self.amount_paid_minor)
    }
}

/// A persisted order line. Prices are snapshots taken at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderLine {
    pub id: String,
    pub order_id: String,
    pub unit_id: String,
    /// Product + unit name at time of sale (frozen).
    pub name_snapshot: String,
    pub quantity: i64,
    pub unit_price_minor: i64,
    pub line_subtotal_minor: i64,
    pub discount_minor: i64,
    pub line_total_minor: i64,
    /// Rule that discounted this line (or synthesized it, for gifts).
    pub applied_rule_id: Option<String>,
    /// For gift lines: the paying line that triggered this one.
    /// A non-owning back-reference, never a structural pointer.
    pub source_line_id: Option<String>,
    pub is_gift: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Invoice / Return Document
// =============================================================================

/// Status of a sales invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Issued by the DELIVERED transition; the sale is complete.
    Issued,
    /// Terminal: the whole invoice was reversed by a return.
    Returned,
}

/// A sales invoice, generated from the order when it is delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Invoice {
    pub id: String,
    pub code: String,
    pub order_id: String,
    pub status: InvoiceStatus,
    pub total_amount_minor: i64,
    pub amount_paid_minor: i64,
    pub issued_at: DateTime<Utc>,
}

/// A return document recording a whole-invoice reversal.
///
/// The refund equals the amount paid at sale time - historical prices,
/// never recomputed from current price lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ReturnDocument {
    pub id: String,
    pub code: String,
    pub invoice_id: String,
    pub reason: String,
    pub refund_amount_minor: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Cart Input
// =============================================================================

/// One requested line of a cart, as submitted for evaluation or checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub unit_id: String,
    pub quantity: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

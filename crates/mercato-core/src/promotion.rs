//! # Promotion Rules
//!
//! Promotion rule headers and their type-specific detail payloads.
//!
//! ## Tagged Union, Not Nullable Fields
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The original flat-table design kept every field of every rule type    │
//! │  on one row and left most of them NULL. Here each rule carries exactly │
//! │  one PromotionDetail variant, and each variant carries only its own    │
//! │  fields - there is no "is this field valid for this type" ambiguity.   │
//! │                                                                         │
//! │  PromotionRule (header: code, window, status, usage)                   │
//! │  └── PromotionDetail                                                   │
//! │      ├── BuyXGetY        trigger → gift                                │
//! │      ├── OrderDiscount   one per cart, best wins                       │
//! │      └── ProductDiscount one per line, best wins                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The detail payload is serde-tagged and persisted as a JSON column by
//! mercato-db.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{Discount, Money};

// =============================================================================
// Promotion Status
// =============================================================================

/// Lifecycle state of a promotion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    Active,
    Inactive,
    Expired,
}

// =============================================================================
// Scope / Trigger Types
// =============================================================================

/// What a product-level discount applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum DiscountScope {
    /// A single sellable unit.
    Unit { unit_id: String },
    /// Every unit whose category chain contains this category.
    Category { category_id: String },
    /// Every unit in the cart.
    All,
}

/// What a buy-X-get-Y rule watches in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum TriggerTarget {
    Unit { unit_id: String },
    Category { category_id: String },
}

/// The threshold the matching trigger lines must reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "threshold", rename_all = "snake_case")]
pub enum TriggerThreshold {
    /// Combined quantity of matching lines.
    MinQuantity { quantity: i64 },
    /// Combined pre-discount subtotal of matching lines, in minor units.
    MinValue { value_minor: i64 },
}

// =============================================================================
// Promotion Detail (tagged union)
// =============================================================================

/// The type-specific payload of a promotion rule. Exactly one per rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromotionDetail {
    /// Buy X of the trigger → get Y of the gift unit, discounted.
    BuyXGetY {
        trigger: TriggerTarget,
        threshold: TriggerThreshold,
        gift_unit_id: String,
        gift_quantity: i64,
        /// Discount applied to the gift line itself (100% = free).
        gift_discount: Discount,
        /// Hard cap on the synthesized gift quantity.
        gift_max_quantity: i64,
    },

    /// A discount on the whole order. At most one per cart: the rule
    /// yielding the largest total discount wins, ties broken by smallest
    /// rule id.
    OrderDiscount {
        discount: Discount,
        /// Cap on the computed discount, in minor units.
        max_discount_minor: Option<i64>,
        min_order_value_minor: Option<i64>,
        min_order_quantity: Option<i64>,
    },

    /// A discount on matching lines. A line receives at most one.
    ProductDiscount {
        discount: Discount,
        scope: DiscountScope,
        /// Cart-level qualifier, checked against the pre-discount subtotal.
        min_order_value_minor: Option<i64>,
    },
}

// =============================================================================
// Promotion Rule
// =============================================================================

/// A dated, typed discount definition with usage limits.
///
/// ## Eligibility
/// A rule is eligible only while `status = Active`, `now` lies inside
/// `[start_date, end_date]`, and `usage_count < usage_limit` when a limit
/// is set. `usage_count` is incremented once per order (per distinct rule)
/// when the order is delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRule {
    pub id: String,
    /// Business code, unique (e.g., "BOGO-COLA").
    pub code: String,
    pub name: String,
    pub status: PromotionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
    pub detail: PromotionDetail,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromotionRule {
    /// Whether this rule may be applied at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if self.status != PromotionStatus::Active {
            return false;
        }
        if now < self.start_date || now > self.end_date {
            return false;
        }
        match self.usage_limit {
            Some(limit) => self.usage_count < limit,
            None => true,
        }
    }

    /// Convenience: the gift cap for BuyXGetY rules, clamped to the
    /// configured gift quantity.
    pub fn capped_gift_quantity(&self) -> Option<i64> {
        match &self.detail {
            PromotionDetail::BuyXGetY {
                gift_quantity,
                gift_max_quantity,
                ..
            } => Some((*gift_quantity).min(*gift_max_quantity)),
            _ => None,
        }
    }
}

/// Helper used by the engine when comparing candidate order discounts.
pub(crate) fn order_discount_amount(
    detail: &PromotionDetail,
    base: Money,
    total_quantity: i64,
) -> Option<Money> {
    let PromotionDetail::OrderDiscount {
        discount,
        max_discount_minor,
        min_order_value_minor,
        min_order_quantity,
    } = detail
    else {
        return None;
    };

    if let Some(min_value) = min_order_value_minor {
        if base.minor() < *min_value {
            return None;
        }
    }
    if let Some(min_qty) = min_order_quantity {
        if total_quantity < *min_qty {
            return None;
        }
    }

    let mut amount = discount.amount_off(base);
    if let Some(cap) = max_discount_minor {
        amount = amount.min(Money::from_minor(*cap));
    }
    Some(amount)
}

// =============================================================================
// Unit Tests
// =============================================================================

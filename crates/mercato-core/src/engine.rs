//! # Promotion Rule Engine
//!
//! Given a cart, current unit prices, and the active promotion rules,
//! produces a discounted line-item breakdown plus any auto-added gift lines.
//!
//! ## Evaluation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Fixed Rule Priority                                 │
//! │                                                                         │
//! │  1. Price every requested line (fail the whole cart if any unit        │
//! │     is unknown or unpriced)                                            │
//! │  2. PRODUCT_DISCOUNT  per line, best rule wins, one per line           │
//! │  3. BUY_X_GET_Y       synthesize gift lines, source_line back-ref      │
//! │  4. ORDER_DISCOUNT    on the post-line-discount subtotal,              │
//! │                       at most ONE rule per cart:                       │
//! │                       largest discount wins, ties → smallest rule id   │
//! │  5. totals: subtotal − line discounts − order discount                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! This module performs no persistence - it is pure computation over its
//! inputs. mercato-db assembles the [`UnitContext`] map (names, current
//! prices, category ancestor chains) and the eligible rule set, then
//! delegates here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::promotion::{
    order_discount_amount, DiscountScope, PromotionDetail, PromotionRule, TriggerTarget,
    TriggerThreshold,
};
use crate::types::CartLine;

// =============================================================================
// Engine Input / Output
// =============================================================================

/// Everything the engine needs to know about one sellable unit.
///
/// Assembled by the caller from the catalog and the price-list manager;
/// `category_chain` is the unit's category plus all its ancestors, so
/// category-scoped rules match with a simple contains check.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub unit_id: String,
    /// Product + unit name for display and error messages.
    pub display_name: String,
    /// Current sale price, or None when no CURRENT list prices the unit.
    pub price: Option<Money>,
    /// The unit's category and its ancestors (walk to root).
    pub category_chain: Vec<String>,
}

impl UnitContext {
    fn in_category(&self, category_id: &str) -> bool {
        self.category_chain.iter().any(|c| c == category_id)
    }
}

/// One priced (and possibly discounted) line of the evaluated cart.
#[derive(Debug, Clone)]
pub struct PricedLine {
    /// Engine-assigned line id; gift lines reference their trigger via
    /// [`PricedLine::source_line_id`].
    pub line_id: String,
    pub unit_id: String,
    pub display_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_subtotal: Money,
    pub discount: Money,
    pub line_total: Money,
    /// The single rule that discounted (or synthesized) this line.
    pub applied_rule_id: Option<String>,
    /// For gift lines: the paying line that triggered this one.
    pub source_line_id: Option<String>,
    pub is_gift: bool,
}

/// The engine's output: original + gift lines, and the order totals.
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    /// Σ line_subtotal, gift lines included at full price.
    pub subtotal: Money,
    /// Σ per-line discounts, gift discounts included.
    pub line_item_discount: Money,
    /// The single winning order-level discount, if any.
    pub order_discount: Money,
    pub order_discount_rule_id: Option<String>,
    /// subtotal − line_item_discount − order_discount.
    pub total_payable: Money,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluates a cart against the supplied rules.
///
/// ## Errors
/// - [`CoreError::NotFound`] - a cart line (or gift) references a unit
///   missing from `units`
/// - [`CoreError::PricingUnavailable`] - a unit has no current price
///
/// Rules not eligible at `now` (status, window, usage limit) are skipped.
pub fn evaluate(
    lines: &[CartLine],
    units: &HashMap<String, UnitContext>,
    rules: &[PromotionRule],
    now: DateTime<Utc>,
) -> CoreResult<PricedCart> {
    // Step 1: price every requested line, failing the whole evaluation
    // if any unit is unknown or unpriced.
    let mut priced: Vec<PricedLine> = Vec::with_capacity(lines.len());
    for line in lines {
        let unit = lookup_unit(units, &line.unit_id)?;
        let price = unit_price(unit)?;
        let line_subtotal = price * line.quantity;
        priced.push(PricedLine {
            line_id: Uuid::new_v4().to_string(),
            unit_id: unit.unit_id.clone(),
            display_name: unit.display_name.clone(),
            quantity: line.quantity,
            unit_price: price,
            line_subtotal,
            discount: Money::zero(),
            line_total: line_subtotal,
            applied_rule_id: None,
            source_line_id: None,
            is_gift: false,
        });
    }

    // Sorting by id makes "ties broken by smallest rule id" fall out of a
    // strictly-greater comparison below.
    let mut eligible: Vec<&PromotionRule> = rules.iter().filter(|r| r.is_eligible(now)).collect();
    eligible.sort_by(|a, b| a.id.cmp(&b.id));

    // Pre-discount cart subtotal: the qualifier base for product rules.
    let cart_subtotal: Money = priced.iter().map(|l| l.line_subtotal).fold(Money::zero(), |a, b| a + b);
    let paying_quantity: i64 = priced.iter().map(|l| l.quantity).sum();

    // Step 2: product discounts, best rule per line, one per line.
    apply_product_discounts(&mut priced, &eligible, units, cart_subtotal);

    // Step 3: buy-X-get-Y gift synthesis.
    let gifts = synthesize_gifts(&priced, &eligible, units)?;
    priced.extend(gifts);

    // Step 4: the single winning order discount, against the
    // post-line-discount subtotal.
    let discounted_base: Money = priced.iter().map(|l| l.line_total).fold(Money::zero(), |a, b| a + b);
    let (order_discount, order_discount_rule_id) =
        pick_order_discount(&eligible, discounted_base, paying_quantity);

    // Step 5: totals.
    let subtotal: Money = priced.iter().map(|l| l.line_subtotal).fold(Money::zero(), |a, b| a + b);
    let line_item_discount: Money =
        priced.iter().map(|l| l.discount).fold(Money::zero(), |a, b| a + b);
    let total_payable = subtotal - line_item_discount - order_discount;

    Ok(PricedCart {
        lines: priced,
        subtotal,
        line_item_discount,
        order_discount,
        order_discount_rule_id,
        total_payable,
    })
}

fn lookup_unit<'a>(
    units: &'a HashMap<String, UnitContext>,
    unit_id: &str,
) -> CoreResult<&'a UnitContext> {
    units
        .get(unit_id)
        .ok_or_else(|| CoreError::not_found("SellableUnit", unit_id))
}

fn unit_price(unit: &UnitContext) -> CoreResult<Money> {
    unit.price.ok_or_else(|| CoreError::PricingUnavailable {
        unit_id: unit.unit_id.clone(),
    })
}

/// A line receives at most one PRODUCT_DISCOUNT: the rule yielding the
/// largest amount for that line, ties broken by smallest rule id (the
/// rules arrive sorted by id, so strictly-greater keeps the first).
fn apply_product_discounts(
    lines: &mut [PricedLine],
    rules: &[&PromotionRule],
    units: &HashMap<String, UnitContext>,
    cart_subtotal: Money,
) {
    for line in lines.iter_mut() {
        let mut best: Option<(&str, Money)> = None;

        for rule in rules {
            let PromotionDetail::ProductDiscount {
                discount,
                scope,
                min_order_value_minor,
            } = &rule.detail
            else {
                continue;
            };

            if let Some(min_value) = min_order_value_minor {
                if cart_subtotal.minor() < *min_value {
                    continue;
                }
            }
            if !scope_matches(scope, line, units) {
                continue;
            }

            let amount = discount.amount_off(line.line_subtotal);
            if amount.is_zero() {
                continue;
            }
            match best {
                Some((_, current)) if amount <= current => {}
                _ => best = Some((&rule.id, amount)),
            }
        }

        if let Some((rule_id, amount)) = best {
            line.discount = amount;
            line.line_total = line.line_subtotal - amount;
            line.applied_rule_id = Some(rule_id.to_string());
        }
    }
}

fn scope_matches(
    scope: &DiscountScope,
    line: &PricedLine,
    units: &HashMap<String, UnitContext>,
) -> bool {
    match scope {
        DiscountScope::Unit { unit_id } => line.unit_id == *unit_id,
        DiscountScope::Category { category_id } => units
            .get(&line.unit_id)
            .is_some_and(|u| u.in_category(category_id)),
        DiscountScope::All => true,
    }
}

/// For each satisfied BUY_X_GET_Y rule, synthesizes one gift line: the
/// configured gift unit and quantity (capped), priced at its current sale
/// price with the gift's own discount applied, `source_line_id` pointing
/// at the first matching trigger line.
fn synthesize_gifts(
    paying: &[PricedLine],
    rules: &[&PromotionRule],
    units: &HashMap<String, UnitContext>,
) -> CoreResult<Vec<PricedLine>> {
    let mut gifts = Vec::new();

    for rule in rules {
        let PromotionDetail::BuyXGetY {
            trigger,
            threshold,
            gift_unit_id,
            gift_discount,
            ..
        } = &rule.detail
        else {
            continue;
        };

        let matching: Vec<&PricedLine> = paying
            .iter()
            .filter(|l| trigger_matches(trigger, l, units))
            .collect();
        if matching.is_empty() {
            continue;
        }

        let satisfied = match threshold {
            TriggerThreshold::MinQuantity { quantity } => {
                matching.iter().map(|l| l.quantity).sum::<i64>() >= *quantity
            }
            TriggerThreshold::MinValue { value_minor } => {
                matching
                    .iter()
                    .map(|l| l.line_subtotal.minor())
                    .sum::<i64>()
                    >= *value_minor
            }
        };
        if !satisfied {
            continue;
        }

        // The gift's own unit must exist and be priced: the gift line is a
        // real order line, only its cost is discounted away.
        let gift_unit = lookup_unit(units, gift_unit_id)?;
        let gift_price = unit_price(gift_unit)?;
        let quantity = rule
            .capped_gift_quantity()
            .expect("BuyXGetY detail always has a gift quantity");
        if quantity <= 0 {
            continue;
        }

        let line_subtotal = gift_price * quantity;
        let discount = gift_discount.amount_off(line_subtotal);
        gifts.push(PricedLine {
            line_id: Uuid::new_v4().to_string(),
            unit_id: gift_unit.unit_id.clone(),
            display_name: gift_unit.display_name.clone(),
            quantity,
            unit_price: gift_price,
            line_subtotal,
            discount,
            line_total: line_subtotal - discount,
            applied_rule_id: Some(rule.id.clone()),
            source_line_id: Some(matching[0].line_id.clone()),
            is_gift: true,
        });
    }

    Ok(gifts)
}

fn trigger_matches(
    trigger: &TriggerTarget,
    line: &PricedLine,
    units: &HashMap<String, UnitContext>,
) -> bool {
    match trigger {
        TriggerTarget::Unit { unit_id } => line.unit_id == *unit_id,
        TriggerTarget::Category { category_id } => units
            .get(&line.unit_id)
            .is_some_and(|u| u.in_category(category_id)),
    }
}

/// Order-level rules never compound: the single qualifying rule with the
/// largest computed discount wins, ties broken by smallest rule id.
fn pick_order_discount(
    rules: &[&PromotionRule],
    base: Money,
    total_quantity: i64,
) -> (Money, Option<String>) {
    let mut best: Option<(&str, Money)> = None;

    for rule in rules {
        let Some(amount) = order_discount_amount(&rule.detail, base, total_quantity) else {
            continue;
        };
        if amount.is_zero() {
            continue;
        }
        match best {
            Some((_, current)) if amount <= current => {}
            _ => best = Some((&rule.id, amount)),
        }
    }

    match best {
        Some((rule_id, amount)) => (amount, Some(rule_id.to_string())),
        None => (Money::zero(), None),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

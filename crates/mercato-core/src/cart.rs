//! # Cart Session
//!
//! An in-memory cart being assembled before evaluation or checkout.
//!
//! ## Thread Safety
//! The session is wrapped in `Arc<Mutex<T>>` because:
//! 1. Multiple callers may access/modify the cart
//! 2. Only one caller should modify the cart at a time
//!
//! ## Prices Live Elsewhere
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The cart stores WHAT the customer wants, never at what price.          │
//! │                                                                         │
//! │  Cart (unit_id, quantity)                                               │
//! │       │                                                                 │
//! │       ▼  lines()                                                        │
//! │  engine::evaluate(lines, units, rules, now)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PricedCart (current prices, discounts, gifts, totals)                  │
//! │                                                                         │
//! │  Pricing a cart line at add-time would freeze a price the promotion     │
//! │  engine is the single authority for.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::CartLine;
use crate::{MAX_CART_LINES, MAX_LINE_QUANTITY};

/// A cart under assembly.
///
/// ## Invariants
/// - Lines are unique by `unit_id` (adding the same unit merges quantities)
/// - Quantity is always > 0 (setting a quantity to 0 removes the line)
/// - At most [`MAX_CART_LINES`] lines, each at most [`MAX_LINE_QUANTITY`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
    /// When the cart was created/last cleared.
    pub created_at: DateTime<Utc>,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new() -> Self {
        Cart {
            lines: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Adds a unit to the cart, merging with an existing line for the same
    /// unit.
    pub fn add_line(&mut self, unit_id: &str, quantity: i64) -> CoreResult<()> {
        if quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }

        if let Some(line) = self.lines.iter_mut().find(|l| l.unit_id == unit_id) {
            let new_qty = line.quantity + quantity;
            if new_qty > MAX_LINE_QUANTITY {
                return Err(ValidationError::OutOfRange {
                    field: "quantity".to_string(),
                    min: 1,
                    max: MAX_LINE_QUANTITY,
                }
                .into());
            }
            line.quantity = new_qty;
            return Ok(());
        }

        if self.lines.len() >= MAX_CART_LINES {
            return Err(ValidationError::OutOfRange {
                field: "cart lines".to_string(),
                min: 0,
                max: MAX_CART_LINES as i64,
            }
            .into());
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(ValidationError::OutOfRange {
                field: "quantity".to_string(),
                min: 1,
                max: MAX_LINE_QUANTITY,
            }
            .into());
        }

        self.lines.push(CartLine {
            unit_id: unit_id.to_string(),
            quantity,
        });
        Ok(())
    }

    /// Sets the quantity of a line. Zero removes the line.
    pub fn set_quantity(&mut self, unit_id: &str, quantity: i64) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_line(unit_id);
        }
        if quantity < 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(ValidationError::OutOfRange {
                field: "quantity".to_string(),
                min: 1,
                max: MAX_LINE_QUANTITY,
            }
            .into());
        }

        match self.lines.iter_mut().find(|l| l.unit_id == unit_id) {
            Some(line) => {
                line.quantity = quantity;
                Ok(())
            }
            None => Err(CoreError::not_found("CartLine", unit_id)),
        }
    }

    /// Removes a line by unit id.
    pub fn remove_line(&mut self, unit_id: &str) -> CoreResult<()> {
        let initial_len = self.lines.len();
        self.lines.retain(|l| l.unit_id != unit_id);

        if self.lines.len() == initial_len {
            Err(CoreError::not_found("CartLine", unit_id))
        } else {
            Ok(())
        }
    }

    /// Clears all lines from the cart.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.created_at = Utc::now();
    }

    /// The lines as submitted to the engine.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Number of unique lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Total quantity across all lines.
    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Checks if the cart is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for Cart {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared cart session handle.
///
/// `Arc` for shared ownership across threads, `Mutex` so only one caller
/// mutates at a time. Operations are short; an RwLock buys nothing here.
#[derive(Debug, Clone)]
pub struct CartSession {
    cart: Arc<Mutex<Cart>>,
}

impl CartSession {
    /// Creates a new empty session.
    pub fn new() -> Self {
        CartSession {
            cart: Arc::new(Mutex::new(Cart::new())),
        }
    }

    /// Executes a function with read access to the cart.
    pub fn with_cart<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Cart) -> R,
    {
        let cart = self.cart.lock().expect("cart mutex poisoned");
        f(&cart)
    }

    /// Executes a function with write access to the cart.
    pub fn with_cart_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Cart) -> R,
    {
        let mut cart = self.cart.lock().expect("cart mutex poisoned");
        f(&mut cart)
    }
}

impl Default for CartSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_line_merges_same_unit() {
        let mut cart = Cart::new();
        cart.add_line("u-1", 2).unwrap();
        cart.add_line("u-1", 3).unwrap();

        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.total_quantity(), 5);
    }

    #[test]
    fn test_quantity_guards() {
        let mut cart = Cart::new();
        assert!(cart.add_line("u-1", 0).is_err());
        assert!(cart.add_line("u-1", -2).is_err());
        assert!(cart.add_line("u-1", MAX_LINE_QUANTITY + 1).is_err());

        cart.add_line("u-1", MAX_LINE_QUANTITY).unwrap();
        // Merging past the cap fails and leaves the line unchanged
        assert!(cart.add_line("u-1", 1).is_err());
        assert_eq!(cart.total_quantity(), MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_set_quantity_zero_removes() {
        let mut cart = Cart::new();
        cart.add_line("u-1", 2).unwrap();
        cart.set_quantity("u-1", 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_remove_missing_line() {
        let mut cart = Cart::new();
        let err = cart.remove_line("u-ghost").unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_session_shared_access() {
        let session = CartSession::new();
        session
            .with_cart_mut(|cart| cart.add_line("u-1", 2))
            .unwrap();

        let qty = session.with_cart(|cart| cart.total_quantity());
        assert_eq!(qty, 2);
    }
}

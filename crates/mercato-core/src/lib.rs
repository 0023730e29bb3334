//! # mercato-core: Pure Business Logic for the Mercato Pricing Core
//!
//! This crate is the **heart** of the mercato back office. It contains all
//! business logic as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Mercato Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Back-office / storefront callers                   │   │
//! │  │    evaluate_cart, checkout, transition_status, return_invoice   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ mercato-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  engine   │  │ promotion │  │   │
//! │  │   │   Order   │  │   Money   │  │ evaluate  │  │   rules   │  │   │
//! │  │   │ PriceList │  │ Discount  │  │PricedCart │  │  details  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  mercato-db (Database Layer)                    │   │
//! │  │     Stock ledger, price lists, checkout orchestration           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (SellableUnit, PriceList, Order, stock types)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`promotion`] - Promotion rule headers and the tagged detail payload
//! - [`engine`] - The promotion rule engine: cart in, priced cart out
//! - [`cart`] - In-memory cart session
//! - [`category`] - Category tree cycle guard
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are minor units (i64), never floats
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod category;
pub mod engine;
pub mod error;
pub mod money;
pub mod promotion;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use mercato_core::Money` instead of
// `use mercato_core::money::Money`

pub use engine::{evaluate, PricedCart, PricedLine, UnitContext};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Discount, Money};
pub use promotion::{
    DiscountScope, PromotionDetail, PromotionRule, PromotionStatus, TriggerTarget,
    TriggerThreshold,
};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single cart.
///
/// Prevents runaway carts and ensures reasonable transaction sizes.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single line in a cart.
///
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 999;

//! # Error Types
//!
//! Domain-specific error types for mercato-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  mercato-core errors (this file)                                       │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  mercato-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                        (wraps CoreError transparently)                  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (unit name, list code, shortfall)
//! 3. Errors are enum variants, never String
//! 4. No internal stack detail beyond a stable kind and a readable reason

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations or domain logic failures.
/// They are detected before any mutation where possible; `InsufficientStock`
/// detected mid-checkout aborts the whole transaction.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An entity cannot be found by its id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Input validation failure (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A uniqueness or overlap conflict.
    ///
    /// ## When This Occurs
    /// - Activating a price list whose units already belong to another
    ///   CURRENT list (the message names the offending list code)
    /// - Duplicate business code
    /// - A second base unit for the same product
    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    /// The stock ledger's negative-result guard fired.
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout (qty: 5)
    ///      │
    ///      ▼
    /// Ledger check: available=3
    ///      │
    ///      ▼
    /// InsufficientStock { unit: "Cola carton", available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// UI shows: "Only 3 Cola carton in stock"
    /// ```
    #[error("Insufficient stock for {unit}: available {available}, requested {requested}")]
    InsufficientStock {
        unit: String,
        available: i64,
        requested: i64,
    },

    /// A state-machine violation, rejected before any mutation.
    #[error("Illegal transition for {entity} {id}: {from} -> {to}")]
    IllegalTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },

    /// A unit in the cart has no current sale price.
    #[error("No current price for unit {unit_id}")]
    PricingUnavailable { unit_id: String },
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Conflict error with a human-readable reason.
    pub fn conflict(reason: impl Into<String>) -> Self {
        CoreError::Conflict {
            reason: reason.into(),
        }
    }

    /// Creates an IllegalTransition error.
    pub fn illegal_transition(
        entity: impl Into<String>,
        id: impl Into<String>,
        from: impl std::fmt::Debug,
        to: impl std::fmt::Debug,
    ) -> Self {
        CoreError::IllegalTransition {
            entity: entity.into(),
            id: id.into(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements.
/// Used for early validation before business logic runs - no side effects.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, bad date window).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Delta sign does not match the transaction kind's convention.
    #[error("delta {delta} is not valid for a {kind} transaction")]
    BadDeltaSign { kind: String, delta: i64 },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

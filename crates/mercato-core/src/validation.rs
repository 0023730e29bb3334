//! # Validation Module
//!
//! Input validation utilities for mercato.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (back-office UI / storefront API)                     │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - business rule validation, no side effects      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / UNIQUE / CHECK constraints                             │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::types::{CartLine, StockTxKind};
use crate::{MAX_CART_LINES, MAX_LINE_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a business code (price list code, promotion code, ...).
///
/// ## Rules
/// - Must not be empty
/// - Must be between 1 and 50 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ## Example
/// ```rust
/// use mercato_core::validation::validate_code;
///
/// assert!(validate_code("SPRING-2026").is_ok());
/// assert!(validate_code("").is_err());
/// ```
pub fn validate_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: 50,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a display name (product, unit, category, list, rule).
///
/// ## Rules
/// - Must not be empty
/// - Must be between 1 and 200 characters
pub fn validate_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a cart line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in minor units.
///
/// ## Rules
/// - Must be non-negative (>= 0)
/// - Zero is allowed (free units)
pub fn validate_price_minor(minor: i64) -> ValidationResult<()> {
    if minor < 0 {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a conversion factor for a sellable unit.
pub fn validate_conversion_factor(factor: i64) -> ValidationResult<()> {
    if factor <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "conversion_factor".to_string(),
        });
    }

    Ok(())
}

/// Validates the sign of a stock delta against its transaction kind.
///
/// StockIn/Return must be positive, Sale negative; Adjustment takes any
/// nonzero delta.
pub fn validate_stock_delta(kind: StockTxKind, delta: i64) -> ValidationResult<()> {
    if delta == 0 || !kind.accepts_delta(delta) {
        return Err(ValidationError::BadDeltaSign {
            kind: format!("{kind:?}"),
            delta,
        });
    }

    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates a cart submission as a whole.
///
/// ## Rules
/// - Must not be empty
/// - At most MAX_CART_LINES lines
/// - Every line quantity within range
pub fn validate_cart_lines(lines: &[CartLine]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Required {
            field: "cart lines".to_string(),
        });
    }

    if lines.len() > MAX_CART_LINES {
        return Err(ValidationError::OutOfRange {
            field: "cart lines".to_string(),
            min: 1,
            max: MAX_CART_LINES as i64,
        });
    }

    for line in lines {
        validate_quantity(line.quantity)?;
    }

    Ok(())
}

/// Validates a date window: when an end is given it must not precede the
/// start.
pub fn validate_date_window(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> ValidationResult<()> {
    if let Some(end) = end {
        if end < start {
            return Err(ValidationError::InvalidFormat {
                field: "end_date".to_string(),
                reason: "must not precede start_date".to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

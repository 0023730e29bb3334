//! # mercato-db: Database Layer for Mercato
//!
//! This crate provides database access and orchestration for the mercato
//! pricing core. It uses SQLite for local storage with sqlx for async
//! operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mercato Data Flow                                │
//! │                                                                         │
//! │  Caller (back office / storefront)                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    mercato-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐   ┌────────────────┐   ┌───────────────┐  │   │
//! │  │   │   Database    │   │  Repositories  │   │ Orchestration │  │   │
//! │  │   │   (pool.rs)   │   │  stock ledger  │   │  checkout.rs  │  │   │
//! │  │   │               │   │  price lists   │   │  returns.rs   │  │   │
//! │  │   │ SqlitePool    │◄──│  promotions    │◄──│  sweep.rs     │  │   │
//! │  │   │ + migrations  │   │  catalog/order │   │               │  │   │
//! │  │   └───────────────┘   └────────────────┘   └───────┬───────┘  │   │
//! │  │                                                    │          │   │
//! │  └────────────────────────────────────────────────────┼──────────┘   │
//! │                                                       │              │
//! │                             pure pricing via mercato-core::evaluate  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (stock, price lists, ...)
//! - [`checkout`] - Checkout orchestration and the order state machine
//! - [`returns`] - Whole-invoice return processing
//! - [`sweep`] - Background price list window sweeper
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mercato_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/mercato.db")).await?;
//!
//! let priced = db.checkout().evaluate_cart(&lines).await?;
//! let order = db.checkout().checkout(request).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checkout;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod returns;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testutil;

// =============================================================================
// Re-exports
// =============================================================================

pub use checkout::{CheckoutOrchestrator, CheckoutRequest};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use returns::ReturnProcessor;
pub use sweep::{PriceListSweeper, SweepConfig};

// Repository re-exports for convenience
pub use repository::catalog::CatalogRepository;
pub use repository::order::OrderRepository;
pub use repository::price_list::PriceListRepository;
pub use repository::promotion::PromotionRepository;
pub use repository::stock::StockRepository;

//! # Repository Module
//!
//! Database repository implementations for mercato.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Caller                                                                 │
//! │       │  db.stock().adjust(unit, wh, kind, delta, ref, notes)          │
//! │       ▼                                                                 │
//! │  StockRepository                                                       │
//! │       │  SQL + transaction boundary                                     │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Operations that must share a transaction with the orchestrator        │
//! │  (stock debits during checkout, usage counting on delivery) are        │
//! │  exposed as free `*_in_tx` functions taking &mut SqliteConnection.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - Products, categories, sellable units
//! - [`stock::StockRepository`] - The append-only stock ledger
//! - [`price_list::PriceListRepository`] - Price list lifecycle and prices
//! - [`promotion::PromotionRepository`] - Promotion rules
//! - [`order::OrderRepository`] - Orders, lines, invoices

pub mod catalog;
pub mod order;
pub mod price_list;
pub mod promotion;
pub mod stock;

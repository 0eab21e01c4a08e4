//! Cablebill - monthly billing ledger for cable and broadband connections
//!
//! This is a Domain-Driven Design (DDD) implementation of a multi-tenant
//! billing core: base packs, subscriber connections and a payment ledger
//! that allows at most one billing event per connection and calendar month.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::error::Result;

//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Entities: packs, connections, payments
//! - Value Objects: ids, billing months, plan snapshots
//! - Domain Services: the payment ledger's monthly rules
//! - Repository Interfaces: ports for the catalog, directory and ledger

pub mod clock;
pub mod connection;
pub mod ledger;
pub mod payment;
pub mod plan;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};

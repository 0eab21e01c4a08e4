//! Infrastructure layer - Technical implementations
//!
//! This layer contains the storage backends behind the billing ports:
//! an in-memory store and a PostgreSQL store.

pub mod persistence;

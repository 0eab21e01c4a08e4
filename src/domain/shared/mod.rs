//! Shared kernel - types used by every part of the billing domain

pub mod error;
pub mod ids;
pub mod value_objects;

pub use error::{DomainError, Result};
pub use ids::{IdGenerator, IdScheme, NanoIdGenerator, UuidGenerator};
pub use value_objects::*;

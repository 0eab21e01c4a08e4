//! Shared value objects used across multiple bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Tenant (organization) identifier. Every query and write is scoped by it.
    TenantId
);
string_id!(
    /// Base pack identifier
    PackId
);
string_id!(
    /// Connection identifier
    ConnectionId
);
string_id!(
    /// Payment identifier
    PaymentId
);
string_id!(
    /// Area identifier (areas themselves are managed elsewhere)
    AreaId
);

/// Normalise a smartcard / box number the way it is stored.
pub fn normalize_box_number(raw: &str) -> String {
    raw.trim().to_uppercase()
}

//! Identifier generation for new ledger rows and catalog entries

use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const NANOID_ALPHABET: &[u8] = b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NANOID_LEN: usize = 21;

/// Supplies globally unique opaque ids.
#[cfg_attr(test, mockall::automock)]
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// URL-safe 21 character ids, same shape as nanoid.
#[derive(Debug, Default, Clone, Copy)]
pub struct NanoIdGenerator;

impl IdGenerator for NanoIdGenerator {
    fn next_id(&self) -> String {
        let mut rng = rand::thread_rng();
        let between = Uniform::from(0..NANOID_ALPHABET.len());
        (0..NANOID_LEN)
            .map(|_| NANOID_ALPHABET[between.sample(&mut rng)] as char)
            .collect()
    }
}

/// Random v4 UUIDs rendered as hyphenated strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Id scheme selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    #[default]
    Nanoid,
    Uuid,
}

impl IdScheme {
    pub fn generator(self) -> Arc<dyn IdGenerator> {
        match self {
            IdScheme::Nanoid => Arc::new(NanoIdGenerator),
            IdScheme::Uuid => Arc::new(UuidGenerator),
        }
    }
}

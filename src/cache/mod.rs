//! Process-local caches in front of the durable spec store.
//!
//! Neither cache is thread-safe on its own; the owning
//! [`CachedSpecStore`](crate::store::CachedSpecStore) serialises access.

use thiserror::Error;

mod account;
pub use account::AccountSpecCache;

mod transfer;
pub use transfer::TransferSpecCache;

/// A write that would poison a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("account spec for {found} does not match cache key {key}")]
    KeyMismatch { key: String, found: String },

    #[error("account spec for {0} carries a zero account id")]
    ZeroAccountId(String),
}

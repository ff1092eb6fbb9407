//! Keyed TTL store: the persistence seam underneath the job ledger, the
//! report cache and the summary index.
//!
//! Every record carries its own expiry. There are no cross-key transactions;
//! read-modify-write sequences built on top of this trait are last-writer-wins.

use std::{collections::BTreeSet, fmt, time::Duration};

use async_trait::async_trait;

use crate::error::{Result, VulnError};

#[cfg(any(test, feature = "test-support"))]
pub mod contract;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// A live value together with its remaining lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredValue {
    pub value: Vec<u8>,
    /// `None` when the backend reports the key as persistent.
    pub ttl: Option<Duration>,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Insert only when the key is absent (or expired). Fails with
    /// [`VulnError::AlreadyExists`] otherwise.
    async fn create(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Unconditional upsert; the TTL is reset to `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Fails with [`VulnError::NotFound`] when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<StoredValue>;

    /// Currently-live keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<BTreeSet<String>>;

    /// Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

pub(crate) fn ensure_ttl(key: &str, ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(VulnError::InvalidInput(format!(
            "ttl for {key} must be greater than zero"
        )));
    }
    Ok(())
}

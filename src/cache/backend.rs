//! Backend abstraction for the shared cache.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a cache backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Connection level failure worth retrying (I/O, timeout, refused, busy).
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The server rejected the command (wrong type, bad argument).
    #[error("backend command failed: {0}")]
    Command(String),

    /// The backend could not be reached or configured at all.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// The commands the resilient cache needs from a key-value server.
///
/// Values cross this boundary as strings; JSON encoding happens one layer up.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Round-trip check used by `init`.
    async fn ping(&self) -> Result<(), BackendError>;

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// `SET key value [EX ttl]`.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), BackendError>;

    /// Delete all `keys` with a single command, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError>;

    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, BackendError>;

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, BackendError>;

    async fn decr_by(&self, key: &str, by: i64) -> Result<i64, BackendError>;

    /// One page of `SCAN cursor MATCH pattern COUNT count`.
    /// A returned cursor of 0 means the iteration is complete.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError>;
}

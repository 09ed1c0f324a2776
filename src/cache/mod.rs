//! Resilient key-value cache.
//!
//! # Data Flow
//! ```text
//! caller (CSRF store, handlers)
//!     → ResilientCache (JSON encode/decode, safe defaults)
//!     → CacheHandle::Connected → RetryPolicy → CacheBackend (Redis)
//!     → CacheHandle::Degraded  → default value, no I/O
//! ```
//!
//! # Design Decisions
//! - Never returns an error: every failure degrades to a safe default
//! - Missing or unreachable backend is detected once at `init`
//! - `clear_pattern` scans and deletes in bounded batches

pub mod backend;
pub mod redis_backend;

pub use backend::{BackendError, CacheBackend};
pub use redis_backend::RedisBackend;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::resilience::retries::RetryPolicy;

/// Which backend, if any, calls are routed to.
#[derive(Clone)]
pub enum CacheHandle {
    Connected(Arc<dyn CacheBackend>),
    Degraded,
}

enum Source {
    Url(String),
    Backend(Arc<dyn CacheBackend>),
    None,
}

/// Cache facade that retries transient failures and degrades instead of failing.
pub struct ResilientCache {
    handle: RwLock<CacheHandle>,
    source: Source,
    retry: RetryPolicy,
    scan_batch_size: usize,
    init_lock: Mutex<()>,
}

impl ResilientCache {
    /// Build a cache from configuration. No I/O happens until `init`.
    pub fn from_config(config: &CacheConfig) -> Self {
        let source = match &config.url {
            Some(url) if !url.trim().is_empty() => Source::Url(url.clone()),
            _ => Source::None,
        };
        Self::build(source, retry_policy(config), config.scan_batch_size)
    }

    /// Build a cache over an already constructed backend.
    pub fn with_backend(backend: Arc<dyn CacheBackend>, retry: RetryPolicy) -> Self {
        Self::build(Source::Backend(backend), retry, 100)
    }

    /// A cache with no backend at all.
    pub fn degraded() -> Self {
        Self::build(Source::None, RetryPolicy::default(), 100)
    }

    fn build(source: Source, retry: RetryPolicy, scan_batch_size: usize) -> Self {
        Self {
            handle: RwLock::new(CacheHandle::Degraded),
            source,
            retry,
            scan_batch_size: scan_batch_size.clamp(1, 100),
            init_lock: Mutex::new(()),
        }
    }

    /// Connect and ping the backend. Idempotent; never fails.
    pub async fn init(&self) {
        let _guard = self.init_lock.lock().await;
        if self.is_connected() {
            return;
        }

        let backend: Arc<dyn CacheBackend> = match &self.source {
            Source::None => {
                tracing::warn!("No cache backend configured, running in degraded mode");
                return;
            }
            Source::Backend(backend) => backend.clone(),
            Source::Url(url) => match tokio::time::timeout(self.retry.budget(), RedisBackend::connect(url)).await {
                Ok(Ok(backend)) => Arc::new(backend),
                Ok(Err(e)) => {
                    tracing::warn!(url = %redact_url(url), error = %e, "Cache connection failed, running in degraded mode");
                    return;
                }
                Err(_) => {
                    let e = BackendError::Unavailable("connect timed out".to_string());
                    tracing::warn!(url = %redact_url(url), error = %e, "Cache connection failed, running in degraded mode");
                    return;
                }
            },
        };

        match self.retry.run("PING", || backend.ping()).await {
            Ok(()) => {
                self.set_handle(CacheHandle::Connected(backend));
                tracing::info!("Cache backend connected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache ping failed, running in degraded mode");
            }
        }
    }

    /// Drop the backend handle. Idempotent.
    pub async fn close(&self) {
        let _guard = self.init_lock.lock().await;
        if self.is_connected() {
            self.set_handle(CacheHandle::Degraded);
            tracing::info!("Cache backend closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.handle(), CacheHandle::Connected(_))
    }

    fn handle(&self) -> CacheHandle {
        self.handle
            .read()
            .expect("cache handle lock poisoned")
            .clone()
    }

    fn set_handle(&self, handle: CacheHandle) {
        *self.handle.write().expect("cache handle lock poisoned") = handle;
    }

    /// Fetch a JSON value, or `default` on miss or failure.
    /// Stored text that is not JSON comes back as `Value::String`.
    pub async fn get(&self, key: &str, default: Value) -> Value {
        let CacheHandle::Connected(backend) = self.handle() else {
            return default;
        };

        match self.retry.run("GET", || backend.get(key)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            Ok(None) => default,
            Err(e) => {
                degraded("get", key, &e);
                default
            }
        }
    }

    /// Fetch and deserialize into `T`; `None` on miss, failure or shape mismatch.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get(key, Value::Null).await {
            Value::Null => None,
            value => serde_json::from_value(value).ok(),
        }
    }

    /// Store a JSON-encoded value. Returns false when the write did not happen.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let CacheHandle::Connected(backend) = self.handle() else {
            return false;
        };

        let encoded = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to encode cache value");
                return false;
            }
        };
        let ttl_secs = ttl.map(|t| t.as_secs().max(1));

        match self
            .retry
            .run("SET", || backend.set(key, &encoded, ttl_secs))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                degraded("set", key, &e);
                false
            }
        }
    }

    /// Returns true when the key existed and was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let CacheHandle::Connected(backend) = self.handle() else {
            return false;
        };
        let keys = [key.to_string()];

        match self.retry.run("DEL", || backend.delete(&keys)).await {
            Ok(n) => n > 0,
            Err(e) => {
                degraded("delete", key, &e);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let CacheHandle::Connected(backend) = self.handle() else {
            return false;
        };

        match self.retry.run("EXISTS", || backend.exists(key)).await {
            Ok(found) => found,
            Err(e) => {
                degraded("exists", key, &e);
                false
            }
        }
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> bool {
        let CacheHandle::Connected(backend) = self.handle() else {
            return false;
        };

        match self.retry.run("EXPIRE", || backend.expire(key, seconds)).await {
            Ok(applied) => applied,
            Err(e) => {
                degraded("expire", key, &e);
                false
            }
        }
    }

    /// Atomically add `by`, returning the new value.
    pub async fn increment(&self, key: &str, by: i64) -> Option<i64> {
        let CacheHandle::Connected(backend) = self.handle() else {
            return None;
        };

        match self.retry.run("INCRBY", || backend.incr_by(key, by)).await {
            Ok(value) => Some(value),
            Err(e) => {
                degraded("increment", key, &e);
                None
            }
        }
    }

    /// Atomically subtract `by`, returning the new value.
    pub async fn decrement(&self, key: &str, by: i64) -> Option<i64> {
        let CacheHandle::Connected(backend) = self.handle() else {
            return None;
        };

        match self.retry.run("DECRBY", || backend.decr_by(key, by)).await {
            Ok(value) => Some(value),
            Err(e) => {
                degraded("decrement", key, &e);
                None
            }
        }
    }

    /// Delete every key matching a glob pattern, returning how many were removed.
    ///
    /// Deletes happen per scan page, never as one unbounded command. If any
    /// page fails the count deleted so far is returned.
    pub async fn clear_pattern(&self, pattern: &str) -> u64 {
        let CacheHandle::Connected(backend) = self.handle() else {
            return 0;
        };

        let mut cursor = 0u64;
        let mut deleted = 0u64;
        loop {
            let page = self
                .retry
                .run("SCAN", || backend.scan(cursor, pattern, self.scan_batch_size))
                .await;
            let (next, keys) = match page {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(pattern, deleted, error = %e, "Scan failed, returning partial count");
                    metrics::record_cache_degraded("clear_pattern");
                    return deleted;
                }
            };

            for batch in keys.chunks(self.scan_batch_size) {
                match self.retry.run("DEL", || backend.delete(batch)).await {
                    Ok(n) => deleted += n,
                    Err(e) => {
                        tracing::warn!(pattern, deleted, error = %e, "Batch delete failed, returning partial count");
                        metrics::record_cache_degraded("clear_pattern");
                        return deleted;
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(pattern, deleted, "Cleared keys by pattern");
        deleted
    }
}

fn retry_policy(config: &CacheConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.max_retries,
        Duration::from_millis(config.retry_delay_ms),
        Duration::from_millis(config.command_timeout_ms),
    )
}

fn degraded(op: &'static str, key: &str, error: &BackendError) {
    tracing::warn!(op, key, error = %error, "Cache command failed, using fallback value");
    metrics::record_cache_degraded(op);
}

/// Strip credentials from a connection string before logging it.
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut u) => {
            if u.password().is_some() {
                let _ = u.set_password(Some("***"));
            }
            u.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

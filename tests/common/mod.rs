//! Shared utilities for integration testing.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edge_guard::cache::{BackendError, CacheBackend, ResilientCache};
use edge_guard::config::GuardConfig;
use edge_guard::resilience::retries::RetryPolicy;
use edge_guard::Services;

pub const ADMIN_KEY: &str = "test-admin-key-0123456789";

/// In-memory key-value backend with programmable failures.
///
/// Every command passes through `check`, which can fail it transiently or
/// permanently, and counts it per command name.
#[derive(Default)]
pub struct FlakyBackend {
    data: Mutex<BTreeMap<String, String>>,
    /// Every key ever written, in first-write order; scan cursors index it.
    scan_order: Mutex<Vec<String>>,
    ttls: Mutex<HashMap<String, u64>>,
    calls: Mutex<HashMap<&'static str, u32>>,
    delete_batches: Mutex<Vec<usize>>,
    failing_ops: Mutex<HashSet<&'static str>>,
    fail_next: AtomicU32,
    reject_next: AtomicU32,
    /// Successful scan pages left before scans start failing; negative is unlimited.
    scan_budget: AtomicI64,
    latency: Mutex<Option<Duration>>,
}

impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scan_budget: AtomicI64::new(-1),
            ..Default::default()
        })
    }

    /// Fail the next `n` commands with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` commands with a non-retryable error.
    pub fn reject_next(&self, n: u32) {
        self.reject_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call to `op` transiently until cleared.
    pub fn fail_op(&self, op: &'static str) {
        self.failing_ops.lock().unwrap().insert(op);
    }

    pub fn heal(&self) {
        self.failing_ops.lock().unwrap().clear();
        self.fail_next.store(0, Ordering::SeqCst);
        self.reject_next.store(0, Ordering::SeqCst);
        self.scan_budget.store(-1, Ordering::SeqCst);
        *self.latency.lock().unwrap() = None;
    }

    /// Allow `pages` successful scans, then fail every later one.
    pub fn fail_scans_after(&self, pages: i64) {
        self.scan_budget.store(pages, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn calls(&self, op: &'static str) -> u32 {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn delete_batches(&self) -> Vec<usize> {
        self.delete_batches.lock().unwrap().clone()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.write(key, value);
    }

    fn write(&self, key: &str, value: &str) {
        let previous = self
            .data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        if previous.is_none() {
            let mut order = self.scan_order.lock().unwrap();
            if !order.iter().any(|k| k == key) {
                order.push(key.to_string());
            }
        }
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.ttls.lock().unwrap().get(key).copied()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }

    async fn check(&self, op: &'static str) -> Result<(), BackendError> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if take_one(&self.fail_next) {
            return Err(BackendError::Transient(format!("{op}: injected failure")));
        }
        if take_one(&self.reject_next) {
            return Err(BackendError::Command(format!("{op}: injected rejection")));
        }
        if self.failing_ops.lock().unwrap().contains(op) {
            return Err(BackendError::Transient(format!("{op}: connection reset")));
        }
        if op == "scan" {
            let left = self.scan_budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(BackendError::Transient("scan: connection reset".into()));
            }
            if left > 0 {
                self.scan_budget.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// `*` matches any run of characters; everything else is literal.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        self.check("ping").await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check("get").await?;
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), BackendError> {
        self.check("set").await?;
        self.write(key, value);
        let mut ttls = self.ttls.lock().unwrap();
        match ttl_secs {
            Some(ttl) => ttls.insert(key.to_string(), ttl),
            None => ttls.remove(key),
        };
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        self.check("delete").await?;
        self.delete_batches.lock().unwrap().push(keys.len());
        let mut data = self.data.lock().unwrap();
        Ok(keys.iter().filter(|k| data.remove(k.as_str()).is_some()).count() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        self.check("exists").await?;
        Ok(self.data.lock().unwrap().contains_key(key))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, BackendError> {
        self.check("expire").await?;
        if !self.data.lock().unwrap().contains_key(key) {
            return Ok(false);
        }
        self.ttls.lock().unwrap().insert(key.to_string(), seconds);
        Ok(true)
    }

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, BackendError> {
        self.check("incr_by").await?;
        let current = match self.raw(key) {
            Some(v) => v
                .parse::<i64>()
                .map_err(|_| BackendError::Command("value is not an integer".into()))?,
            None => 0,
        };
        let next = current + by;
        self.write(key, &next.to_string());
        Ok(next)
    }

    async fn decr_by(&self, key: &str, by: i64) -> Result<i64, BackendError> {
        self.check("decr_by").await?;
        let current = self.raw(key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
        let next = current - by;
        self.write(key, &next.to_string());
        Ok(next)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError> {
        self.check("scan").await?;
        // Cursor is a position in write order, so deletes between pages
        // never make the walk skip keys.
        let order = self.scan_order.lock().unwrap();
        let data = self.data.lock().unwrap();
        let start = (cursor as usize).min(order.len());
        let end = (start + count).min(order.len());

        let page = order[start..end]
            .iter()
            .filter(|k| data.contains_key(k.as_str()) && glob_match(pattern, k))
            .cloned()
            .collect();
        let next = if end >= order.len() { 0 } else { end as u64 };
        Ok((next, page))
    }
}

/// Retry policy fast enough for tests.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(200))
}

/// A cache connected to `backend`.
pub async fn connected_cache(backend: Arc<FlakyBackend>) -> Arc<ResilientCache> {
    let cache = Arc::new(ResilientCache::with_backend(backend, fast_policy()));
    cache.init().await;
    assert!(cache.is_connected());
    cache
}

/// Config with the secret file inside `dir` and the admin API enabled.
pub fn test_config(dir: &tempfile::TempDir) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.jwt.secret_file = dir.path().join("secrets.toml").display().to_string();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

pub async fn services(config: GuardConfig, cache: Arc<ResilientCache>) -> Services {
    Services::with_cache(config, cache).await.unwrap()
}

/// Request from a fixed peer address, as `ConnectInfo` would provide it.
pub fn request_from(peer: &str, builder: axum::http::request::Builder, body: Body) -> Request<Body> {
    let mut req = builder.body(body).unwrap();
    let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

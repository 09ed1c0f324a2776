//! CSRF token store and verification middleware.
//!
//! # Responsibilities
//! - Issue cryptographically random, URL-safe tokens
//! - Keep them in the shared cache, or a bounded in-process map when the
//!   cache write fails
//! - Verify tokens on mutating requests before the handler runs
//!
//! # Design Decisions
//! - Tokens are reusable until they expire; verification never consumes them
//! - Fails closed: anything short of a positive lookup rejects the request
//! - The fallback map is one mutex around prune, evict and insert

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::ResilientCache;
use crate::clock::unix_now;
use crate::config::CsrfConfig;
use crate::http::response::{ok, reject, ClientDisconnected, CLIENT_CLOSED_REQUEST};
use crate::observability::metrics;

/// Header carrying the token.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Query parameter fallback.
pub const CSRF_QUERY_PARAM: &str = "csrf_token";

const TOKEN_BYTES: usize = 32;
const MAX_TOKEN_LEN: usize = 256;
const KEY_PREFIX: &str = "csrf:";

/// A freshly issued token.
#[derive(Debug, Clone, Serialize)]
pub struct CsrfToken {
    pub token: String,
    pub created_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenRecord {
    created_at: u64,
}

/// Insertion-ordered fallback storage.
#[derive(Debug, Default)]
struct MemoryTokens {
    order: VecDeque<String>,
    created: HashMap<String, u64>,
}

impl MemoryTokens {
    fn prune_expired(&mut self, now: u64, ttl: u64) {
        let created = &mut self.created;
        self.order.retain(|token| match created.get(token) {
            Some(&at) if now.saturating_sub(at) <= ttl => true,
            _ => {
                created.remove(token);
                false
            }
        });
    }

    fn insert(&mut self, token: String, created_at: u64, ttl: u64, capacity: usize) {
        self.prune_expired(created_at, ttl);
        while self.order.len() >= capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.created.remove(&oldest);
                }
                None => break,
            }
        }
        self.created.insert(token.clone(), created_at);
        self.order.push_back(token);
    }

    fn created_at(&self, token: &str) -> Option<u64> {
        self.created.get(token).copied()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Cache-backed CSRF token store with an in-process fallback.
pub struct CsrfStore {
    cache: Arc<ResilientCache>,
    memory: Mutex<MemoryTokens>,
    ttl_secs: u64,
    max_memory_tokens: usize,
    skip_paths: Vec<String>,
    enabled: bool,
}

impl CsrfStore {
    pub fn new(cache: Arc<ResilientCache>, config: &CsrfConfig) -> Self {
        Self {
            cache,
            memory: Mutex::new(MemoryTokens::default()),
            ttl_secs: config.token_ttl_secs,
            max_memory_tokens: config.max_memory_tokens.max(1),
            skip_paths: config.skip_paths.clone(),
            enabled: config.enabled,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Issue a new token.
    pub async fn generate(&self) -> CsrfToken {
        self.generate_at(unix_now()).await
    }

    /// `generate` with an explicit issue time.
    pub async fn generate_at(&self, now: u64) -> CsrfToken {
        let token = random_token();
        let record = TokenRecord { created_at: now };
        let key = cache_key(&token);

        let stored = self
            .cache
            .set(&key, &record, Some(Duration::from_secs(self.ttl_secs)))
            .await;
        if !stored {
            let mut memory = self.memory.lock().expect("csrf memory store mutex poisoned");
            memory.insert(token.clone(), now, self.ttl_secs, self.max_memory_tokens);
            tracing::debug!(stored = memory.len(), "CSRF token kept in memory fallback");
        }

        CsrfToken {
            token,
            created_at: now,
        }
    }

    /// True iff the token was issued by this store and has not expired.
    pub async fn verify(&self, token: &str) -> bool {
        self.verify_at(token, unix_now()).await
    }

    /// `verify` against an explicit clock reading.
    pub async fn verify_at(&self, token: &str, now: u64) -> bool {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return false;
        }

        let created_at = match self.cache.get_as::<TokenRecord>(&cache_key(token)).await {
            Some(record) => Some(record.created_at),
            None => self
                .memory
                .lock()
                .expect("csrf memory store mutex poisoned")
                .created_at(token),
        };

        match created_at {
            Some(at) => now >= at && now - at <= self.ttl_secs,
            None => false,
        }
    }

    /// Number of tokens held by the in-process fallback.
    pub fn memory_len(&self) -> usize {
        self.memory
            .lock()
            .expect("csrf memory store mutex poisoned")
            .len()
    }

    fn requires_check(&self, method: &Method, path: &str) -> bool {
        self.enabled
            && matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
            && !self.skip_paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn cache_key(token: &str) -> String {
    format!("{}{}", KEY_PREFIX, token)
}

/// Pull the token from the header, falling back to the query string.
pub fn extract_token(req: &Request<Body>) -> Option<String> {
    if let Some(value) = req.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    req.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == CSRF_QUERY_PARAM)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
    })
}

/// Middleware enforcing CSRF tokens on mutating requests.
pub async fn csrf_middleware(
    State(store): State<Arc<CsrfStore>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !store.requires_check(request.method(), &path) {
        return next.run(request).await;
    }

    let token = match extract_token(&request) {
        Some(t) => t,
        None => {
            tracing::warn!(path = %path, method = %request.method(), "CSRF token missing");
            metrics::record_csrf("missing");
            return reject(StatusCode::FORBIDDEN, "CSRF token missing", None);
        }
    };

    if !store.verify(&token).await {
        tracing::warn!(path = %path, method = %request.method(), "CSRF token invalid or expired");
        metrics::record_csrf("invalid");
        return reject(StatusCode::FORBIDDEN, "CSRF token invalid or expired", None);
    }
    metrics::record_csrf("valid");

    let mut response = next.run(request).await;
    if response.extensions().get::<ClientDisconnected>().is_some() {
        tracing::info!(path = %path, "Client disconnected during request");
        if let Ok(status) = StatusCode::from_u16(CLIENT_CLOSED_REQUEST) {
            *response.status_mut() = status;
        }
    } else if response.status().is_server_error() {
        tracing::error!(path = %path, status = %response.status(), "Handler failed after CSRF check");
    }
    response
}

/// Issue a token to the caller.
pub async fn csrf_token_handler(State(store): State<Arc<CsrfStore>>) -> Response {
    let issued = store.generate().await;
    ok(serde_json::json!({
        "csrf_token": issued.token,
        "expires_in": store.ttl_secs(),
    }))
}

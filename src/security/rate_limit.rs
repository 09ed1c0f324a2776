//! Fixed-window admission control with auto-block.
//!
//! # Responsibilities
//! - Allow whitelisted and reject blacklisted clients outright
//! - Count requests per client in fixed windows, per-route rules
//! - Block clients that exceed their window for a configured duration
//! - Periodically drop idle client entries to bound memory
//!
//! # Design Decisions
//! - Per-client read-check-write runs under one `DashMap` entry guard with
//!   no suspension point, so concurrent requests from one client serialize
//! - Fails open: an internal fault allows the request

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::http::response::reject;
use crate::observability::metrics;
use crate::security::access_control::{AccessList, ListVerdict};
use crate::security::client_ip::{client_key, sanitize_client_key};
use crate::security::route_rules::RouteRules;

/// Per-client counters.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub window_start: Instant,
    pub request_count: u32,
    pub blocked_until: Option<Instant>,
    window: Duration,
    last_seen: Instant,
}

impl ClientState {
    fn new(now: Instant, window: Duration) -> Self {
        Self {
            window_start: now,
            request_count: 0,
            blocked_until: None,
            window,
            last_seen: now,
        }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// Idle past the retention horizon and its window already over.
    fn is_stale(&self, now: Instant, retention: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > retention
            && now.saturating_duration_since(self.window_start) >= self.window
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Client is on the blacklist.
    Blocked,
    /// Client exceeded its window or is serving a block.
    RateLimited,
}

/// Backoff information returned with every decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub whitelisted: bool,
    pub reason: Option<DenyReason>,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window (or block) ends.
    pub reset: u64,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub info: RateLimitInfo,
}

impl AdmissionDecision {
    fn allow(info: RateLimitInfo) -> Self {
        Self { allowed: true, info }
    }

    fn deny(info: RateLimitInfo) -> Self {
        Self { allowed: false, info }
    }
}

/// Snapshot for the admin API.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LimiterStats {
    pub tracked_clients: usize,
    pub blocked_clients: usize,
}

/// In-process admission controller.
pub struct AdmissionController {
    clients: DashMap<String, ClientState>,
    rules: RouteRules,
    access: AccessList,
    trust_forwarded_for: bool,
    retention: Duration,
    cleanup_every: u64,
    cleanup_period: Duration,
    processed: AtomicU64,
    epoch: Instant,
    last_cleanup_ms: AtomicU64,
}

impl AdmissionController {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            clients: DashMap::new(),
            rules: RouteRules::new(config.default, &config.routes),
            access: AccessList::new(&config.whitelist, &config.blacklist),
            trust_forwarded_for: config.trust_forwarded_for,
            retention: Duration::from_secs(config.retention_secs),
            cleanup_every: config.cleanup_interval_requests.max(1),
            cleanup_period: Duration::from_secs(config.cleanup_period_secs),
            processed: AtomicU64::new(0),
            epoch: Instant::now(),
            last_cleanup_ms: AtomicU64::new(0),
        }
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    /// Decide whether `client` may call `path` now.
    pub fn check(&self, client: &str, path: &str) -> AdmissionDecision {
        self.check_at(client, path, Instant::now())
    }

    /// `check` against an explicit clock reading.
    pub fn check_at(&self, client: &str, path: &str, now: Instant) -> AdmissionDecision {
        let decision = self.decide(client, path, now);
        // Every check counts toward the cleanup trigger, listed clients included.
        self.maybe_cleanup(now);
        decision
    }

    fn decide(&self, client: &str, path: &str, now: Instant) -> AdmissionDecision {
        let key = sanitize_client_key(client);

        match self.access.verdict(&key) {
            ListVerdict::Whitelisted => {
                return AdmissionDecision::allow(RateLimitInfo {
                    whitelisted: true,
                    ..Default::default()
                });
            }
            ListVerdict::Blacklisted => {
                return AdmissionDecision::deny(RateLimitInfo {
                    reason: Some(DenyReason::Blocked),
                    ..Default::default()
                });
            }
            ListVerdict::Unlisted => {}
        }

        let rule = self.rules.resolve(path);
        let window = Duration::from_secs(rule.window_seconds);
        let mut state = self
            .clients
            .entry(key)
            .or_insert_with(|| ClientState::new(now, window));
        Self::apply(&mut state, rule.requests, window, rule.block_duration_seconds, now)
    }

    fn apply(
        state: &mut ClientState,
        limit: u32,
        window: Duration,
        block_secs: u64,
        now: Instant,
    ) -> AdmissionDecision {
        state.last_seen = now;
        state.window = window;

        if let Some(until) = state.blocked_until {
            if until > now {
                return AdmissionDecision::deny(RateLimitInfo {
                    reason: Some(DenyReason::RateLimited),
                    limit,
                    remaining: 0,
                    reset: ceil_secs(until - now),
                    ..Default::default()
                });
            }
            // Block served. The window still decides: a client whose window
            // is live keeps its count and is blocked again.
            state.blocked_until = None;
        }

        if now.saturating_duration_since(state.window_start) >= window {
            state.window_start = now;
            state.request_count = 0;
        }

        state.request_count = state.request_count.saturating_add(1);
        if state.request_count > limit {
            let block = Duration::from_secs(block_secs);
            state.blocked_until = Some(now + block);
            return AdmissionDecision::deny(RateLimitInfo {
                reason: Some(DenyReason::RateLimited),
                limit,
                remaining: 0,
                reset: block_secs,
                ..Default::default()
            });
        }

        let window_end = state.window_start + window;
        AdmissionDecision::allow(RateLimitInfo {
            limit,
            remaining: limit - state.request_count,
            reset: ceil_secs(window_end.saturating_duration_since(now)),
            ..Default::default()
        })
    }

    /// Run cleanup when either trigger fires: enough checks since the last
    /// run, or enough wall-clock time. Whichever fires resets both.
    fn maybe_cleanup(&self, now: Instant) {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let now_ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        let last_ms = self.last_cleanup_ms.load(Ordering::Relaxed);

        let due_by_count = processed >= self.cleanup_every;
        let due_by_time = now_ms.saturating_sub(last_ms) >= self.cleanup_period.as_millis() as u64;
        if !(due_by_count || due_by_time) {
            return;
        }

        // Usually one caller wins the swap; callers racing within the same
        // millisecond may both run it, which only repeats an idempotent sweep.
        if self
            .last_cleanup_ms
            .compare_exchange(last_ms, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.processed.store(0, Ordering::Relaxed);
        self.cleanup_at(now);
    }

    /// Drop stale, unblocked clients. Returns how many were removed.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let before = self.clients.len();
        self.clients
            .retain(|_, state| state.is_blocked(now) || !state.is_stale(now, self.retention));
        let removed = before.saturating_sub(self.clients.len());

        metrics::record_tracked_clients(self.clients.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.clients.len(), "Rate limiter cleanup");
        }
        removed
    }

    /// Administrative override: lift a block and reset the count.
    /// Returns false if the client is unknown.
    pub fn unblock(&self, client: &str) -> bool {
        let key = sanitize_client_key(client);
        match self.clients.get_mut(&key) {
            Some(mut state) => {
                state.blocked_until = None;
                state.request_count = 0;
                tracing::info!(client = %key, "Client unblocked");
                true
            }
            None => false,
        }
    }

    /// Copy of a client's state, if tracked.
    pub fn client_state(&self, client: &str) -> Option<ClientState> {
        self.clients
            .get(&sanitize_client_key(client))
            .map(|s| s.value().clone())
    }

    pub fn stats(&self) -> LimiterStats {
        let now = Instant::now();
        LimiterStats {
            tracked_clients: self.clients.len(),
            blocked_clients: self.clients.iter().filter(|s| s.is_blocked(now)).count(),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

fn set_limit_headers(response: &mut Response, info: &RateLimitInfo) {
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(info.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(info.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(info.reset));
}

/// Middleware function for admission control.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<AdmissionController>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&request, limiter.trust_forwarded_for());
    let path = request.uri().path().to_string();

    let decision = match std::panic::catch_unwind(AssertUnwindSafe(|| limiter.check(&key, &path))) {
        Ok(decision) => decision,
        Err(_) => {
            tracing::error!(client = %key, path = %path, "Rate limiter fault, allowing request");
            metrics::record_admission("fail_open");
            return next.run(request).await;
        }
    };

    if decision.info.whitelisted {
        metrics::record_admission("whitelisted");
        return next.run(request).await;
    }

    if decision.allowed {
        metrics::record_admission("allowed");
        let mut response = next.run(request).await;
        set_limit_headers(&mut response, &decision.info);
        return response;
    }

    let info = decision.info;
    let detail = serde_json::to_value(&info).ok();
    match info.reason {
        Some(DenyReason::Blocked) => {
            tracing::warn!(client = %key, path = %path, "Blacklisted client rejected");
            metrics::record_admission("blocked");
            reject(StatusCode::FORBIDDEN, "Access denied", detail)
        }
        _ => {
            tracing::warn!(client = %key, path = %path, reset = info.reset, "Rate limit exceeded");
            metrics::record_admission("rate_limited");
            let mut response = reject(StatusCode::TOO_MANY_REQUESTS, "Too many requests", detail);
            set_limit_headers(&mut response, &info);
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(info.reset));
            response
        }
    }
}

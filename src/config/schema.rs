//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the admission and credential layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Shared cache backend settings.
    pub cache: CacheConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// CSRF token settings.
    pub csrf: CsrfConfig,

    /// Signing secret rotation settings.
    pub jwt: JwtConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Cache backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Connection string (e.g., "redis://127.0.0.1:6379/0").
    /// When absent the cache runs degraded from the start.
    pub url: Option<String>,

    /// Total attempts per backend command.
    pub max_retries: u32,

    /// Fixed delay between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Deadline for a single attempt in milliseconds.
    pub command_timeout_ms: u64,

    /// Keys per SCAN page and per DEL batch in `clear_pattern`.
    pub scan_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_retries: 3,
            retry_delay_ms: 100,
            command_timeout_ms: 1000,
            scan_batch_size: 100,
        }
    }
}

/// A single fixed-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    /// Requests allowed per window.
    pub requests: u32,

    /// Window length in seconds.
    pub window_seconds: u64,

    /// How long a client stays blocked after exceeding the window.
    pub block_duration_seconds: u64,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            requests: 100,
            window_seconds: 60,
            block_duration_seconds: 300,
        }
    }
}

/// A rule bound to a route prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteRateLimit {
    /// Path prefix to match (longest prefix wins).
    pub path_prefix: String,

    #[serde(flatten)]
    pub rule: RateLimitRule,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Rule applied when no route prefix matches.
    pub default: RateLimitRule,

    /// Per-route overrides.
    pub routes: Vec<RouteRateLimit>,

    /// Clients that bypass every check.
    pub whitelist: Vec<String>,

    /// Clients that are always rejected.
    pub blacklist: Vec<String>,

    /// Run cleanup after this many processed checks.
    pub cleanup_interval_requests: u64,

    /// Run cleanup after this many seconds, whichever comes first.
    pub cleanup_period_secs: u64,

    /// Idle clients older than this are dropped by cleanup.
    pub retention_secs: u64,

    /// Use the first X-Forwarded-For entry as the client key.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default: RateLimitRule::default(),
            routes: Vec::new(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            cleanup_interval_requests: 1000,
            cleanup_period_secs: 60,
            retention_secs: 300,
            trust_forwarded_for: false,
        }
    }
}

/// CSRF protection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Enable CSRF verification on mutating methods.
    pub enabled: bool,

    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,

    /// Capacity of the in-process fallback store.
    pub max_memory_tokens: usize,

    /// Path prefixes exempt from verification.
    pub skip_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_ttl_secs: 3600,
            max_memory_tokens: 10_000,
            skip_paths: [
                "/docs",
                "/redoc",
                "/openapi.json",
                "/health",
                "/static",
                "/ws",
                "/api/auth/login",
                "/api/auth/register",
                "/api/auth/refresh",
                "/api/stream",
                "/admin",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

/// Signing secret configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Flat file holding the persisted secret pair.
    pub secret_file: String,

    /// Secret used when the file does not exist yet.
    pub initial_secret: String,

    /// Lower bound of the randomized rotation interval, in days.
    pub rotate_interval_min_days: u64,

    /// Upper bound of the randomized rotation interval, in days.
    pub rotate_interval_max_days: u64,

    /// Longest lifetime of an issued token, in seconds.
    pub token_ttl_secs: u64,

    /// How often the scheduler polls rotation and cleanup.
    pub check_interval_secs: u64,

    /// Replace a known insecure secret on first boot.
    pub auto_generate_on_boot: bool,

    /// Length of generated secrets.
    pub secret_length: usize,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret_file: "secrets.toml".to_string(),
            // WARNING: This is a placeholder! It is replaced on first boot.
            initial_secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
            rotate_interval_min_days: 7,
            rotate_interval_max_days: 30,
            token_ttl_secs: 86_400,
            check_interval_secs: 3600,
            auto_generate_on_boot: true,
            secret_length: 64,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. Every error is collected, not just the first.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{GuardConfig, RateLimitRule};
use crate::security::client_ip::parse_client_ip;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            "must be a socket address",
        ));
    }

    if let Some(raw) = &config.cache.url {
        match url::Url::parse(raw) {
            Ok(u) if matches!(u.scheme(), "redis" | "rediss" | "redis+unix" | "unix") => {}
            Ok(u) => errors.push(ValidationError::new(
                "cache.url",
                format!("unsupported scheme '{}'", u.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("cache.url", e.to_string())),
        }
    }
    if config.cache.max_retries == 0 {
        errors.push(ValidationError::new("cache.max_retries", "must be at least 1"));
    }
    if config.cache.scan_batch_size == 0 || config.cache.scan_batch_size > 100 {
        errors.push(ValidationError::new(
            "cache.scan_batch_size",
            "must be between 1 and 100",
        ));
    }

    check_rule("rate_limit.default", &config.rate_limit.default, &mut errors);
    for (i, route) in config.rate_limit.routes.iter().enumerate() {
        let field = format!("rate_limit.routes[{}]", i);
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{}.path_prefix", field),
                "must start with '/'",
            ));
        }
        check_rule(&field, &route.rule, &mut errors);
    }
    for entry in config
        .rate_limit
        .whitelist
        .iter()
        .chain(config.rate_limit.blacklist.iter())
    {
        if parse_client_ip(entry).is_none() {
            errors.push(ValidationError::new(
                "rate_limit.whitelist/blacklist",
                format!("'{}' is not an IP address", entry),
            ));
        }
    }
    if config.rate_limit.cleanup_interval_requests == 0 {
        errors.push(ValidationError::new(
            "rate_limit.cleanup_interval_requests",
            "must be greater than 0",
        ));
    }
    if config.rate_limit.cleanup_period_secs < 60 {
        errors.push(ValidationError::new(
            "rate_limit.cleanup_period_secs",
            "must be at least 60",
        ));
    }

    if config.csrf.token_ttl_secs == 0 {
        errors.push(ValidationError::new("csrf.token_ttl_secs", "must be greater than 0"));
    }
    if config.csrf.max_memory_tokens == 0 {
        errors.push(ValidationError::new(
            "csrf.max_memory_tokens",
            "must be greater than 0",
        ));
    }

    let jwt = &config.jwt;
    if jwt.rotate_interval_min_days == 0 || jwt.rotate_interval_min_days > jwt.rotate_interval_max_days {
        errors.push(ValidationError::new(
            "jwt.rotate_interval_min_days/rotate_interval_max_days",
            "rotate_interval requires 0 < min <= max",
        ));
    }
    if jwt.token_ttl_secs == 0 {
        errors.push(ValidationError::new("jwt.token_ttl_secs", "must be greater than 0"));
    }
    if jwt.check_interval_secs == 0 {
        errors.push(ValidationError::new(
            "jwt.check_interval_secs",
            "must be greater than 0",
        ));
    }
    if jwt.secret_length < 32 {
        errors.push(ValidationError::new("jwt.secret_length", "must be at least 32"));
    }
    if jwt.secret_file.trim().is_empty() {
        errors.push(ValidationError::new("jwt.secret_file", "must not be empty"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if config.admin.enabled && config.admin.api_key.len() < 16 {
        errors.push(ValidationError::new(
            "admin.api_key",
            "must be at least 16 characters when admin is enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rule(field: &str, rule: &RateLimitRule, errors: &mut Vec<ValidationError>) {
    if rule.requests == 0 {
        errors.push(ValidationError::new(format!("{}.requests", field), "must be greater than 0"));
    }
    if rule.window_seconds == 0 {
        errors.push(ValidationError::new(
            format!("{}.window_seconds", field),
            "must be greater than 0",
        ));
    }
}

//! Route prefix → rate limit rule resolution.
//!
//! # Design Decisions
//! - Path matching is case-sensitive prefix matching, no regex
//! - Longest matching prefix wins; ties keep configuration order
//! - Rules are compiled once at startup and never change

use crate::config::{RateLimitRule, RouteRateLimit};

#[derive(Debug, Clone)]
struct PrefixRule {
    prefix: String,
    rule: RateLimitRule,
}

/// Immutable lookup table of per-route rules plus the default.
#[derive(Debug, Clone)]
pub struct RouteRules {
    default: RateLimitRule,
    // Sorted by descending prefix length.
    routes: Vec<PrefixRule>,
}

impl RouteRules {
    pub fn new(default: RateLimitRule, routes: &[RouteRateLimit]) -> Self {
        let mut routes: Vec<PrefixRule> = routes
            .iter()
            .map(|r| PrefixRule {
                prefix: r.path_prefix.clone(),
                rule: r.rule,
            })
            .collect();
        // Stable sort keeps config order among equal lengths.
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { default, routes }
    }

    /// Rule for `path`, falling back to the default.
    pub fn resolve(&self, path: &str) -> RateLimitRule {
        self.routes
            .iter()
            .find(|r| path.starts_with(&r.prefix))
            .map(|r| r.rule)
            .unwrap_or(self.default)
    }
}

//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client_ip.rs (derive a bounded client key)
//!     → rate_limit.rs (access lists, per-route fixed window)
//!     → csrf.rs (token check on mutating requests)
//!     → Handler
//! ```
//!
//! # Design Decisions
//! - Admission fails open: a limiter fault never takes the service down
//! - CSRF fails closed: no positive lookup, no request
//! - No trust in client input, forwarded headers only when configured

pub mod access_control;
pub mod client_ip;
pub mod csrf;
pub mod rate_limit;
pub mod route_rules;

pub use access_control::{AccessList, ListVerdict};
pub use csrf::{csrf_middleware, csrf_token_handler, CsrfStore};
pub use rate_limit::{rate_limit_middleware, AdmissionController, AdmissionDecision, LimiterStats};

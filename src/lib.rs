//! Edge guard library: admission control, CSRF protection, signing secret
//! rotation and a degradation-tolerant cache, assembled into an Axum service.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::GuardConfig;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};

//! Operator API, mounted under `/admin` when enabled.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::cache::ResilientCache;
use crate::credentials::SecretRotator;
use crate::lifecycle::startup::Services;
use crate::security::{AdmissionController, CsrfStore};

#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub cache: Arc<ResilientCache>,
    pub limiter: Arc<AdmissionController>,
    pub csrf: Arc<CsrfStore>,
    pub rotator: Arc<SecretRotator>,
}

impl AdminState {
    pub fn from_services(services: &Services) -> Self {
        Self {
            api_key: Arc::from(services.config.admin.api_key.as_str()),
            cache: services.cache.clone(),
            limiter: services.limiter.clone(),
            csrf: services.csrf.clone(),
            rotator: services.rotator.clone(),
        }
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/clients/{client}/unblock", post(unblock_client))
        .route("/admin/secrets/rotate", post(rotate_secret))
        .route("/admin/secrets", get(get_secrets))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (request id, tracing, timeout, admission, CSRF)
//! - Serve on a listener until the shutdown future resolves

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware,
    response::Response,
    routing::{get, post},
    Extension, Router,
};
use http_body_util::LengthLimitError;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::cache::ResilientCache;
use crate::credentials::{require_bearer, Claims};
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::http::response::{ok, reject, ClientDisconnected};
use crate::lifecycle::startup::Services;
use crate::security::{csrf_middleware, csrf_token_handler, rate_limit_middleware};

/// Upper bound on echoed request bodies.
const MAX_ECHO_BODY: usize = 1024 * 1024;

/// HTTP server for the guard.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(services: &Services) -> Self {
        Self {
            router: build_router(services),
        }
    }

    /// Run the server, accepting connections until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
///
/// Layer order, outermost first: request id, trace, id propagation,
/// timeout, admission, CSRF.
#[allow(deprecated)]
pub fn build_router(services: &Services) -> Router {
    let config = &services.config;

    let health = Router::new()
        .route("/health", get(health_handler))
        .with_state(services.cache.clone());

    let csrf_token = Router::new()
        .route("/api/csrf-token", get(csrf_token_handler))
        .with_state(services.csrf.clone());

    let session = Router::new()
        .route("/api/session", get(session_handler))
        .route_layer(middleware::from_fn_with_state(
            services.verifier.clone(),
            require_bearer,
        ));

    let echo = Router::new().route("/api/echo", post(echo_handler));

    let mut app = health.merge(csrf_token).merge(session).merge(echo);

    if config.admin.enabled {
        app = app.merge(admin::router(admin::AdminState::from_services(services)));
    } else {
        tracing::info!("Admin API disabled");
    }

    app = app.layer(middleware::from_fn_with_state(
        services.csrf.clone(),
        csrf_middleware,
    ));

    if config.rate_limit.enabled {
        app = app.layer(middleware::from_fn_with_state(
            services.limiter.clone(),
            rate_limit_middleware,
        ));
    } else {
        tracing::warn!("Rate limiting disabled");
    }

    app.layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
}

async fn health_handler(State(cache): State<Arc<ResilientCache>>) -> axum::Json<Value> {
    let cache_state = if cache.is_connected() {
        "connected"
    } else {
        "degraded"
    };
    axum::Json(serde_json::json!({
        "status": "ok",
        "cache": cache_state,
    }))
}

async fn session_handler(Extension(claims): Extension<Claims>) -> Response {
    ok(serde_json::json!({
        "subject": claims.sub,
        "expires_at": claims.exp,
    }))
}

async fn echo_handler(request: Request<Body>) -> Response {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_ECHO_BODY) {
        return reject(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large", None);
    }

    // Chunked bodies carry no length; the read limit catches them.
    let bytes = match axum::body::to_bytes(request.into_body(), MAX_ECHO_BODY).await {
        Ok(bytes) => bytes,
        Err(e) if exceeded_length_limit(&e) => {
            return reject(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large", None);
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read echo body");
            let mut response = reject(StatusCode::BAD_REQUEST, "Failed to read request body", None);
            response.extensions_mut().insert(ClientDisconnected);
            return response;
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(body) => ok(body),
        Err(_) => reject(StatusCode::BAD_REQUEST, "Body must be JSON", None),
    }
}

fn exceeded_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

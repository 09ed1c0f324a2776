//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build every subsystem once, in dependency order
//! - Hand out the shared handles the router and background tasks use
//!
//! # Design Decisions
//! - Fail fast: an invalid config or unreadable secret file is fatal
//! - An unreachable cache is not fatal; the service starts degraded
//! - The default signing secret is replaced before traffic is accepted

use std::sync::Arc;
use thiserror::Error;

use crate::cache::ResilientCache;
use crate::config::validation::{validate_config, ValidationError};
use crate::config::GuardConfig;
use crate::credentials::{CredentialError, FileSecretStore, RotationScheduler, SecretRotator, TokenVerifier};
use crate::security::{AdmissionController, CsrfStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", join(.0))]
    Config(Vec<ValidationError>),

    #[error("failed to load signing secrets: {0}")]
    Credentials(#[from] CredentialError),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Everything the request path and background tasks share.
pub struct Services {
    pub config: GuardConfig,
    pub cache: Arc<ResilientCache>,
    pub limiter: Arc<AdmissionController>,
    pub csrf: Arc<CsrfStore>,
    pub rotator: Arc<SecretRotator>,
    pub verifier: Arc<TokenVerifier>,
}

impl Services {
    /// Build services against the configured cache URL.
    pub async fn build(config: GuardConfig) -> Result<Self, StartupError> {
        let cache = Arc::new(ResilientCache::from_config(&config.cache));
        Self::with_cache(config, cache).await
    }

    /// Build services around an existing cache (tests inject one).
    pub async fn with_cache(
        config: GuardConfig,
        cache: Arc<ResilientCache>,
    ) -> Result<Self, StartupError> {
        validate_config(&config).map_err(StartupError::Config)?;

        cache.init().await;

        let limiter = Arc::new(AdmissionController::new(&config.rate_limit));
        let csrf = Arc::new(CsrfStore::new(cache.clone(), &config.csrf));

        let store = Arc::new(FileSecretStore::new(&config.jwt.secret_file));
        let rotator = Arc::new(SecretRotator::load(store, &config.jwt)?);
        let verifier = Arc::new(TokenVerifier::new(rotator.clone()));

        let services = Self {
            config,
            cache,
            limiter,
            csrf,
            rotator,
            verifier,
        };
        services.scheduler().bootstrap();

        tracing::info!(
            cache_connected = services.cache.is_connected(),
            rate_limit_enabled = services.config.rate_limit.enabled,
            csrf_enabled = services.config.csrf.enabled,
            admin_enabled = services.config.admin.enabled,
            "Services initialized"
        );
        Ok(services)
    }

    pub fn scheduler(&self) -> RotationScheduler {
        RotationScheduler::new(self.rotator.clone(), &self.config.jwt)
    }
}

//! Bearer token issuance and verification against the secret pair.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::clock::unix_now;
use crate::credentials::rotator::SecretRotator;
use crate::http::response::reject;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    TokenExpired,

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// Signs with the current secret; accepts current or, during a transition,
/// the old one.
pub struct TokenVerifier {
    rotator: Arc<SecretRotator>,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(rotator: Arc<SecretRotator>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against our own clock reading in `verify_at`.
        validation.validate_exp = false;
        Self {
            rotator,
            validation,
        }
    }

    pub fn issue(&self, subject: &str) -> Result<String, AuthError> {
        self.issue_at(subject, unix_now())
    }

    pub fn issue_at(&self, subject: &str, now: u64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + self.rotator.token_ttl_secs(),
        };
        let state = self.rotator.snapshot();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(state.current_secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, unix_now())
    }

    pub fn verify_at(&self, token: &str, now: u64) -> Result<Claims, AuthError> {
        let state = self.rotator.snapshot();

        match self.decode_with(token, &state.current_secret, now) {
            Err(AuthError::InvalidToken) if state.in_transition() => {
                self.decode_with(token, &state.old_secret, now)
            }
            result => result,
        }
    }

    fn decode_with(&self, token: &str, secret: &str, now: u64) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &self.validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?;

        if now > data.claims.exp {
            return Err(AuthError::TokenExpired);
        }
        Ok(data.claims)
    }
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Rejects requests without a valid bearer token; stores `Claims` in the
/// request extensions for handlers.
pub async fn require_bearer(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let result = match bearer_token(&request) {
        Some(token) => verifier.verify(token),
        None => Err(AuthError::MissingToken),
    };

    match result {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, path = %request.uri().path(), "Bearer authentication failed");
            reject(StatusCode::UNAUTHORIZED, &e.to_string(), None)
        }
    }
}

//! Dual-secret signing key rotation.
//!
//! # State Transitions
//! ```text
//! Stable (old = "")
//!     → rotate: old = current, current = fresh, next_rotate_at = now + random days
//! Transition (old != "")
//!     → cleanup once now >= rotated_at + token_ttl: old = ""
//!     → rotate without force: skipped
//! ```
//!
//! # Design Decisions
//! - At most two secrets are ever valid
//! - The old secret lives exactly as long as the longest token it signed
//! - Rotation interval is randomized so a fleet does not rotate in lockstep
//! - New state is persisted before readers see it

use arc_swap::ArcSwap;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::clock::unix_now;
use crate::config::JwtConfig;
use crate::credentials::store::{CredentialError, SecretState, SecretStore};
use crate::observability::metrics;

const SECS_PER_DAY: u64 = 86_400;

/// Placeholder secrets that must never sign production tokens.
pub const KNOWN_DEFAULT_SECRETS: &[&str] = &[
    "",
    "CHANGE_ME_IN_PRODUCTION",
    "changeme",
    "change-me",
    "secret",
    "your-secret-key",
    "jwt-secret",
    "dev-secret",
    "default",
];

pub fn is_default_secret(secret: &str) -> bool {
    let trimmed = secret.trim();
    KNOWN_DEFAULT_SECRETS
        .iter()
        .any(|d| d.eq_ignore_ascii_case(trimmed))
}

/// High-entropy alphanumeric secret from the OS CSPRNG.
pub fn generate_secret(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Result of a rotation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RotationOutcome {
    Rotated {
        rotated_at: u64,
        next_rotate_at: u64,
        /// Whether the previous secret stays valid for the transition window.
        kept_old_secret: bool,
    },
    Skipped {
        reason: &'static str,
    },
}

/// Public view of the rotation state; never includes secret material.
#[derive(Debug, Clone, Serialize)]
pub struct SecretStatus {
    pub transition_active: bool,
    pub using_default_secret: bool,
    pub rotated_at: Option<u64>,
    pub next_rotate_at: Option<u64>,
    pub old_secret_expires_at: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct RotationPolicy {
    min_days: u64,
    max_days: u64,
    token_ttl_secs: u64,
    secret_length: usize,
}

/// Owns the signing secret pair.
pub struct SecretRotator {
    store: Arc<dyn SecretStore>,
    state: ArcSwap<SecretState>,
    policy: RotationPolicy,
    write_lock: Mutex<()>,
}

impl SecretRotator {
    /// Load persisted state, seeding it from `initial_secret` on first run.
    pub fn load(store: Arc<dyn SecretStore>, config: &JwtConfig) -> Result<Self, CredentialError> {
        let state = match store.load()? {
            Some(state) => state,
            None => {
                let state = SecretState::new(config.initial_secret.clone());
                store.save(&state)?;
                tracing::info!("Initialized signing secret state");
                state
            }
        };

        Ok(Self {
            store,
            state: ArcSwap::from_pointee(state),
            policy: RotationPolicy {
                min_days: config.rotate_interval_min_days,
                max_days: config.rotate_interval_max_days.max(config.rotate_interval_min_days),
                token_ttl_secs: config.token_ttl_secs,
                secret_length: config.secret_length,
            },
            write_lock: Mutex::new(()),
        })
    }

    /// Current state for verification. Cheap; never blocks on rotation.
    pub fn snapshot(&self) -> Arc<SecretState> {
        self.state.load_full()
    }

    pub fn token_ttl_secs(&self) -> u64 {
        self.policy.token_ttl_secs
    }

    /// Rotate the signing secret.
    ///
    /// Skips (without error) while a transition is in progress unless
    /// `force` is set. `auto_generate` forces rotation only when the current
    /// secret is a known default.
    pub fn rotate(&self, force: bool, auto_generate: bool) -> Result<RotationOutcome, CredentialError> {
        self.rotate_at(force, auto_generate, unix_now())
    }

    pub fn rotate_at(
        &self,
        force: bool,
        auto_generate: bool,
        now: u64,
    ) -> Result<RotationOutcome, CredentialError> {
        let _guard = self.write_lock.lock().expect("secret rotation mutex poisoned");
        let current = self.state.load_full();
        let current_is_default = is_default_secret(&current.current_secret);
        let forced = force || (auto_generate && current_is_default);

        if current.in_transition() && !forced {
            metrics::record_rotation("skipped");
            return Ok(RotationOutcome::Skipped {
                reason: "transition in progress",
            });
        }

        let kept_old_secret = !current_is_default;
        let next_rotate_at = now + self.random_interval_secs();
        let next = SecretState {
            current_secret: generate_secret(self.policy.secret_length),
            old_secret: if kept_old_secret {
                current.current_secret.clone()
            } else {
                String::new()
            },
            rotated_at: Some(now),
            next_rotate_at: Some(next_rotate_at),
        };

        if let Err(e) = self.store.save(&next) {
            metrics::record_rotation("failed");
            tracing::error!(error = %e, "Failed to persist rotated secret, keeping previous state");
            return Err(e);
        }
        self.state.store(Arc::new(next));

        metrics::record_rotation("rotated");
        tracing::info!(
            rotated_at = now,
            next_rotate_at,
            kept_old_secret,
            forced,
            "Signing secret rotated"
        );

        Ok(RotationOutcome::Rotated {
            rotated_at: now,
            next_rotate_at,
            kept_old_secret,
        })
    }

    fn random_interval_secs(&self) -> u64 {
        let min = self.policy.min_days * SECS_PER_DAY;
        let max = self.policy.max_days * SECS_PER_DAY;
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    /// Whether a rotation is due.
    pub fn should_rotate(&self) -> bool {
        self.should_rotate_at(unix_now())
    }

    pub fn should_rotate_at(&self, now: u64) -> bool {
        let state = self.state.load();
        if state.in_transition() {
            return false;
        }
        if is_default_secret(&state.current_secret) {
            return true;
        }

        match state.next_rotate_at {
            Some(due) => now >= due,
            None => match self.store.modified_at() {
                Some(modified) => now >= modified + self.policy.min_days * SECS_PER_DAY,
                None => true,
            },
        }
    }

    /// Whether the old secret has outlived every token it could have signed.
    pub fn should_cleanup(&self) -> bool {
        self.should_cleanup_at(unix_now())
    }

    pub fn should_cleanup_at(&self, now: u64) -> bool {
        let state = self.state.load();
        if !state.in_transition() {
            return false;
        }
        match state.rotated_at {
            // Tokens are still accepted at `now == exp`.
            Some(rotated) => now > rotated + self.policy.token_ttl_secs,
            // Unknown rotation time: keep it, the next rotation restarts the clock.
            None => false,
        }
    }

    /// Drop the old secret once its tokens can no longer be live.
    /// Returns true if it was cleared.
    pub fn cleanup_old_secret(&self) -> Result<bool, CredentialError> {
        self.cleanup_old_secret_at(unix_now())
    }

    pub fn cleanup_old_secret_at(&self, now: u64) -> Result<bool, CredentialError> {
        let _guard = self.write_lock.lock().expect("secret rotation mutex poisoned");
        if !self.should_cleanup_at(now) {
            return Ok(false);
        }

        let mut next = SecretState::clone(&self.state.load_full());
        next.old_secret.clear();
        self.store.save(&next)?;
        self.state.store(Arc::new(next));

        tracing::info!("Old signing secret retired");
        Ok(true)
    }

    pub fn status(&self) -> SecretStatus {
        let state = self.state.load();
        SecretStatus {
            transition_active: state.in_transition(),
            using_default_secret: is_default_secret(&state.current_secret),
            rotated_at: state.rotated_at,
            next_rotate_at: state.next_rotate_at,
            old_secret_expires_at: if state.in_transition() {
                state.rotated_at.map(|r| r + self.policy.token_ttl_secs)
            } else {
                None
            },
        }
    }
}

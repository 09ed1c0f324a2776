//! Background secret rotation.
//!
//! # Responsibilities
//! - Replace a placeholder secret on first boot
//! - Periodically retire the old secret, then rotate when due

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::JwtConfig;
use crate::credentials::rotator::{is_default_secret, RotationOutcome, SecretRotator};

#[derive(Clone)]
pub struct RotationScheduler {
    rotator: Arc<SecretRotator>,
    check_interval: Duration,
    auto_generate_on_boot: bool,
}

impl RotationScheduler {
    pub fn new(rotator: Arc<SecretRotator>, config: &JwtConfig) -> Self {
        Self {
            rotator,
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
            auto_generate_on_boot: config.auto_generate_on_boot,
        }
    }

    /// Replace a known-default secret before the first request is served.
    pub fn bootstrap(&self) {
        if !is_default_secret(&self.rotator.snapshot().current_secret) {
            return;
        }
        if !self.auto_generate_on_boot {
            tracing::warn!(
                "Signing secret is a known default; auto-generation on boot is disabled, \
                 the first scheduled check will replace it"
            );
            return;
        }

        match self.rotator.rotate(false, true) {
            Ok(_) => tracing::info!("Replaced default signing secret on boot"),
            Err(e) => tracing::error!(error = %e, "Failed to replace default signing secret"),
        }
    }

    /// One scheduler pass: cleanup first, so a finished transition can
    /// rotate in the same tick. A default secret is always due, so it is
    /// replaced here even when boot-time generation is off.
    pub fn tick(&self) {
        if let Err(e) = self.rotator.cleanup_old_secret() {
            tracing::error!(error = %e, "Failed to retire old signing secret");
        }

        if !self.rotator.should_rotate() {
            return;
        }
        match self.rotator.rotate(false, false) {
            Ok(RotationOutcome::Rotated { next_rotate_at, .. }) => {
                tracing::info!(next_rotate_at, "Scheduled rotation completed");
            }
            Ok(RotationOutcome::Skipped { reason }) => {
                tracing::debug!(reason, "Scheduled rotation skipped");
            }
            Err(e) => tracing::error!(error = %e, "Scheduled rotation failed"),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.check_interval.as_secs(),
            "Rotation scheduler starting"
        );

        let mut ticker = time::interval(self.check_interval);
        // The first tick fires immediately; bootstrap already covered boot.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Rotation and cleanup fsync the secret file.
                    let pass = self.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || pass.tick()).await {
                        tracing::error!(error = %e, "Rotation pass panicked");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rotation scheduler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

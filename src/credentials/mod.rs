//! Signing secret management.
//!
//! # Data Flow
//! ```text
//! store.rs:     secrets file ⇄ SecretState (atomic replace)
//! rotator.rs:   SecretState → rotate / cleanup → published snapshot
//! verifier.rs:  snapshot → issue / verify bearer tokens
//! scheduler.rs: interval → cleanup → rotate when due
//! ```

pub mod rotator;
pub mod scheduler;
pub mod store;
pub mod verifier;

pub use rotator::{generate_secret, RotationOutcome, SecretRotator, SecretStatus};
pub use scheduler::RotationScheduler;
pub use store::{CredentialError, FileSecretStore, SecretState, SecretStore};
pub use verifier::{require_bearer, AuthError, Claims, TokenVerifier};

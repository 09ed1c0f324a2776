//! Persistence for the signing secret pair.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::clock::modified_unix;

/// Errors from loading or persisting secret state.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("secret file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("secret file is malformed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to encode secret state: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("failed to replace secret file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// The persisted signing secret pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecretState {
    pub current_secret: String,

    /// Non-empty only during the transition window after a rotation.
    #[serde(default)]
    pub old_secret: String,

    /// Unix seconds of the last rotation.
    #[serde(default)]
    pub rotated_at: Option<u64>,

    /// Unix seconds after which the next rotation is due.
    #[serde(default)]
    pub next_rotate_at: Option<u64>,
}

impl SecretState {
    pub fn new(current_secret: impl Into<String>) -> Self {
        Self {
            current_secret: current_secret.into(),
            ..Default::default()
        }
    }

    pub fn in_transition(&self) -> bool {
        !self.old_secret.is_empty()
    }
}

// Secrets never go to logs through `{:?}`.
impl std::fmt::Debug for SecretState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretState")
            .field("current_secret", &"<redacted>")
            .field("in_transition", &self.in_transition())
            .field("rotated_at", &self.rotated_at)
            .field("next_rotate_at", &self.next_rotate_at)
            .finish()
    }
}

/// Durable storage for `SecretState`.
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<SecretState>, CredentialError>;

    /// Replace the stored state in one step.
    fn save(&self, state: &SecretState) -> Result<(), CredentialError>;

    /// When the stored state was last written, in Unix seconds.
    fn modified_at(&self) -> Option<u64>;
}

/// Flat TOML file, replaced atomically through a sibling temp file.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self) -> Result<Option<SecretState>, CredentialError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(toml::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, state: &SecretState) -> Result<(), CredentialError> {
        let encoded = toml::to_string(state)?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.dir())?;
        tmp.write_all(encoded.as_bytes())?;
        tmp.as_file().sync_all()?;
        restrict_permissions(tmp.path())?;
        tmp.persist(&self.path)?;
        Ok(())
    }

    fn modified_at(&self) -> Option<u64> {
        modified_unix(&self.path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets.toml"));
        assert!(store.load().unwrap().is_none());
        assert!(store.modified_at().is_none());
    }

    #[test]
    fn test_save_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets.toml"));

        let mut state = SecretState::new("first");
        state.rotated_at = Some(10);
        store.save(&state).unwrap();

        state.current_secret = "second".into();
        state.old_secret = "first".into();
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), Some(state));
        assert!(store.modified_at().is_some());
        // Only the target remains; temp files were renamed away.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "current_secret = \"abc\"\n").unwrap();

        let state = FileSecretStore::new(&path).load().unwrap().unwrap();
        assert_eq!(state.current_secret, "abc");
        assert!(!state.in_transition());
        assert!(state.next_rotate_at.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let state = SecretState::new("super-secret-value");
        assert!(!format!("{:?}", state).contains("super-secret-value"));
    }
}

//! Persistence of key material between convergence passes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, WgLinksError};
use crate::fleet::KeyMaterial;

/// Key material of every key pair, keyed by key pair name.
pub type KeyState = BTreeMap<String, KeyMaterial>;

/// Loads and saves key state.
pub trait StateStore {
    /// Loads the stored key state; an empty map if nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if stored state exists but cannot be read.
    fn load(&self) -> Result<KeyState>;

    /// Replaces the stored key state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    fn save(&self, state: &KeyState) -> Result<()>;
}

/// Stores key state in a single JSON file readable only by its owner.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<KeyState> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no key state stored yet");
                return Ok(KeyState::new());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents).map_err(|e| {
            WgLinksError::state(format!("cannot parse {}: {e}", self.path.display()))
        })
    }

    fn save(&self, state: &KeyState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(state)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| {
            WgLinksError::state(format!("cannot replace {}: {}", self.path.display(), e.error))
        })?;

        debug!(path = %self.path.display(), keypairs = state.len(), "saved key state");
        Ok(())
    }
}

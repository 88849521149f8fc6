//! Key generation through the external `wg` tool.
//!
//! The tool runs on the deployer, not on the target machine: the private
//! key, its public key and an independent preshared key are produced in one
//! shell transaction and printed as three whitespace-separated tokens.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, WgLinksError};
use crate::exec::quote;
use crate::keys::{GeneratedKeys, KEY_SIZE, PresharedKey, PrivateKey};

/// Default name of the key tool.
pub const WG_TOOL: &str = "wg";

/// Produces fresh key triples.
#[allow(async_fn_in_trait)]
pub trait KeyGenerator {
    /// Generates a new triple for `endpoint`.
    async fn generate(&self, endpoint: &str) -> Result<GeneratedKeys>;
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|segment| segment.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Generates keys by shelling out to `wg genkey`, `wg pubkey` and `wg genpsk`.
#[derive(Debug, Clone, Default)]
pub struct WgTool {
    path: Option<PathBuf>,
}

impl WgTool {
    /// Uses `wg` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the tool at `path`.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Locates the tool.
    ///
    /// # Errors
    ///
    /// Returns [`WgLinksError::ToolNotFound`] if the configured path is not a
    /// file or `wg` is not on `PATH`.
    pub fn resolve(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(WgLinksError::ToolNotFound {
                tool: path.display().to_string(),
            }),
            None => find_in_path(WG_TOOL).ok_or_else(|| WgLinksError::ToolNotFound {
                tool: WG_TOOL.to_string(),
            }),
        }
    }

    fn script(wg: &Path) -> String {
        let wg = quote(&wg.to_string_lossy());
        format!(
            r#"PRV="$({wg} genkey)" && PUB="$({wg} pubkey <<< "$PRV")" && PSK="$({wg} genpsk)" && echo "$PRV $PUB $PSK""#
        )
    }
}

impl KeyGenerator for WgTool {
    async fn generate(&self, endpoint: &str) -> Result<GeneratedKeys> {
        let wg = self.resolve()?;
        debug!(endpoint, tool = %wg.display(), "generating wireguard keys");

        let output = Command::new("bash")
            .arg("-c")
            .arg(Self::script(&wg))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WgLinksError::key_generation_failed(endpoint, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WgLinksError::key_generation_failed(
                endpoint,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        GeneratedKeys::parse(&stdout)
            .map_err(|e| WgLinksError::key_generation_failed(endpoint, e.to_string()))
    }
}

/// A fake generator for testing.
///
/// Hands out a distinct, reproducible triple on every call. Clones share the
/// sequence.
#[derive(Debug, Clone, Default)]
pub struct FakeKeyGenerator {
    next: Arc<AtomicU32>,
}

impl FakeKeyGenerator {
    /// Creates a generator starting from the first triple.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of triples handed out so far.
    #[must_use]
    pub fn generated(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }
}

impl KeyGenerator for FakeKeyGenerator {
    async fn generate(&self, endpoint: &str) -> Result<GeneratedKeys> {
        let seed = self.next.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        debug!(endpoint, seed, "handing out fake wireguard keys");
        Ok(GeneratedKeys::new(
            PrivateKey::from_bytes_array(seeded(0x11, seed)),
            PresharedKey::from_bytes_array(seeded(0xa5, seed)),
        ))
    }
}

// The seed sits away from the bytes x25519 clamps.
fn seeded(fill: u8, seed: u32) -> [u8; KEY_SIZE] {
    let mut bytes = [fill; KEY_SIZE];
    bytes[8..12].copy_from_slice(&seed.to_le_bytes());
    bytes
}

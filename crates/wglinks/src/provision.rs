//! Key provisioning: generate key material once, push it to the machine.
//!
//! Keys are written before the running tunnel service is stopped, so the
//! service never restarts against files that are only half written.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, WgLinksError};
use crate::exec::{CommandRunner, quote};
use crate::fleet::{Endpoint, Fleet, KeyMaterial};
use crate::keygen::{KeyGenerator, WgTool};

/// Default directory key files are written to on each machine.
pub const DEFAULT_KEY_DIR: &str = "/etc/wglinks";

/// File name of the private key.
pub const PRIVATE_KEY_FILE: &str = "wireguard.private";
/// File name of the public key.
pub const PUBLIC_KEY_FILE: &str = "wireguard.public";
/// File name of the preshared key.
pub const PSK_FILE: &str = "wireguard.psk";

/// Provisioner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Directory holding the key files on each machine.
    pub key_dir: PathBuf,
    /// Explicit path of the `wg` tool; `PATH` is searched if unset.
    pub wg_path: Option<PathBuf>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from(DEFAULT_KEY_DIR),
            wg_path: None,
        }
    }
}

impl ProvisionerConfig {
    /// Sets the remote key directory.
    #[must_use]
    pub fn with_key_dir(mut self, key_dir: impl Into<PathBuf>) -> Self {
        self.key_dir = key_dir.into();
        self
    }

    /// Sets the `wg` tool path.
    #[must_use]
    pub fn with_wg_path(mut self, wg_path: impl Into<PathBuf>) -> Self {
        self.wg_path = Some(wg_path.into());
        self
    }

    /// Key generator matching these settings.
    #[must_use]
    pub fn key_tool(&self) -> WgTool {
        self.wg_path
            .as_ref()
            .map_or_else(WgTool::new, |path| WgTool::with_path(path.clone()))
    }

    /// Remote path of the private key file.
    #[must_use]
    pub fn private_key_file(&self) -> PathBuf {
        self.key_dir.join(PRIVATE_KEY_FILE)
    }

    /// Remote path of the preshared key file.
    #[must_use]
    pub fn psk_file(&self) -> PathBuf {
        self.key_dir.join(PSK_FILE)
    }
}

/// What [`KeyProvisioner::ensure_keys`] did for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// The endpoint has no links.
    Skipped,
    /// Fresh keys were generated and uploaded.
    Generated,
    /// Existing keys were uploaded again on request.
    Resynced,
    /// Keys were already in place.
    Unchanged,
}

fn upload_script(key_dir: &Path, private: &str, public: &str, psk: &str) -> String {
    let dir = quote(&key_dir.to_string_lossy());
    let file = |name: &str| quote(&key_dir.join(name).to_string_lossy());
    format!(
        "umask 077 && mkdir -p {dir} && echo {} > {} && echo {} > {} && echo {} > {}",
        quote(private),
        file(PRIVATE_KEY_FILE),
        quote(public),
        file(PUBLIC_KEY_FILE),
        quote(psk),
        file(PSK_FILE),
    )
}

fn stop_service_script(service: &str) -> String {
    let service = quote(service);
    format!(
        "if systemctl is-active --quiet {service}; then systemctl stop {service} || exit 1; else exit 0; fi"
    )
}

/// Generates key material and pushes it to fleet machines.
#[derive(Debug, Clone)]
pub struct KeyProvisioner<R, G> {
    runner: R,
    generator: G,
    config: ProvisionerConfig,
}

impl<R: CommandRunner, G: KeyGenerator> KeyProvisioner<R, G> {
    /// Creates a provisioner.
    pub fn new(runner: R, generator: G, config: ProvisionerConfig) -> Self {
        Self {
            runner,
            generator,
            config,
        }
    }

    /// Returns the settings.
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Returns the command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Makes sure `endpoint` holds key material and the machine has it on disk.
    ///
    /// Endpoints without links are left alone. Missing secrets are generated
    /// and uploaded, and only stored once the upload succeeded. Complete
    /// secrets are uploaded again only if the key pair requests it.
    ///
    /// # Errors
    ///
    /// Returns [`WgLinksError::KeypairNotFound`] for a linked endpoint
    /// without a key pair, or any generation or upload failure.
    pub async fn ensure_keys(&self, fleet: &mut Fleet, endpoint: &str) -> Result<ProvisionOutcome> {
        let machine = fleet
            .machine(endpoint)
            .cloned()
            .ok_or_else(|| WgLinksError::invalid_fleet(format!("unknown machine '{endpoint}'")))?;

        if machine.links.is_empty() {
            debug!(endpoint, "no wg links, skipping key provisioning");
            return Ok(ProvisionOutcome::Skipped);
        }

        let keypair = fleet
            .keypair(endpoint)
            .ok_or_else(|| WgLinksError::KeypairNotFound {
                endpoint: endpoint.to_string(),
            })?;

        if !keypair.is_ready() {
            let keys = self.generator.generate(endpoint).await?;
            let mut material = keypair.material.clone();
            material.private = Some(keys.private.to_base64());
            material.public = Some(keys.public.to_base64());
            material.psk = Some(keys.psk.to_base64());

            self.upload(&machine, &material).await?;

            if let Some(keypair) = fleet.keypair_mut(endpoint) {
                keypair.material = material;
            }
            info!(endpoint, public_key = %keys.public, "generated wireguard keys");
            return Ok(ProvisionOutcome::Generated);
        }

        if keypair.material.options.sync_state {
            let material = keypair.material.clone();
            self.upload(&machine, &material).await?;
            info!(endpoint, "re-synced wireguard keys");
            return Ok(ProvisionOutcome::Resynced);
        }

        debug!(endpoint, "wireguard keys already provisioned");
        Ok(ProvisionOutcome::Unchanged)
    }

    /// Writes `material` to `target` and stops its tunnel service if running.
    ///
    /// # Errors
    ///
    /// Returns [`WgLinksError::UploadFailed`] if the files could not be
    /// written and [`WgLinksError::ServiceStopFailed`] if the service could
    /// not be stopped afterwards.
    pub async fn upload(&self, target: &Endpoint, material: &KeyMaterial) -> Result<()> {
        let script = upload_script(
            &self.config.key_dir,
            material.private.as_deref().unwrap_or_default(),
            material.public.as_deref().unwrap_or_default(),
            material.psk.as_deref().unwrap_or_default(),
        );
        let output = self
            .runner
            .run(target, &script)
            .await
            .map_err(|e| WgLinksError::upload_failed(&target.name, e.to_string()))?;
        if !output.success() {
            return Err(WgLinksError::upload_failed(&target.name, output.diagnostic()));
        }
        debug!(endpoint = %target.name, key_dir = %self.config.key_dir.display(), "uploaded wireguard keys");

        let service = material.service_name();
        let output = self
            .runner
            .run(target, &stop_service_script(&service))
            .await
            .map_err(|e| {
                warn!(endpoint = %target.name, %service, error = %e, "service stop did not run");
                WgLinksError::ServiceStopFailed {
                    endpoint: target.name.clone(),
                    service: service.clone(),
                }
            })?;
        if !output.success() {
            return Err(WgLinksError::ServiceStopFailed {
                endpoint: target.name.clone(),
                service,
            });
        }
        Ok(())
    }
}

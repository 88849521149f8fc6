//! Converge command implementation.

use std::io::Write;

use tracing::{info, warn};
use wglinks::{KeyProvisioner, ProvisionerConfig, SshConfig, SshRunner, StateStore, converge};

use crate::cli::ConvergeArgs;
use crate::commands::{FleetPaths, write_spec};
use crate::error::CliError;
use crate::output::{OutputFormat, PassView};

/// Converge command executor.
pub struct ConvergeCommand {
    paths: FleetPaths,
    config: ProvisionerConfig,
}

impl ConvergeCommand {
    /// Create a new converge command.
    #[must_use]
    pub fn new(paths: FleetPaths, config: ProvisionerConfig) -> Self {
        Self { paths, config }
    }

    /// Execute the converge command.
    ///
    /// Key state is saved even when the pass fails, so keys already uploaded
    /// are not regenerated on the next run.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, the pass itself, or saving state fails.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &ConvergeArgs,
    ) -> Result<(), CliError> {
        let (mut fleet, store) = self.paths.load()?;

        let mut ssh = SshConfig::default().with_user(&args.ssh_user);
        for option in &args.ssh_options {
            ssh = ssh.with_option(option);
        }
        let config = match &args.wg_path {
            Some(path) => self.config.clone().with_wg_path(path),
            None => self.config.clone(),
        };
        let provisioner = KeyProvisioner::new(SshRunner::new(ssh), config.key_tool(), config);

        let result = converge(&mut fleet, &provisioner).await;

        let saved = store.save(&fleet.key_state());
        match &saved {
            Ok(()) => info!(path = %store.path().display(), "key state saved"),
            Err(e) => warn!(path = %store.path().display(), error = %e, "failed to save key state"),
        }
        let outcome = result?;
        saved?;

        if let Some(path) = &args.output {
            write_spec(path, &outcome.spec)?;
        }
        format.write(writer, &PassView(&outcome))
    }
}

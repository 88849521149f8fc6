//! Plan command implementation.
//!
//! Builds the peer matrix from the fleet definition and stored key state
//! without contacting any machine.

use std::io::Write;

use crate::cli::PlanArgs;
use crate::commands::{FleetPaths, write_spec};
use crate::error::CliError;
use crate::output::{OutputFormat, SpecView};

/// Plan command executor.
pub struct PlanCommand {
    paths: FleetPaths,
    config: wglinks::ProvisionerConfig,
}

impl PlanCommand {
    /// Create a new plan command.
    #[must_use]
    pub fn new(paths: FleetPaths, config: wglinks::ProvisionerConfig) -> Self {
        Self { paths, config }
    }

    /// Execute the plan command.
    ///
    /// # Errors
    ///
    /// Returns an error if the fleet cannot be loaded or fails validation.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, args: &PlanArgs) -> Result<(), CliError> {
        let (fleet, _) = self.paths.load()?;
        let spec = wglinks::matrix::build(&fleet, &self.config)?;

        if let Some(path) = &args.output {
            write_spec(path, &spec)?;
        }
        format.write(writer, &SpecView(&spec))
    }
}

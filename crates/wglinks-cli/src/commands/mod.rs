//! CLI command implementations.
//!
//! - [`converge`] - Full pass against live machines
//! - [`plan`] - Peer matrix from stored key state
//! - [`address`] - Tunnel address arithmetic

pub mod address;
pub mod converge;
pub mod plan;

pub use address::AddressCommand;
pub use converge::ConvergeCommand;
pub use plan::PlanCommand;

use std::fs;
use std::path::{Path, PathBuf};

use wglinks::{Fleet, FleetDefinition, JsonStateStore, PhysicalSpec, StateStore};

use crate::error::CliError;

/// Paths shared by commands that work on a fleet.
#[derive(Debug, Clone)]
pub struct FleetPaths {
    /// Fleet definition.
    pub fleet: PathBuf,
    /// Key state file.
    pub state: PathBuf,
}

impl FleetPaths {
    /// Loads the fleet definition and overlays stored key state.
    pub(crate) fn load(&self) -> Result<(Fleet, JsonStateStore), CliError> {
        let json = fs::read_to_string(&self.fleet).map_err(|source| CliError::FleetRead {
            path: self.fleet.clone(),
            source,
        })?;
        let mut fleet = Fleet::from_definition(FleetDefinition::from_json(&json)?)?;
        let store = JsonStateStore::new(&self.state);
        fleet.apply_state(&store.load()?);
        Ok((fleet, store))
    }
}

/// Writes the physical configuration as pretty JSON.
pub(crate) fn write_spec(path: &Path, spec: &PhysicalSpec) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(spec)
        .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
    fs::write(path, json + "\n")?;
    Ok(())
}

//! `WireGuard` mesh links for declaratively managed fleets.
//!
//! Each convergence pass derives tunnel addresses from machine indexes,
//! provisions key material onto reachable machines, brings preshared keys
//! back in sync and emits the per-machine interface configuration for every
//! link declared from both ends.
//!
//! # Example
//!
//! ```rust,no_run
//! use wglinks::{
//!     Fleet, FleetDefinition, KeyProvisioner, ProvisionerConfig, SshConfig, SshRunner, converge,
//! };
//!
//! # async fn example(json: &str) -> wglinks::Result<()> {
//! let mut fleet = Fleet::from_definition(FleetDefinition::from_json(json)?)?;
//! let config = ProvisionerConfig::default();
//! let provisioner = KeyProvisioner::new(
//!     SshRunner::new(SshConfig::default()),
//!     config.key_tool(),
//!     config,
//! );
//!
//! let outcome = converge(&mut fleet, &provisioner).await?;
//! println!("{}", serde_json::to_string_pretty(&outcome.spec)?);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod converge;
pub mod error;
pub mod exec;
pub mod fleet;
pub mod keygen;
pub mod keys;
pub mod matrix;
pub mod physical;
pub mod provision;
pub mod reconcile;
pub mod state;

pub use address::{BaseIpv4, allocate};
pub use converge::{PassOutcome, converge};
pub use error::{KeyError, Result, WgLinksError};
pub use exec::{CommandOutput, CommandRunner, FakeRunner, SshConfig, SshRunner};
pub use fleet::{
    Endpoint, Fleet, FleetDefinition, KeyMaterial, KeypairOptions, KeypairResource,
    MachineDefinition, MachineState,
};
pub use keygen::{FakeKeyGenerator, KeyGenerator, WgTool};
pub use keys::{GeneratedKeys, PresharedKey, PrivateKey, PublicKey};
pub use physical::{EndpointConfig, HostAliasTable, InterfaceBlock, PeerRecord, PhysicalSpec};
pub use provision::{KeyProvisioner, ProvisionOutcome, ProvisionerConfig};
pub use reconcile::{ReconcileReport, reconcile};
pub use state::{JsonStateStore, KeyState, StateStore};

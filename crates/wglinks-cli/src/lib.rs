//! # wglinks-cli
//!
//! Command-line front end for `wglinks`.
//!
//! - `converge` provisions keys over ssh, reconciles preshared keys and
//!   prints the resulting per-machine configuration
//! - `plan` builds the configuration from stored key state only
//! - `address` evaluates the tunnel address arithmetic
//!
//! The fleet definition is a JSON document; key state is kept in a separate
//! owner-only JSON file between runs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{AddressArgs, Cli, Commands, ConvergeArgs, Format, PlanArgs};
pub use error::CliError;
pub use output::OutputFormat;

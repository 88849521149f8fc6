//! Command-line argument parsing with clap.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use wglinks::provision::DEFAULT_KEY_DIR;

/// wglinks - `WireGuard` mesh links for declarative fleets.
#[derive(Parser, Debug, Clone)]
#[command(name = "wglinks")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Fleet definition (JSON).
    #[arg(long, env = "WGLINKS_FLEET", default_value = "fleet.json")]
    pub fleet: PathBuf,

    /// Key state file.
    #[arg(long, env = "WGLINKS_STATE", default_value = "wglinks-state.json")]
    pub state: PathBuf,

    /// Directory holding key files on each machine.
    #[arg(long, env = "WGLINKS_KEY_DIR", default_value = DEFAULT_KEY_DIR)]
    pub key_dir: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a full pass: provision keys over ssh, reconcile, build.
    Converge(ConvergeArgs),

    /// Build the peer matrix from stored key state without touching machines.
    Plan(PlanArgs),

    /// Compute the tunnel address for a base address and index.
    Address(AddressArgs),
}

/// Arguments for the converge command.
#[derive(Args, Debug, Clone)]
pub struct ConvergeArgs {
    /// Remote user for ssh.
    #[arg(long, env = "WGLINKS_SSH_USER", default_value = "root")]
    pub ssh_user: String,

    /// Extra ssh option, repeatable (e.g. `-o StrictHostKeyChecking=no`).
    #[arg(long = "ssh-option", value_name = "OPTION")]
    pub ssh_options: Vec<String>,

    /// Path of the `wg` tool; searched on PATH if unset.
    #[arg(long, env = "WGLINKS_WG_PATH")]
    pub wg_path: Option<PathBuf>,

    /// Also write the physical configuration as JSON to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the plan command.
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Also write the physical configuration as JSON to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the address command.
#[derive(Args, Debug, Clone)]
pub struct AddressArgs {
    /// Base address of the key pair.
    #[arg(long, default_value = "10.0.0.0")]
    pub base: Ipv4Addr,

    /// Ordinal index of the machine.
    #[arg(long)]
    pub index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags() {
        let cli = Cli::parse_from([
            "wglinks",
            "--fleet",
            "/tmp/fleet.json",
            "--state",
            "/tmp/state.json",
            "--format",
            "json",
            "plan",
        ]);
        assert_eq!(cli.fleet, PathBuf::from("/tmp/fleet.json"));
        assert_eq!(cli.state, PathBuf::from("/tmp/state.json"));
        assert_eq!(cli.format, Format::Json);
        assert!(matches!(cli.command, Commands::Plan(PlanArgs { output: None })));
    }

    #[test]
    fn parses_converge_options() {
        let cli = Cli::parse_from([
            "wglinks",
            "converge",
            "--ssh-user",
            "deploy",
            "--ssh-option=-oPort=2222",
            "--wg-path",
            "/usr/bin/wg",
            "-o",
            "out.json",
        ]);
        let Commands::Converge(args) = cli.command else {
            unreachable!("expected converge");
        };
        assert_eq!(args.ssh_user, "deploy");
        assert_eq!(args.ssh_options, vec!["-oPort=2222".to_string()]);
        assert_eq!(args.wg_path, Some(PathBuf::from("/usr/bin/wg")));
        assert_eq!(args.output, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn parses_address() {
        let cli = Cli::parse_from(["wglinks", "address", "--base", "192.168.0.10", "--index", "7"]);
        let Commands::Address(args) = cli.command else {
            unreachable!("expected address");
        };
        assert_eq!(args.base, Ipv4Addr::new(192, 168, 0, 10));
        assert_eq!(args.index, 7);
    }

    #[test]
    fn address_rejects_malformed_base() {
        let result = Cli::try_parse_from(["wglinks", "address", "--base", "10.0.0.256", "--index", "1"]);
        assert!(result.is_err());
    }
}

//! wglinks binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wglinks::ProvisionerConfig;
use wglinks_cli::cli::{Cli, Commands};
use wglinks_cli::commands::{AddressCommand, ConvergeCommand, FleetPaths, PlanCommand};
use wglinks_cli::output::OutputFormat;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), wglinks_cli::CliError> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();
    let paths = FleetPaths {
        fleet: cli.fleet,
        state: cli.state,
    };
    let config = ProvisionerConfig::default().with_key_dir(cli.key_dir);

    match cli.command {
        Commands::Converge(args) => {
            let cmd = ConvergeCommand::new(paths, config);
            cmd.execute(&mut stdout, &format, &args).await?;
        }
        Commands::Plan(args) => {
            let cmd = PlanCommand::new(paths, config);
            cmd.execute(&mut stdout, &format, &args)?;
        }
        Commands::Address(args) => {
            AddressCommand::new().execute(&mut stdout, &format, &args)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wglinks_cli::cli::Format;

    #[test]
    fn cli_parses_plan() {
        let cli = Cli::parse_from(["wglinks", "plan"]);
        assert!(matches!(cli.command, Commands::Plan(_)));
    }

    #[test]
    fn cli_respects_format_flag() {
        let cli = Cli::parse_from(["wglinks", "--format", "json", "address", "--index", "1"]);
        assert_eq!(cli.format, Format::Json);
    }

    #[tokio::test]
    async fn run_plan_without_fleet_file_fails() {
        let cli = Cli::parse_from(["wglinks", "--fleet", "/nonexistent/fleet.json", "plan"]);
        let result = run(cli).await;
        assert!(matches!(result, Err(wglinks_cli::CliError::FleetRead { .. })));
    }

    #[tokio::test]
    async fn run_address_succeeds() {
        let cli = Cli::parse_from(["wglinks", "address", "--index", "5"]);
        assert!(run(cli).await.is_ok());
    }
}

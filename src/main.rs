use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::GlobalArgs;

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    Markdown,
}

mod commands;
mod output;
mod tty;

use commands::{cancel, check, deploy, environments, history, reconcile, rollback, status};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "devrules")]
#[command(version = VERSION)]
#[command(about = "Guarded deployments across a promotion chain of environments")]
struct Cli {
    /// Path to .devrules.toml (default: discovered from the working directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a branch or revision to an environment
    Deploy(deploy::DeployArgs),
    /// Check whether an environment is ready for deployment
    #[command(name = "check-deployment", visible_alias = "check")]
    CheckDeployment(check::CheckArgs),
    /// Cancel a queued or triggered deployment
    Cancel(cancel::CancelArgs),
    /// Roll back an environment's failed deployment
    Rollback(rollback::RollbackArgs),
    /// Show what is deployed and in flight per environment
    Status(status::StatusArgs),
    /// Show deployment history for an environment
    History(history::HistoryArgs),
    /// Settle in-flight deployments nobody is watching any more
    Reconcile(reconcile::ReconcileArgs),
    /// List configured environments in promotion order
    #[command(visible_alias = "envs")]
    Environments(environments::EnvironmentsArgs),
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::CheckDeployment(args) if !args.json => ResponseMode::Markdown,
        _ => ResponseMode::Json,
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs { config: cli.config };

    if let ResponseMode::Markdown = response_mode(&cli.command) {
        return match commands::run_markdown(cli.command, &global) {
            Ok((content, exit_code)) => {
                print!("{}", content);
                std::process::ExitCode::from(exit_code_to_u8(exit_code))
            }
            Err(err) => {
                let exit_code = output::exit_code_for_error(err.code);
                let _ = output::print_result::<serde_json::Value>(Err(err));
                std::process::ExitCode::from(exit_code_to_u8(exit_code))
            }
        };
    }

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    let _ = output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn deploy_accepts_repeated_overrides() {
        let cli = Cli::try_parse_from([
            "devrules", "deploy", "--env", "prod", "--override", "a1", "--override", "b2",
        ])
        .unwrap();
        match cli.command {
            Commands::Deploy(args) => {
                assert_eq!(args.environment.as_deref(), Some("prod"));
                assert_eq!(args.overrides, vec!["a1", "b2"]);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn check_deployment_defaults_to_markdown() {
        let cli = Cli::try_parse_from(["devrules", "check-deployment", "staging"]).unwrap();
        assert!(matches!(response_mode(&cli.command), ResponseMode::Markdown));

        let cli =
            Cli::try_parse_from(["devrules", "--config", "x.toml", "check", "staging", "--json"])
                .unwrap();
        assert!(matches!(response_mode(&cli.command), ResponseMode::Json));
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn reconcile_is_a_json_command() {
        let cli = Cli::try_parse_from(["devrules", "reconcile"]).unwrap();
        assert!(matches!(cli.command, Commands::Reconcile(_)));
        assert!(matches!(response_mode(&cli.command), ResponseMode::Json));
    }

    #[test]
    fn exit_codes_clamp() {
        assert_eq!(exit_code_to_u8(-1), 0);
        assert_eq!(exit_code_to_u8(33), 33);
        assert_eq!(exit_code_to_u8(1000), 255);
    }
}

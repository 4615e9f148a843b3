use clap::Args;
use serde::Serialize;

use devrules::orchestrator::EnvironmentStatus;

use super::CmdResult;

#[derive(Args)]
pub struct StatusArgs {
    /// Show only this environment
    pub environment: Option<String>,

    /// Show only environments with a deployment in flight
    #[arg(long)]
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub command: &'static str,
    pub total: usize,
    pub in_flight: usize,
    pub environments: Vec<EnvironmentStatus>,
}

pub fn run(args: StatusArgs, global: &super::GlobalArgs) -> CmdResult<StatusOutput> {
    let orchestrator = global.context()?.orchestrator()?;

    if let Some(name) = &args.environment {
        orchestrator.registry().resolve(name)?;
    }

    let environments: Vec<EnvironmentStatus> = orchestrator
        .status()?
        .into_iter()
        .filter(|s| {
            args.environment
                .as_deref()
                .map_or(true, |name| s.environment == name)
        })
        .filter(|s| !args.active || s.active.is_some())
        .collect();

    let in_flight = environments.iter().filter(|s| s.active.is_some()).count();

    Ok((
        StatusOutput {
            command: "status",
            total: environments.len(),
            in_flight,
            environments,
        },
        0,
    ))
}

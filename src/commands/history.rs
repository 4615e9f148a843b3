use clap::Args;
use serde::Serialize;

use devrules::record::DeploymentRecord;

use super::CmdResult;

#[derive(Args)]
pub struct HistoryArgs {
    /// Environment name
    pub environment: String,

    /// Maximum number of records, newest first
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryOutput {
    pub command: &'static str,
    pub environment: String,
    pub records: Vec<DeploymentRecord>,
}

pub fn run(args: HistoryArgs, global: &super::GlobalArgs) -> CmdResult<HistoryOutput> {
    let orchestrator = global.context()?.orchestrator()?;
    let records = orchestrator.history(&args.environment, args.limit)?;

    Ok((
        HistoryOutput {
            command: "history",
            environment: args.environment,
            records,
        },
        0,
    ))
}

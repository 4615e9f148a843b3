use clap::Args;
use serde::Serialize;

use devrules::record::DeploymentRecord;

use super::{override_ids, CmdResult};

#[derive(Args)]
pub struct DeployArgs {
    /// Target environment (inferred from --branch when omitted)
    #[arg(short = 'e', long = "env")]
    pub environment: Option<String>,

    /// Source branch (defaults to the environment's default_branch)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Exact revision to deploy instead of the branch tip
    #[arg(short, long)]
    pub revision: Option<String>,

    /// Record ID whose conflict to force past (can be repeated)
    #[arg(long = "override", value_name = "RECORD_ID")]
    pub overrides: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeployOutput {
    pub command: &'static str,
    pub environment: String,
    pub revision: String,
    pub record: DeploymentRecord,
}

pub fn run(args: DeployArgs, global: &super::GlobalArgs) -> CmdResult<DeployOutput> {
    let ctx = global.context()?;
    let orchestrator = ctx.orchestrator()?;

    let request = orchestrator.plan_request(
        args.environment.as_deref(),
        args.branch.as_deref(),
        args.revision.as_deref(),
        &ctx.current_user(),
        override_ids(&args.overrides),
    )?;

    let record = orchestrator.deploy(request)?;

    Ok((
        DeployOutput {
            command: "deploy",
            environment: record.environment.clone(),
            revision: record.revision.clone(),
            record,
        },
        0,
    ))
}

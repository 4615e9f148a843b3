use clap::Args;
use serde::Serialize;

use devrules::record::DeploymentRecord;

use super::CmdResult;

#[derive(Args)]
pub struct RollbackArgs {
    /// Environment whose failed deployment to roll back
    pub environment: String,
}

#[derive(Debug, Serialize)]
pub struct RollbackOutput {
    pub command: &'static str,
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_revision: Option<String>,
    pub record: DeploymentRecord,
}

pub fn run(args: RollbackArgs, global: &super::GlobalArgs) -> CmdResult<RollbackOutput> {
    let ctx = global.context()?;
    let record = ctx
        .orchestrator()?
        .rollback(&args.environment, &ctx.current_user())?;

    Ok((
        RollbackOutput {
            command: "rollback",
            environment: record.environment.clone(),
            restored_revision: record.rollback_target.clone(),
            record,
        },
        0,
    ))
}

use clap::Args;
use serde::Serialize;

use devrules::record::DeploymentRecord;

use super::CmdResult;

#[derive(Args)]
pub struct CancelArgs {
    /// Deployment record ID
    pub record_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelOutput {
    pub command: &'static str,
    pub record: DeploymentRecord,
}

pub fn run(args: CancelArgs, global: &super::GlobalArgs) -> CmdResult<CancelOutput> {
    let ctx = global.context()?;
    let record = ctx.orchestrator()?.cancel(&args.record_id, &ctx.current_user())?;

    Ok((
        CancelOutput {
            command: "cancel",
            record,
        },
        0,
    ))
}

use clap::Args;
use serde::Serialize;

use devrules::record::DeploymentRecord;

use super::CmdResult;

#[derive(Args)]
pub struct ReconcileArgs {}

#[derive(Debug, Serialize)]
pub struct ReconcileOutput {
    pub command: &'static str,
    pub settled: Vec<DeploymentRecord>,
}

pub fn run(_args: ReconcileArgs, global: &super::GlobalArgs) -> CmdResult<ReconcileOutput> {
    let settled = global.context()?.orchestrator()?.reconcile()?;

    Ok((
        ReconcileOutput {
            command: "reconcile",
            settled,
        },
        0,
    ))
}

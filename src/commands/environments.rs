use clap::Args;
use serde::Serialize;

use devrules::environment::Environment;

use super::CmdResult;

#[derive(Args)]
pub struct EnvironmentsArgs {
    /// Print the environment a branch would deploy to
    #[arg(long)]
    pub branch: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnvironmentsOutput {
    pub command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    pub environments: Vec<Environment>,
}

/// Topology only; does not open the deployment log.
pub fn run(args: EnvironmentsArgs, global: &super::GlobalArgs) -> CmdResult<EnvironmentsOutput> {
    let registry = global.context()?.registry()?;

    let matched = args
        .branch
        .as_deref()
        .and_then(|b| registry.classify_branch(b))
        .map(|e| e.name.clone());

    Ok((
        EnvironmentsOutput {
            command: "environments",
            branch: args.branch,
            matched,
            environments: registry.ordered().to_vec(),
        },
        0,
    ))
}

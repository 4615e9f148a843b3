use std::collections::BTreeSet;
use std::path::PathBuf;

use devrules::context::DeployContext;

pub type CmdResult<T> = devrules::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    /// Explicit `.devrules.toml`; otherwise discovered from the working directory.
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn context(&self) -> devrules::Result<DeployContext> {
        DeployContext::load(self.config.as_deref())
    }
}

/// `--override` values, trimmed and de-duplicated.
pub fn override_ids(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

pub mod cancel;
pub mod check;
pub mod deploy;
pub mod environments;
pub mod history;
pub mod reconcile;
pub mod rollback;
pub mod status;

pub(crate) fn run_markdown(
    command: crate::Commands,
    global: &GlobalArgs,
) -> devrules::Result<(String, i32)> {
    match command {
        crate::Commands::CheckDeployment(args) if !args.json => check::run_markdown(args, global),
        _ => Err(devrules::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support markdown output",
            None,
            None,
        )),
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run_json($args))
    };
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (devrules::Result<serde_json::Value>, i32) {
    crate::tty::status("devrules is working...");

    match command {
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::CheckDeployment(args) => dispatch!(args, global, check),
        crate::Commands::Cancel(args) => dispatch!(args, global, cancel),
        crate::Commands::Rollback(args) => dispatch!(args, global, rollback),
        crate::Commands::Status(args) => dispatch!(args, global, status),
        crate::Commands::History(args) => dispatch!(args, global, history),
        crate::Commands::Reconcile(args) => dispatch!(args, global, reconcile),
        crate::Commands::Environments(args) => dispatch!(args, global, environments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_ids_drop_blanks_and_duplicates() {
        let ids = override_ids(&[
            "abc".to_string(),
            " abc ".to_string(),
            "".to_string(),
            "def".to_string(),
        ]);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["abc", "def"]);
    }
}

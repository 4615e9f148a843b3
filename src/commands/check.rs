use clap::Args;
use std::fmt::Write;

use devrules::orchestrator::ReadinessReport;
use devrules::policy::Decision;
use devrules::record::DeploymentRecord;
use devrules::revision::short;

use super::CmdResult;

#[derive(Args)]
pub struct CheckArgs {
    /// Environment to check
    pub environment: String,

    /// Source branch (defaults to the environment's default_branch)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Print the JSON envelope instead of the human-readable report
    #[arg(long)]
    pub json: bool,
}

/// Exit code is 0 when the environment is ready, 1 otherwise.
pub fn run(args: CheckArgs, global: &super::GlobalArgs) -> CmdResult<ReadinessReport> {
    let report = readiness(&args, global)?;
    let exit_code = if report.ready { 0 } else { 1 };
    Ok((report, exit_code))
}

pub fn run_markdown(args: CheckArgs, global: &super::GlobalArgs) -> CmdResult<String> {
    let report = readiness(&args, global)?;
    let exit_code = if report.ready { 0 } else { 1 };
    Ok((render(&report), exit_code))
}

fn readiness(args: &CheckArgs, global: &super::GlobalArgs) -> devrules::Result<ReadinessReport> {
    let ctx = global.context()?;
    ctx.orchestrator()?
        .check_readiness(&args.environment, args.branch.as_deref(), &ctx.current_user())
}

fn describe(record: &DeploymentRecord) -> String {
    let when = record
        .finished_at
        .or(record.started_at)
        .unwrap_or(record.queued_at)
        .format("%Y-%m-%d %H:%M UTC");
    format!(
        "`{}` by {} ({}, {}, record {})",
        short(&record.revision),
        record.triggered_by,
        record.status,
        when,
        record.id
    )
}

pub fn render(report: &ReadinessReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Deployment check: {}\n", report.environment);

    if let Some(branch) = &report.source_branch {
        let _ = writeln!(out, "- Branch: `{}`", branch);
    }
    if let Some(revision) = &report.revision {
        let _ = writeln!(out, "- Revision: `{}`", short(revision));
    }
    match &report.current {
        Some(record) => {
            let _ = writeln!(out, "- Deployed: {}", describe(record));
        }
        None => {
            let _ = writeln!(out, "- Deployed: nothing yet");
        }
    }
    if let Some(record) = &report.active {
        let _ = writeln!(out, "- In flight: {}", describe(record));
    }

    if let Some(Decision::Allowed { warnings }) = &report.policy {
        for warning in warnings {
            let _ = writeln!(out, "- Warning: {}", warning);
        }
    }

    if let Some(assessment) = &report.conflicts {
        if !assessment.migration_paths.is_empty() {
            let _ = writeln!(out, "\n## Migration changes\n");
            for path in &assessment.migration_paths {
                let _ = writeln!(out, "- `{}`", path);
            }
        }
    }

    if report.ready {
        let _ = writeln!(out, "\nReady to deploy.");
    } else {
        let _ = writeln!(out, "\n## Not ready\n");
        for reason in &report.reasons {
            let _ = writeln!(out, "- {}", reason);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(ready: bool, reasons: Vec<String>) -> ReadinessReport {
        ReadinessReport {
            environment: "prod".to_string(),
            source_branch: Some("main".to_string()),
            revision: Some("0123456789abcdef".to_string()),
            ready,
            reasons,
            policy: None,
            conflicts: None,
            current: None,
            active: None,
        }
    }

    #[test]
    fn ready_report() {
        let out = render(&report(true, Vec::new()));
        assert!(out.starts_with("# Deployment check: prod"));
        assert!(out.contains("- Revision: `01234567`"));
        assert!(out.contains("- Deployed: nothing yet"));
        assert!(out.contains("Ready to deploy."));
        assert!(!out.contains("Not ready"));
    }

    #[test]
    fn not_ready_report_lists_reasons() {
        let out = render(&report(
            false,
            vec!["Deploy to 'staging' first".to_string()],
        ));
        assert!(out.contains("## Not ready"));
        assert!(out.contains("- Deploy to 'staging' first"));
    }
}

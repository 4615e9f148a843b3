//! `.devrules.toml` loading.
//!
//! The file is parsed once at start-up; everything downstream (registry,
//! policy, executor client) is built from the typed structs below and never
//! reads the file again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults::*;
use crate::error::{Error, Result};
use crate::paths;

/// Root of `.devrules.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DevrulesConfig {
    #[serde(default)]
    pub deployment: DeploymentConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_true")]
    pub migration_detection_enabled: bool,

    /// Glob patterns for schema/migration paths.
    #[serde(default = "default_migration_paths")]
    pub migration_paths: Vec<String>,

    /// SQLite deployment log. Shared between operators when placed on a
    /// common filesystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,

    #[serde(default = "default_repo_path")]
    pub repo_path: String,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jenkins: Option<JenkinsConfig>,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            migration_detection_enabled: default_true(),
            migration_paths: default_migration_paths(),
            store_path: None,
            repo_path: default_repo_path(),
            poll: PollConfig::default(),
            jenkins: None,
            environments: BTreeMap::new(),
            notifications: NotificationsConfig::default(),
        }
    }
}

/// One `[deployment.environments.<name>]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvironmentConfig {
    pub rank: u32,

    /// Branch whose tip is the environment's proposed revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,

    #[serde(default)]
    pub protected: bool,

    #[serde(default)]
    pub allowed_source_patterns: Vec<String>,

    #[serde(default)]
    pub requires_prior: Vec<String>,

    #[serde(default)]
    pub auto_rollback: bool,

    /// CI job triggered for this environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_initial_interval_secs")]
    pub initial_interval_secs: u64,

    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: default_initial_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsConfig {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_revision_param")]
    pub revision_param: String,

    #[serde(default = "default_environment_param")]
    pub environment_param: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token; falls back to `SLACK_TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_slack_channel")]
    pub default_channel: String,

    /// Environment name -> channel.
    #[serde(default = "default_slack_channels")]
    pub channels: BTreeMap<String, String>,
}

/// Role-based deploy permissions. No roles configured means permissive mode.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub roles: BTreeMap<String, RoleConfig>,

    #[serde(default)]
    pub user_assignments: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoleConfig {
    /// Environment names, or `*` for all.
    #[serde(default)]
    pub deployable_environments: Vec<String>,

    #[serde(default)]
    pub can_override_conflicts: bool,
}

impl DevrulesConfig {
    /// Resolved location of the deployment log.
    pub fn store_path(&self) -> Result<PathBuf> {
        match self.deployment.store_path.as_deref() {
            Some(raw) if !raw.trim().is_empty() => paths::expand(raw),
            _ => paths::default_store(),
        }
    }

    fn validate(&self) -> Result<()> {
        let poll = &self.deployment.poll;
        if poll.initial_interval_secs == 0 && poll.max_interval_secs == 0 {
            return Err(Error::config_invalid_value(
                "deployment.poll",
                None,
                "poll intervals must not both be zero",
            ));
        }
        if poll.initial_interval_secs > poll.max_interval_secs {
            return Err(Error::config_invalid_value(
                "deployment.poll.initial_interval_secs",
                Some(poll.initial_interval_secs.to_string()),
                "initial poll interval exceeds max_interval_secs",
            ));
        }
        if poll.timeout_secs == 0 {
            return Err(Error::config_invalid_value(
                "deployment.poll.timeout_secs",
                Some("0".to_string()),
                "timeout must be greater than zero",
            ));
        }
        if let Some(jenkins) = &self.deployment.jenkins {
            if jenkins.url.trim().is_empty() {
                return Err(Error::config_missing_key(
                    "deployment.jenkins.url",
                    None,
                ));
            }
        }
        if let Some(role) = &self.permissions.default_role {
            if !self.permissions.roles.contains_key(role) {
                return Err(Error::config_invalid_value(
                    "permissions.default_role",
                    Some(role.clone()),
                    "default role is not defined under [permissions.roles]",
                ));
            }
        }
        Ok(())
    }
}

/// Parse and validate config content.
pub fn parse(content: &str, origin: &str) -> Result<DevrulesConfig> {
    let config: DevrulesConfig =
        toml::from_str(content).map_err(|e| Error::config_invalid_toml(origin, e))?;
    config.validate()?;
    Ok(config)
}

/// Load config from an explicit path, or `.devrules.toml` in the working directory.
pub fn load(explicit: Option<&Path>) -> Result<DevrulesConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| Error::internal_io(e.to_string(), Some("read cwd".to_string())))?;
            paths::project_config(&cwd)
        }
    };

    if !path.exists() {
        return Err(Error::config_missing_key(
            "deployment",
            Some(path.display().to_string()),
        )
        .with_hint(format!(
            "Create {} with a [deployment] section",
            CONFIG_FILE_NAME
        )));
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse(&content, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
[deployment]
migration_paths = ["db/migrations/**"]
store_path = "/tmp/devrules-test.db"

[deployment.poll]
initial_interval_secs = 2
max_interval_secs = 30

[deployment.jenkins]
url = "https://ci.example.com"
user = "deployer"

[deployment.environments.dev]
rank = 0
default_branch = "develop"

[deployment.environments.prod]
rank = 2
protected = true
allowed_source_patterns = ["^main$"]
requires_prior = ["dev"]
auto_rollback = true
job_name = "app-prod"

[permissions]
default_role = "developer"

[permissions.roles.developer]
deployable_environments = ["dev"]
"##;

    #[test]
    fn parses_full_sample() {
        let config = parse(SAMPLE, "sample").unwrap();
        let deployment = &config.deployment;

        assert!(deployment.migration_detection_enabled);
        assert_eq!(deployment.migration_paths, vec!["db/migrations/**"]);
        assert_eq!(deployment.poll.initial_interval_secs, 2);
        assert_eq!(deployment.poll.timeout_secs, default_timeout_secs());
        assert_eq!(deployment.environments.len(), 2);

        let prod = &deployment.environments["prod"];
        assert!(prod.protected);
        assert!(prod.auto_rollback);
        assert_eq!(prod.requires_prior, vec!["dev"]);
        assert_eq!(
            deployment.jenkins.as_ref().unwrap().revision_param,
            "REVISION"
        );
        assert_eq!(
            config.store_path().unwrap(),
            PathBuf::from("/tmp/devrules-test.db")
        );
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("", "empty").unwrap();
        assert_eq!(config.deployment.migration_paths, default_migration_paths());
        assert!(config.deployment.environments.is_empty());
        assert!(config.permissions.roles.is_empty());
    }

    #[test]
    fn rejects_invalid_toml() {
        let err = parse("[deployment\nrank = ", "broken").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_toml");
    }

    #[test]
    fn rejects_initial_interval_above_max() {
        let content = "[deployment.poll]\ninitial_interval_secs = 90\nmax_interval_secs = 10\n";
        let err = parse(content, "poll").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn rejects_unknown_default_role() {
        let content = "[permissions]\ndefault_role = \"ghost\"\n";
        let err = parse(content, "roles").unwrap_err();
        assert!(err.message.contains("default role"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
    }
}

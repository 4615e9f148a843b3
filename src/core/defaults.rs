//! Built-in defaults for `.devrules.toml`.
//!
//! Every value here can be overridden from the config file; the functions are
//! referenced from `#[serde(default = "...")]` attributes in `config`.

use std::collections::BTreeMap;

/// Config file looked up in the working directory when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = ".devrules.toml";

/// SQLite file holding the deployment log.
pub const STORE_FILE_NAME: &str = "deployments.db";

/// Service name used for keychain entries.
pub const KEYCHAIN_SERVICE: &str = "devrules";

// =============================================================================
// Default value functions
// =============================================================================

pub fn default_true() -> bool {
    true
}

pub fn default_repo_path() -> String {
    ".".to_string()
}

/// Paths whose changes count as schema/migration changes.
pub fn default_migration_paths() -> Vec<String> {
    vec![
        "migrations/**".to_string(),
        "**/migrations/**".to_string(),
        "*.sql".to_string(),
        "**/*.sql".to_string(),
    ]
}

pub fn default_initial_interval_secs() -> u64 {
    5
}

pub fn default_max_interval_secs() -> u64 {
    60
}

/// Overall executor timeout: 30 minutes.
pub fn default_timeout_secs() -> u64 {
    30 * 60
}

pub fn default_slack_channel() -> String {
    "#deployments".to_string()
}

pub fn default_slack_channels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("dev".to_string(), "#dev-deploys".to_string()),
        ("staging".to_string(), "#staging-deploys".to_string()),
        ("prod".to_string(), "#prod-deploys".to_string()),
    ])
}

/// Build parameter names understood by the Jenkins job.
pub fn default_revision_param() -> String {
    "REVISION".to_string()
}

pub fn default_environment_param() -> String {
    "ENVIRONMENT".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_globs_cover_directories_and_sql_files() {
        let globs = default_migration_paths();
        assert!(globs.iter().any(|g| g == "migrations/**"));
        assert!(globs.iter().any(|g| g == "**/*.sql"));
    }

    #[test]
    fn max_interval_is_below_timeout() {
        assert!(default_initial_interval_secs() <= default_max_interval_secs());
        assert!(default_max_interval_secs() < default_timeout_secs());
    }
}

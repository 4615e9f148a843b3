use glob_match::glob_match;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// A commit plus the paths it changes relative to a comparison base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: String,
    pub changed_paths: BTreeSet<String>,
    pub touches_migrations: bool,
}

impl Revision {
    pub fn new(id: impl Into<String>, changed_paths: BTreeSet<String>, matcher: &MigrationMatcher) -> Self {
        let touches_migrations = changed_paths.iter().any(|p| matcher.matches(p));
        Self {
            id: id.into(),
            changed_paths,
            touches_migrations,
        }
    }

    /// A revision with no comparison base (first deployment to an environment).
    pub fn unchanged(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            changed_paths: BTreeSet::new(),
            touches_migrations: false,
        }
    }
}

/// Abbreviated commit id for log lines.
pub fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Reject a revision or branch name that `git` would parse as an option.
pub fn check_ref(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() || value.starts_with('-') {
        return Err(Error::validation_invalid_argument(
            field,
            format!("'{}' is not a valid {}", value, field),
            Some(value.to_string()),
            None,
        ));
    }
    Ok(())
}

/// Classifies paths as schema/migration changes using glob patterns.
#[derive(Debug, Clone)]
pub struct MigrationMatcher {
    patterns: Vec<String>,
    enabled: bool,
}

impl MigrationMatcher {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            enabled: true,
        }
    }

    /// A matcher that never matches; migration detection is switched off.
    pub fn disabled() -> Self {
        Self {
            patterns: Vec::new(),
            enabled: false,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        self.enabled && self.patterns.iter().any(|pattern| glob_match(pattern, path))
    }

    /// Migration paths among `paths`.
    pub fn filter<'a, I>(&self, paths: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        paths
            .into_iter()
            .filter(|p| self.matches(p))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::default_migration_paths;

    fn paths(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_patterns_match_migration_dirs_and_sql() {
        let matcher = MigrationMatcher::new(default_migration_paths());

        assert!(matcher.matches("migrations/0001.sql"));
        assert!(matcher.matches("migrations/0002_add_users.py"));
        assert!(matcher.matches("app/db/migrations/0003.rb"));
        assert!(matcher.matches("schema.sql"));
        assert!(matcher.matches("./reports/daily.sql"));
        assert!(!matcher.matches("src/main.rs"));
        assert!(!matcher.matches("docs/migrations.md"));
    }

    #[test]
    fn revision_derives_touches_migrations() {
        let matcher = MigrationMatcher::new(default_migration_paths());

        let rev = Revision::new("abc", paths(&["src/lib.rs", "migrations/0001.sql"]), &matcher);
        assert!(rev.touches_migrations);

        let rev = Revision::new("def", paths(&["src/lib.rs"]), &matcher);
        assert!(!rev.touches_migrations);
    }

    #[test]
    fn disabled_matcher_never_matches() {
        let matcher = MigrationMatcher::disabled();
        assert!(!matcher.matches("migrations/0001.sql"));
        assert!(matcher.filter(&paths(&["migrations/0001.sql"])).is_empty());
    }

    #[test]
    fn filter_keeps_only_migration_paths() {
        let matcher = MigrationMatcher::new(vec!["db/migrations/**".to_string()]);
        let changed = paths(&["db/migrations/1.sql", "migrations/2.sql", "README.md"]);
        assert_eq!(matcher.filter(&changed), paths(&["db/migrations/1.sql"]));
    }
}

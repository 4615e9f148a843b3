//! Migration conflict detection.
//!
//! A candidate conflicts when it changes schema paths that in-flight work in
//! the same or an earlier environment is also changing, or when it touches
//! migrations without building on what the environment already runs.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::environment::{Environment, EnvironmentRegistry};
use crate::error::Result;
use crate::git::VersionControl;
use crate::log_status;
use crate::record::DeploymentRecord;
use crate::revision::{short, MigrationMatcher, Revision};
use crate::store::DeploymentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Deployed history carries migrations the candidate does not build on.
    Divergence,
    /// Another in-flight deployment changes overlapping migration paths.
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub environment: String,
    pub reason: String,
    pub conflicting_record_id: String,
    pub paths: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictAssessment {
    pub environment: String,
    pub revision: Revision,
    pub migration_paths: BTreeSet<String>,
    pub conflicts: Vec<Conflict>,
}

impl ConflictAssessment {
    pub fn ok(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Conflicts not covered by the given override record ids.
    pub fn unresolved<'a>(&'a self, overrides: &'a BTreeSet<String>) -> impl Iterator<Item = &'a Conflict> {
        self.conflicts
            .iter()
            .filter(move |c| !overrides.contains(&c.conflicting_record_id))
    }
}

pub struct ConflictDetector<'a> {
    registry: &'a EnvironmentRegistry,
    store: &'a DeploymentStore,
    vcs: &'a dyn VersionControl,
    matcher: &'a MigrationMatcher,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(
        registry: &'a EnvironmentRegistry,
        store: &'a DeploymentStore,
        vcs: &'a dyn VersionControl,
        matcher: &'a MigrationMatcher,
    ) -> Self {
        Self {
            registry,
            store,
            vcs,
            matcher,
        }
    }

    /// Changes between what `environment` runs now and `candidate`.
    pub fn revision_for(&self, environment: &Environment, candidate: &str) -> Result<Revision> {
        match self.store.current_for(&environment.name)? {
            Some(current) if current.revision != candidate => {
                let changed = self.vcs.diff(&current.revision, candidate)?;
                Ok(Revision::new(candidate, changed, self.matcher))
            }
            _ => Ok(Revision::unchanged(candidate)),
        }
    }

    pub fn evaluate(&self, environment: &Environment, candidate: &str) -> Result<ConflictAssessment> {
        let revision = self.revision_for(environment, candidate)?;
        let migration_paths = self.matcher.filter(&revision.changed_paths);

        let mut conflicts = Vec::new();
        if !migration_paths.is_empty() {
            if let Some(conflict) = self.divergence(environment, candidate, &migration_paths)? {
                conflicts.push(conflict);
            }
            conflicts.extend(self.peers(environment, candidate, &migration_paths)?);
        }

        let assessment = ConflictAssessment {
            environment: environment.name.clone(),
            revision,
            migration_paths,
            conflicts,
        };

        if assessment.ok() {
            log_status!(
                "conflict",
                "{} -> {}: no conflicts ({} migration path(s))",
                short(candidate),
                environment.name,
                assessment.migration_paths.len()
            );
        } else {
            for conflict in &assessment.conflicts {
                log_status!(
                    "conflict",
                    "{} -> {}: {} (record {})",
                    short(candidate),
                    environment.name,
                    conflict.reason,
                    conflict.conflicting_record_id
                );
            }
        }

        Ok(assessment)
    }

    fn divergence(
        &self,
        environment: &Environment,
        candidate: &str,
        migration_paths: &BTreeSet<String>,
    ) -> Result<Option<Conflict>> {
        let Some(current) = self.store.current_for(&environment.name)? else {
            return Ok(None);
        };
        if self.vcs.is_ancestor(&current.revision, candidate)? {
            return Ok(None);
        }

        Ok(Some(Conflict {
            kind: ConflictKind::Divergence,
            environment: environment.name.clone(),
            reason: format!(
                "'{}' runs {} which the candidate does not build on; both sides change migrations",
                environment.name,
                short(&current.revision)
            ),
            conflicting_record_id: current.id,
            paths: migration_paths.clone(),
        }))
    }

    fn peers(
        &self,
        environment: &Environment,
        candidate: &str,
        migration_paths: &BTreeSet<String>,
    ) -> Result<Vec<Conflict>> {
        let in_scope: BTreeSet<&str> = self
            .registry
            .up_to_rank(environment.rank)
            .map(|env| env.name.as_str())
            .collect();

        let mut conflicts = Vec::new();
        for record in self.store.in_flight()? {
            if !in_scope.contains(record.environment.as_str()) || record.revision == candidate {
                continue;
            }
            let overlap = self.overlap(&record, migration_paths);
            if overlap.is_empty() {
                continue;
            }
            conflicts.push(Conflict {
                kind: ConflictKind::Peer,
                environment: record.environment.clone(),
                reason: format!(
                    "in-flight deployment of {} to '{}' changes the same migrations",
                    short(&record.revision),
                    record.environment
                ),
                conflicting_record_id: record.id,
                paths: overlap,
            });
        }
        Ok(conflicts)
    }

    fn overlap(&self, record: &DeploymentRecord, migration_paths: &BTreeSet<String>) -> BTreeSet<String> {
        self.matcher
            .filter(&record.changed_paths)
            .intersection(migration_paths)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;
    use crate::defaults::default_migration_paths;
    use crate::error::Error;
    use crate::record::{DeploymentStatus, NewDeployment, TransitionFields};
    use std::collections::{BTreeMap, HashMap};

    /// History as explicit edges: child -> parent, plus fixed diffs.
    #[derive(Default)]
    struct FakeVcs {
        parents: HashMap<String, String>,
        diffs: HashMap<(String, String), BTreeSet<String>>,
    }

    impl FakeVcs {
        fn with_commit(mut self, child: &str, parent: &str) -> Self {
            self.parents.insert(child.to_string(), parent.to_string());
            self
        }

        fn with_diff(mut self, from: &str, to: &str, paths: &[&str]) -> Self {
            self.diffs.insert(
                (from.to_string(), to.to_string()),
                paths.iter().map(|p| p.to_string()).collect(),
            );
            self
        }
    }

    impl VersionControl for FakeVcs {
        fn diff(&self, from: &str, to: &str) -> Result<BTreeSet<String>> {
            Ok(self
                .diffs
                .get(&(from.to_string(), to.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
            let mut cursor = Some(descendant.to_string());
            while let Some(rev) = cursor {
                if rev == ancestor {
                    return Ok(true);
                }
                cursor = self.parents.get(&rev).cloned();
            }
            Ok(false)
        }

        fn tip_of(&self, branch: &str) -> Result<String> {
            Err(Error::git_command_failed(format!("no branch {}", branch)))
        }
    }

    fn registry() -> EnvironmentRegistry {
        let configs: BTreeMap<String, EnvironmentConfig> = [("dev", 0), ("staging", 1), ("prod", 2)]
            .into_iter()
            .map(|(name, rank)| {
                (
                    name.to_string(),
                    EnvironmentConfig {
                        rank,
                        ..Default::default()
                    },
                )
            })
            .collect();
        EnvironmentRegistry::from_config(&configs).unwrap()
    }

    fn record(store: &DeploymentStore, env: &str, rev: &str, paths: &[&str], status: &[DeploymentStatus]) -> String {
        let rec = store
            .append(NewDeployment {
                environment: env.to_string(),
                revision: rev.to_string(),
                changed_paths: paths.iter().map(|p| p.to_string()).collect(),
                triggered_by: "tester".to_string(),
                ..Default::default()
            })
            .unwrap();
        for s in status {
            store.transition(&rec.id, *s, TransitionFields::default()).unwrap();
        }
        rec.id
    }

    use DeploymentStatus::*;

    #[test]
    fn no_prior_deployment_means_no_conflict() {
        let reg = registry();
        let store = DeploymentStore::open_in_memory().unwrap();
        let vcs = FakeVcs::default();
        let matcher = MigrationMatcher::new(default_migration_paths());
        let detector = ConflictDetector::new(&reg, &store, &vcs, &matcher);

        let assessment = detector.evaluate(reg.resolve("staging").unwrap(), "r1").unwrap();
        assert!(assessment.ok());
        assert!(assessment.revision.changed_paths.is_empty());
    }

    #[test]
    fn peer_in_earlier_environment_conflicts_on_overlap() {
        let reg = registry();
        let store = DeploymentStore::open_in_memory().unwrap();
        record(&store, "staging", "base", &[], &[Triggered, Running, Succeeded]);
        let dev_id = record(&store, "dev", "other", &["migrations/0001.sql"], &[Triggered, Running]);

        let vcs = FakeVcs::default()
            .with_commit("cand", "base")
            .with_diff("base", "cand", &["migrations/0001.sql", "src/app.rs"]);
        let matcher = MigrationMatcher::new(default_migration_paths());
        let detector = ConflictDetector::new(&reg, &store, &vcs, &matcher);

        let assessment = detector.evaluate(reg.resolve("staging").unwrap(), "cand").unwrap();
        assert_eq!(assessment.conflicts.len(), 1);
        let conflict = &assessment.conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Peer);
        assert_eq!(conflict.conflicting_record_id, dev_id);
        assert!(conflict.paths.contains("migrations/0001.sql"));
    }

    #[test]
    fn later_environments_and_disjoint_paths_never_conflict() {
        let reg = registry();
        let store = DeploymentStore::open_in_memory().unwrap();
        record(&store, "staging", "base", &[], &[Triggered, Running, Succeeded]);
        record(&store, "prod", "p1", &["migrations/0001.sql"], &[Triggered]);
        record(&store, "dev", "d1", &["migrations/0002.sql"], &[]);

        let vcs = FakeVcs::default()
            .with_commit("cand", "base")
            .with_diff("base", "cand", &["migrations/0001.sql"]);
        let matcher = MigrationMatcher::new(default_migration_paths());
        let detector = ConflictDetector::new(&reg, &store, &vcs, &matcher);

        assert!(detector.evaluate(reg.resolve("staging").unwrap(), "cand").unwrap().ok());
    }

    #[test]
    fn divergent_history_with_migrations_conflicts_with_current() {
        let reg = registry();
        let store = DeploymentStore::open_in_memory().unwrap();
        let current = record(&store, "staging", "hotfix", &[], &[Triggered, Running, Succeeded]);

        let vcs = FakeVcs::default()
            .with_commit("hotfix", "base")
            .with_commit("cand", "base")
            .with_diff("hotfix", "cand", &["db/migrations/0007.sql"]);
        let matcher = MigrationMatcher::new(default_migration_paths());
        let detector = ConflictDetector::new(&reg, &store, &vcs, &matcher);

        let assessment = detector.evaluate(reg.resolve("staging").unwrap(), "cand").unwrap();
        assert_eq!(assessment.conflicts.len(), 1);
        assert_eq!(assessment.conflicts[0].kind, ConflictKind::Divergence);
        assert_eq!(assessment.conflicts[0].conflicting_record_id, current);

        let overrides: BTreeSet<String> = [current].into_iter().collect();
        assert_eq!(assessment.unresolved(&overrides).count(), 0);
    }

    #[test]
    fn disabled_detection_is_always_ok() {
        let reg = registry();
        let store = DeploymentStore::open_in_memory().unwrap();
        record(&store, "staging", "base", &[], &[Triggered, Running, Succeeded]);
        record(&store, "dev", "other", &["migrations/0001.sql"], &[Triggered]);

        let vcs = FakeVcs::default().with_diff("base", "cand", &["migrations/0001.sql"]);
        let matcher = MigrationMatcher::disabled();
        let detector = ConflictDetector::new(&reg, &store, &vcs, &matcher);

        let assessment = detector.evaluate(reg.resolve("staging").unwrap(), "cand").unwrap();
        assert!(assessment.ok());
        assert!(!assessment.revision.touches_migrations);
    }
}

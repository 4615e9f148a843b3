//! Environment registry: the static promotion topology.
//!
//! Built once from `[deployment.environments]` and validated eagerly, so a
//! misconfigured topology fails at start-up instead of mid-deployment.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::config::EnvironmentConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    pub rank: u32,
    pub protected: bool,
    #[serde(serialize_with = "serialize_patterns")]
    pub allowed_source_patterns: Vec<Regex>,
    pub requires_prior: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    pub auto_rollback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
}

fn serialize_patterns<S: serde::Serializer>(
    patterns: &[Regex],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(patterns.iter().map(Regex::as_str))
}

impl Environment {
    /// True when the branch matches at least one allowed source pattern.
    pub fn allows_branch(&self, branch: &str) -> bool {
        self.allowed_source_patterns
            .iter()
            .any(|pattern| pattern.is_match(branch))
    }

    fn from_config(name: &str, config: &EnvironmentConfig) -> Result<Self> {
        let mut patterns = Vec::with_capacity(config.allowed_source_patterns.len());
        for raw in &config.allowed_source_patterns {
            let pattern = Regex::new(raw).map_err(|e| {
                Error::config_invalid_value(
                    format!("deployment.environments.{}.allowed_source_patterns", name),
                    Some(raw.clone()),
                    format!("invalid regular expression: {}", e),
                )
            })?;
            patterns.push(pattern);
        }

        Ok(Self {
            name: name.to_string(),
            rank: config.rank,
            protected: config.protected,
            allowed_source_patterns: patterns,
            requires_prior: config.requires_prior.iter().cloned().collect(),
            default_branch: config
                .default_branch
                .clone()
                .filter(|b| !b.trim().is_empty()),
            auto_rollback: config.auto_rollback,
            job_name: config.job_name.clone().filter(|j| !j.trim().is_empty()),
        })
    }
}

/// Read-only environment topology.
#[derive(Debug, Clone)]
pub struct EnvironmentRegistry {
    // Sorted by (rank, name).
    environments: Vec<Environment>,
}

impl EnvironmentRegistry {
    pub fn from_config(configs: &BTreeMap<String, EnvironmentConfig>) -> Result<Self> {
        let mut environments = Vec::with_capacity(configs.len());
        for (name, config) in configs {
            if name.trim().is_empty() {
                return Err(Error::config_invalid_value(
                    "deployment.environments",
                    None,
                    "environment name must not be empty",
                ));
            }
            environments.push(Environment::from_config(name, config)?);
        }
        Self::new(environments)
    }

    pub fn new(mut environments: Vec<Environment>) -> Result<Self> {
        environments.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)));
        validate_topology(&environments)?;
        Ok(Self { environments })
    }

    pub fn resolve(&self, name: &str) -> Result<&Environment> {
        self.environments
            .iter()
            .find(|env| env.name == name)
            .ok_or_else(|| Error::environment_not_found(name))
    }

    /// Environments by rank ascending.
    pub fn ordered(&self) -> &[Environment] {
        &self.environments
    }

    /// Environments at or before `rank` in the promotion order.
    pub fn up_to_rank(&self, rank: u32) -> impl Iterator<Item = &Environment> {
        self.environments.iter().filter(move |env| env.rank <= rank)
    }

    /// First environment (by rank) whose source patterns accept the branch.
    pub fn classify_branch(&self, branch: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.allows_branch(branch))
    }
}

fn validate_topology(environments: &[Environment]) -> Result<()> {
    let by_name: HashMap<&str, &Environment> = environments
        .iter()
        .map(|env| (env.name.as_str(), env))
        .collect();

    for env in environments {
        for prior in &env.requires_prior {
            let prerequisite = by_name.get(prior.as_str()).ok_or_else(|| {
                Error::config_invalid_value(
                    format!("deployment.environments.{}.requires_prior", env.name),
                    Some(prior.clone()),
                    format!("'{}' requires unknown environment '{}'", env.name, prior),
                )
            })?;

            if prerequisite.rank >= env.rank {
                return Err(Error::config_invalid_value(
                    format!("deployment.environments.{}.requires_prior", env.name),
                    Some(prior.clone()),
                    format!(
                        "'{}' (rank {}) cannot require '{}' (rank {}): prerequisites must rank strictly lower",
                        env.name, env.rank, prior, prerequisite.rank
                    ),
                ));
            }
        }
    }

    check_acyclic(environments)
}

/// Kahn's algorithm over the `requires_prior` graph.
fn check_acyclic(environments: &[Environment]) -> Result<()> {
    let index: HashMap<&str, usize> = environments
        .iter()
        .enumerate()
        .map(|(idx, env)| (env.name.as_str(), idx))
        .collect();

    let mut indegree = vec![0usize; environments.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); environments.len()];

    for (idx, env) in environments.iter().enumerate() {
        for prior in &env.requires_prior {
            if let Some(&parent) = index.get(prior.as_str()) {
                indegree[idx] += 1;
                dependents[parent].push(idx);
            }
        }
    }

    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut visited = 0;
    while let Some(idx) = queue.pop_front() {
        visited += 1;
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if visited != environments.len() {
        let stuck: Vec<String> = environments
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, env)| env.name.clone())
            .collect();
        return Err(Error::config_invalid_value(
            "deployment.environments",
            Some(stuck.join(", ")),
            "requires_prior contains a cycle",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(rank: u32, requires: &[&str], patterns: &[&str]) -> EnvironmentConfig {
        EnvironmentConfig {
            rank,
            requires_prior: requires.iter().map(|s| s.to_string()).collect(),
            allowed_source_patterns: patterns.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn registry(entries: &[(&str, EnvironmentConfig)]) -> Result<EnvironmentRegistry> {
        let configs = entries
            .iter()
            .map(|(name, cfg)| (name.to_string(), cfg.clone()))
            .collect();
        EnvironmentRegistry::from_config(&configs)
    }

    #[test]
    fn orders_by_rank_then_name() {
        let reg = registry(&[
            ("prod", env(2, &["staging-eu", "staging-us"], &[])),
            ("staging-us", env(1, &["dev"], &[])),
            ("staging-eu", env(1, &["dev"], &[])),
            ("dev", env(0, &[], &[])),
        ])
        .unwrap();

        let names: Vec<&str> = reg.ordered().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["dev", "staging-eu", "staging-us", "prod"]);
    }

    #[test]
    fn resolve_unknown_environment_is_not_found() {
        let reg = registry(&[("dev", env(0, &[], &[]))]).unwrap();
        let err = reg.resolve("qa").unwrap_err();
        assert_eq!(err.code.as_str(), "environment.not_found");
    }

    #[test]
    fn rejects_unknown_prerequisite() {
        let err = registry(&[("prod", env(2, &["staging"], &[]))]).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
        assert!(err.details["problem"]
            .as_str()
            .unwrap()
            .contains("unknown environment 'staging'"));
    }

    #[test]
    fn rejects_same_rank_prerequisite() {
        let err = registry(&[
            ("a", env(1, &["b"], &[])),
            ("b", env(1, &["a"], &[])),
        ])
        .unwrap_err();
        assert!(err.details["problem"]
            .as_str()
            .unwrap()
            .contains("rank strictly lower"));
    }

    #[test]
    fn rejects_invalid_pattern_at_load() {
        let err = registry(&[("prod", env(0, &[], &["(unclosed"]))]).unwrap_err();
        assert!(err.message.contains("invalid regular expression"));
    }

    #[test]
    fn cycle_check_flags_stuck_environments() {
        let mut a = Environment::from_config("a", &env(0, &["b"], &[])).unwrap();
        let b = Environment::from_config("b", &env(0, &["a"], &[])).unwrap();
        a.rank = 0;
        let err = check_acyclic(&[a, b]).unwrap_err();
        assert!(err.details["problem"].as_str().unwrap().contains("cycle"));
    }

    #[test]
    fn classify_branch_picks_lowest_rank_match() {
        let reg = registry(&[
            ("dev", env(0, &[], &["^(?:feature|fix)/"])),
            ("staging", env(1, &[], &["^staging"])),
            ("prod", env(2, &[], &["^main$"])),
        ])
        .unwrap();

        assert_eq!(reg.classify_branch("feature/23-login").unwrap().name, "dev");
        assert_eq!(reg.classify_branch("staging-51").unwrap().name, "staging");
        assert_eq!(reg.classify_branch("main").unwrap().name, "prod");
        assert!(reg.classify_branch("random").is_none());
    }
}

//! Version-control collaborator.
//!
//! The engine only needs three questions answered about history; `GitRepository`
//! answers them by shelling out to `git` in the configured repository.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::revision::check_ref;
use crate::utils::command;

pub trait VersionControl: Send + Sync {
    /// Paths changed between two revisions.
    fn diff(&self, from: &str, to: &str) -> Result<BTreeSet<String>>;

    /// True when `ancestor` is `descendant` or one of its ancestors.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Commit at the tip of a branch.
    fn tip_of(&self, branch: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GitRepository {
    path: String,
}

impl GitRepository {
    pub fn open(path: &Path) -> Result<Self> {
        let path = path.to_string_lossy().to_string();
        if command::run_in_optional(&path, "git", &["rev-parse", "--git-dir"]).is_none() {
            return Err(Error::git_command_failed(format!(
                "'{}' is not a git repository",
                path
            ))
            .with_hint("Set deployment.repo_path in .devrules.toml"));
        }
        Ok(Self { path })
    }

    /// Name recorded as `triggered_by`: `git config user.name`, then `$USER`.
    pub fn current_user(&self) -> String {
        command::run_in_optional(&self.path, "git", &["config", "user.name"])
            .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| "Unknown User".to_string())
    }

    fn git(&self, args: &[&str], context: &str) -> Result<String> {
        command::run_in(&self.path, "git", args, context)
            .map_err(|e| Error::git_command_failed(error_message(&e)))
    }
}

fn error_message(err: &Error) -> String {
    err.details
        .get("error")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| err.message.clone())
}

impl VersionControl for GitRepository {
    fn diff(&self, from: &str, to: &str) -> Result<BTreeSet<String>> {
        check_ref("revision", from)?;
        check_ref("revision", to)?;
        if from == to {
            return Ok(BTreeSet::new());
        }
        let stdout = self.git(&["diff", "--name-only", from, to, "--"], "git diff")?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        check_ref("revision", ancestor)?;
        check_ref("revision", descendant)?;
        if ancestor == descendant {
            return Ok(true);
        }
        let (code, stderr) = command::exit_code_in(
            &self.path,
            "git",
            &["merge-base", "--is-ancestor", ancestor, descendant],
            "git merge-base",
        )
        .map_err(|e| Error::git_command_failed(error_message(&e)))?;

        match code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(Error::git_command_failed(format!(
                "git merge-base --is-ancestor {} {} failed: {}",
                ancestor, descendant, stderr
            ))),
        }
    }

    fn tip_of(&self, branch: &str) -> Result<String> {
        check_ref("branch", branch)?;
        let local = format!("{}^{{commit}}", branch);
        if let Some(sha) =
            command::run_in_optional(&self.path, "git", &["rev-parse", "--verify", "--quiet", &local])
        {
            return Ok(sha);
        }

        let remote = format!("origin/{}^{{commit}}", branch);
        self.git(&["rev-parse", "--verify", &remote], "git rev-parse")
            .map_err(|_| {
                Error::git_command_failed(format!("Branch '{}' not found", branch))
                    .with_hint(format!("Run 'git fetch' to update remote branch '{}'", branch))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("Failed to run git");
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit_file(dir: &Path, rel: &str, content: &str) -> String {
        let file = dir.join(rel);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, content).unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-m", &format!("Add {}", rel)]);
        git(dir, &["rev-parse", "HEAD"])
    }

    fn init_repo() -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path();
        git(path, &["init", "-b", "main"]);
        git(path, &["config", "user.email", "test@test.com"]);
        git(path, &["config", "user.name", "Test User"]);
        commit_file(path, "README.md", "# Test Repository");
        temp_dir
    }

    #[test]
    fn open_rejects_non_repository() {
        let dir = TempDir::new().unwrap();
        let err = GitRepository::open(dir.path()).unwrap_err();
        assert_eq!(err.code.as_str(), "git.command_failed");
    }

    #[test]
    fn diff_lists_changed_paths() {
        let dir = init_repo();
        let base = git(dir.path(), &["rev-parse", "HEAD"]);
        let head = commit_file(dir.path(), "migrations/0001_initial.sql", "create table t();");

        let repo = GitRepository::open(dir.path()).unwrap();
        let changed = repo.diff(&base, &head).unwrap();

        assert_eq!(changed.len(), 1);
        assert!(changed.contains("migrations/0001_initial.sql"));
        assert!(repo.diff(&head, &head).unwrap().is_empty());
    }

    #[test]
    fn is_ancestor_follows_history() {
        let dir = init_repo();
        let base = git(dir.path(), &["rev-parse", "HEAD"]);
        let head = commit_file(dir.path(), "app.py", "print('hello')");

        let repo = GitRepository::open(dir.path()).unwrap();
        assert!(repo.is_ancestor(&base, &head).unwrap());
        assert!(!repo.is_ancestor(&head, &base).unwrap());
        assert!(repo.is_ancestor(&head, &head).unwrap());
    }

    #[test]
    fn tip_of_resolves_branch_and_reports_missing() {
        let dir = init_repo();
        git(dir.path(), &["checkout", "-b", "feature"]);
        let feature_tip = commit_file(dir.path(), "feature.txt", "x");

        let repo = GitRepository::open(dir.path()).unwrap();
        assert_eq!(repo.tip_of("feature").unwrap(), feature_tip);
        assert!(repo.tip_of("does-not-exist").is_err());
    }

    #[test]
    fn option_like_revisions_never_reach_git() {
        let dir = init_repo();
        let head = git(dir.path(), &["rev-parse", "HEAD"]);
        let repo = GitRepository::open(dir.path()).unwrap();
        let written = dir.path().join("written.txt");
        let hostile = format!("--output={}", written.display());

        let err = repo.diff(&hostile, &head).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert!(repo.diff(&head, &hostile).is_err());
        assert!(repo.is_ancestor(&hostile, &head).is_err());
        assert!(repo.tip_of("--all").is_err());
        assert!(!written.exists());
    }

    #[test]
    fn current_user_reads_git_config() {
        let dir = init_repo();
        let repo = GitRepository::open(dir.path()).unwrap();
        assert_eq!(repo.current_user(), "Test User");
    }
}

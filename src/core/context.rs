//! Engine wiring: config file in, ready-to-use `Orchestrator` out.

use std::path::Path;

use crate::config::{self, DevrulesConfig};
use crate::environment::EnvironmentRegistry;
use crate::error::Result;
use crate::git::GitRepository;
use crate::jenkins::JenkinsClient;
use crate::log_status;
use crate::notify::{NotificationDispatcher, SlackChannel};
use crate::orchestrator::Orchestrator;
use crate::paths;
use crate::policy::Permissions;
use crate::poll::PollSettings;
use crate::revision::MigrationMatcher;
use crate::store::DeploymentStore;

pub struct DeployContext {
    pub config: DevrulesConfig,
    pub repo: GitRepository,
}

impl DeployContext {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = config::load(config_path)?;
        Self::from_config(config)
    }

    pub fn from_config(config: DevrulesConfig) -> Result<Self> {
        let repo_path = paths::expand(&config.deployment.repo_path)?;
        let repo = GitRepository::open(&repo_path)?;
        Ok(Self { config, repo })
    }

    /// Name recorded as `triggered_by` and checked against role assignments.
    pub fn current_user(&self) -> String {
        self.repo.current_user()
    }

    pub fn registry(&self) -> Result<EnvironmentRegistry> {
        EnvironmentRegistry::from_config(&self.config.deployment.environments)
    }

    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let deployment = &self.config.deployment;
        let registry = self.registry()?;

        let store_path = self.config.store_path()?;
        log_status!("context", "Deployment log: {}", store_path.display());
        let store = DeploymentStore::open(&store_path)?;

        let matcher = if deployment.migration_detection_enabled {
            MigrationMatcher::new(deployment.migration_paths.clone())
        } else {
            MigrationMatcher::disabled()
        };

        let mut orchestrator = Orchestrator::new(registry, store, Box::new(self.repo.clone()))
            .with_matcher(matcher)
            .with_permissions(Permissions::new(self.config.permissions.clone()))
            .with_notifier(self.notifier()?)
            .with_poll_settings(PollSettings::from_config(&deployment.poll));

        if let Some(jenkins) = &deployment.jenkins {
            orchestrator = orchestrator.with_executor(Box::new(JenkinsClient::from_config(jenkins)?));
        }

        Ok(orchestrator)
    }

    fn notifier(&self) -> Result<NotificationDispatcher> {
        let mut dispatcher = NotificationDispatcher::new();
        if let Some(slack) = &self.config.deployment.notifications.slack {
            if let Some(channel) = SlackChannel::from_config(slack)? {
                dispatcher = dispatcher.with_channel(Box::new(channel));
            }
        }
        Ok(dispatcher)
    }
}

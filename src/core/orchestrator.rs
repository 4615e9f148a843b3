//! Deployment orchestration.
//!
//! Policy and conflict checks are advisory pre-checks; the store's atomic
//! append is the gate. Once a record exists, every outcome ends as a stored
//! transition. Records orphaned by a dead process are settled by `reconcile`
//! once their polling window has passed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::conflict::{ConflictAssessment, ConflictDetector};
use crate::environment::{Environment, EnvironmentRegistry};
use crate::error::{Error, ErrorCode, ExecutorFailureDetails, Result};
use crate::executor::{CiExecutor, JobRef, JobReport, JobState};
use crate::git::VersionControl;
use crate::log_status;
use crate::notify::{DeployEvent, DeployEventKind, NotificationDispatcher};
use crate::policy::{Decision, OverrideAuthorizer, Permissions, PolicyEngine, RoleOverrideAuthorizer};
use crate::poll::PollSettings;
use crate::record::{DeploymentRecord, DeploymentStatus, NewDeployment, TransitionFields};
use crate::revision::{check_ref, short, MigrationMatcher};
use crate::store::DeploymentStore;

pub const EXECUTOR_TIMEOUT: &str = "executor timeout";

#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub environment: String,
    pub revision: String,
    pub source_branch: Option<String>,
    pub proposer: String,
    /// Record ids whose conflicts the proposer chooses to force past.
    pub overrides: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub ready: bool,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<ConflictAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<DeploymentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<DeploymentRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub environment: String,
    pub rank: u32,
    pub protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<DeploymentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<DeploymentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<DeploymentRecord>,
}

pub struct Orchestrator {
    registry: EnvironmentRegistry,
    store: DeploymentStore,
    vcs: Box<dyn VersionControl>,
    executor: Option<Box<dyn CiExecutor>>,
    matcher: MigrationMatcher,
    permissions: Permissions,
    override_authorizer: Box<dyn OverrideAuthorizer>,
    notifier: NotificationDispatcher,
    poll: PollSettings,
}

impl Orchestrator {
    pub fn new(
        registry: EnvironmentRegistry,
        store: DeploymentStore,
        vcs: Box<dyn VersionControl>,
    ) -> Self {
        Self {
            registry,
            store,
            vcs,
            executor: None,
            matcher: MigrationMatcher::new(crate::defaults::default_migration_paths()),
            permissions: Permissions::default(),
            override_authorizer: Box::new(RoleOverrideAuthorizer::new(Permissions::default())),
            notifier: NotificationDispatcher::new(),
            poll: PollSettings::default(),
        }
    }

    pub fn with_executor(mut self, executor: Box<dyn CiExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_matcher(mut self, matcher: MigrationMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Also installs the role-based override authorizer for these permissions.
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.override_authorizer = Box::new(RoleOverrideAuthorizer::new(permissions.clone()));
        self.permissions = permissions;
        self
    }

    pub fn with_override_authorizer(mut self, authorizer: Box<dyn OverrideAuthorizer>) -> Self {
        self.override_authorizer = authorizer;
        self
    }

    pub fn with_notifier(mut self, notifier: NotificationDispatcher) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn registry(&self) -> &EnvironmentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &DeploymentStore {
        &self.store
    }

    fn policy(&self) -> PolicyEngine<'_> {
        PolicyEngine::new(&self.store, self.vcs.as_ref(), &self.permissions)
    }

    fn detector(&self) -> ConflictDetector<'_> {
        ConflictDetector::new(&self.registry, &self.store, self.vcs.as_ref(), &self.matcher)
    }

    fn executor(&self) -> Result<&dyn CiExecutor> {
        self.executor.as_deref().ok_or_else(|| {
            Error::config_missing_key("deployment.jenkins.url", None)
                .with_hint("Configure [deployment.jenkins] in .devrules.toml to deploy")
        })
    }

    /// Fill in a deploy request from CLI-level inputs. The environment falls
    /// back to the first one whose source patterns accept the branch; the
    /// branch falls back to the environment's default branch; the revision to
    /// the branch tip.
    pub fn plan_request(
        &self,
        environment: Option<&str>,
        branch: Option<&str>,
        revision: Option<&str>,
        proposer: &str,
        overrides: BTreeSet<String>,
    ) -> Result<DeployRequest> {
        if let Some(branch) = branch {
            check_ref("branch", branch)?;
        }
        let environment = match environment {
            Some(name) => self.registry.resolve(name)?,
            None => {
                let branch = branch
                    .ok_or_else(|| Error::validation_missing_argument(vec!["environment".to_string()]))?;
                self.registry.classify_branch(branch).ok_or_else(|| {
                    Error::validation_invalid_argument(
                        "environment",
                        format!("no environment accepts branch '{}'", branch),
                        None,
                        Some(self.registry.ordered().iter().map(|e| e.name.clone()).collect()),
                    )
                })?
            }
        };

        let source_branch = branch
            .map(str::to_string)
            .or_else(|| environment.default_branch.clone());

        let revision = match (revision, source_branch.as_deref()) {
            (Some(rev), _) => rev.to_string(),
            (None, Some(branch)) => self.vcs.tip_of(branch)?,
            (None, None) => {
                return Err(Error::validation_missing_argument(vec![
                    "branch".to_string(),
                    "revision".to_string(),
                ]))
            }
        };
        check_ref("revision", &revision)?;

        Ok(DeployRequest {
            environment: environment.name.clone(),
            revision,
            source_branch,
            proposer: proposer.to_string(),
            overrides,
        })
    }

    /// Read-only: would a deploy of the environment's proposed revision go
    /// through right now?
    pub fn check_readiness(
        &self,
        environment: &str,
        branch: Option<&str>,
        proposer: &str,
    ) -> Result<ReadinessReport> {
        let env = self.registry.resolve(environment)?;
        let current = self.store.current_for(&env.name)?;
        let active = self.store.active_for(&env.name)?;

        let source_branch = branch
            .map(str::to_string)
            .or_else(|| env.default_branch.clone());

        let mut report = ReadinessReport {
            environment: env.name.clone(),
            source_branch: source_branch.clone(),
            revision: None,
            ready: false,
            reasons: Vec::new(),
            policy: None,
            conflicts: None,
            current,
            active,
        };

        let Some(branch) = source_branch else {
            report.reasons.push(format!(
                "no branch given and '{}' has no default_branch",
                env.name
            ));
            return Ok(report);
        };

        let revision = self.vcs.tip_of(&branch)?;
        let decision = self.policy().authorize(env, &revision, Some(&branch), proposer)?;
        if let Decision::Denied { reason, .. } = &decision {
            report.reasons.push(reason.clone());
        }

        if let Some(active) = &report.active {
            let mut reason = format!(
                "deployment {} of {} is already in flight ({})",
                active.id,
                short(&active.revision),
                active.status
            );
            if self.is_stale(active, Utc::now()) {
                reason.push_str("; it has outlived its polling window and will be settled by the next deploy");
            }
            report.reasons.push(reason);
        }

        let assessment = self.detector().evaluate(env, &revision)?;
        for conflict in &assessment.conflicts {
            report.reasons.push(format!(
                "{} (record {})",
                conflict.reason, conflict.conflicting_record_id
            ));
        }

        report.ready = report.reasons.is_empty();
        report.revision = Some(revision);
        report.policy = Some(decision);
        report.conflicts = Some(assessment);
        Ok(report)
    }

    pub fn deploy(&self, request: DeployRequest) -> Result<DeploymentRecord> {
        let env = self.registry.resolve(&request.environment)?;
        self.reconcile()?;

        match self.policy().authorize(
            env,
            &request.revision,
            request.source_branch.as_deref(),
            &request.proposer,
        )? {
            Decision::Allowed { .. } => {}
            Decision::Denied { rule, reason } => {
                return Err(Error::policy_violation(&env.name, rule.as_str(), reason));
            }
        }

        if let Some(active) = self.store.active_for(&env.name)? {
            return Err(Error::concurrent_deployment(&env.name, Some(active.id)));
        }

        let assessment = self.detector().evaluate(env, &request.revision)?;
        let accepted: BTreeSet<String> = assessment
            .conflicts
            .iter()
            .filter(|c| request.overrides.contains(&c.conflicting_record_id))
            .filter(|c| self.override_authorizer.may_override(&request.proposer, c))
            .map(|c| c.conflicting_record_id.clone())
            .collect();

        if let Some(conflict) = assessment.unresolved(&accepted).next() {
            let id = &conflict.conflicting_record_id;
            let err = Error::deployment_conflict(
                &env.name,
                &conflict.reason,
                id,
                conflict.paths.iter().cloned().collect(),
            );
            return Err(if request.overrides.contains(id) {
                err.with_hint(format!(
                    "'{}' is not authorized to override deployment conflicts",
                    request.proposer
                ))
            } else {
                err
            });
        }
        for id in &accepted {
            log_status!("deploy", "Forcing past conflict with {} at {}'s request", id, request.proposer);
        }

        let executor = self.executor()?;
        let record = self.store.append(NewDeployment {
            environment: env.name.clone(),
            revision: request.revision.clone(),
            changed_paths: assessment.revision.changed_paths,
            source_branch: request.source_branch.clone(),
            triggered_by: request.proposer.clone(),
            conflict_overrides: accepted,
        })?;

        self.run(env, executor, record)
    }

    fn run(
        &self,
        env: &Environment,
        executor: &dyn CiExecutor,
        record: DeploymentRecord,
    ) -> Result<DeploymentRecord> {
        let id = record.id.clone();
        let record = self.advance(&id, DeploymentStatus::Triggered, TransitionFields::default())?;
        log_status!("deploy", "Triggering {} for {}", short(&record.revision), env.name);

        let job = match executor.trigger(env, &record.revision) {
            Ok(job) => job,
            Err(e) => {
                let reason = format!("trigger failed: {}", e.message);
                let failed = self.fail_unsettled(&id, TransitionFields::reason(&reason))?;
                log_status!("deploy", "{} failed on {}: {}", short(&failed.revision), env.name, reason);
                self.notify(DeployEventKind::Failed, &failed);
                return Err(Error::executor_failure(failure_details(&failed, reason)));
            }
        };

        let outcome = self
            .watch(executor, &id, &job)
            .map_err(|e| self.abandon(&id, e))?;

        let logs_url = outcome.as_ref().and_then(|r| r.logs_url.clone());
        match outcome.map(|r| r.state) {
            Some(JobState::Succeeded) => {
                let done = self.advance(
                    &id,
                    DeploymentStatus::Succeeded,
                    TransitionFields {
                        logs_url,
                        ..Default::default()
                    },
                )?;
                log_status!("deploy", "{} is live on {}", short(&done.revision), env.name);
                self.notify(DeployEventKind::Succeeded, &done);
                Ok(done)
            }
            Some(_) => {
                let failed = self.fail_unsettled(
                    &id,
                    TransitionFields {
                        reason: Some("executor reported failure".to_string()),
                        logs_url,
                        ..Default::default()
                    },
                )?;
                self.after_failure(env, executor, failed)
            }
            None => {
                let failed = self.fail_unsettled(&id, TransitionFields::reason(EXECUTOR_TIMEOUT))?;
                self.after_failure(env, executor, failed)
            }
        }
    }

    /// Record the job ref, then poll the deploy job to an outcome.
    fn watch(&self, executor: &dyn CiExecutor, id: &str, job: &JobRef) -> Result<Option<JobReport>> {
        let record = self.store.annotate(
            id,
            TransitionFields {
                executor_job_ref: Some(job.to_string()),
                ..Default::default()
            },
        )?;
        self.notify(DeployEventKind::Started, &record);
        self.poll_job(executor, job, |report| self.observe_deploy(id, report))
    }

    /// Watching failed part way: mark the record failed so it does not keep
    /// the environment locked, and hand back the original error.
    fn abandon(&self, id: &str, err: Error) -> Error {
        if err.code == ErrorCode::DeployCancelled {
            return err;
        }
        let reason = format!("deployment abandoned: {}", err.message);
        match self.fail_unsettled(id, TransitionFields::reason(&reason)) {
            Ok(failed) => {
                log_status!("deploy", "{} on {}: {}", failed.id, failed.environment, reason);
                self.notify(DeployEventKind::Failed, &failed);
            }
            Err(e) => {
                log_status!("deploy", "Could not mark {} failed: {}", id, e.message);
            }
        }
        err
    }

    /// Move a `triggered` or `running` record to `failed`. A job that never
    /// reported progress passes through `running` on the way.
    fn fail_unsettled(&self, id: &str, fields: TransitionFields) -> Result<DeploymentRecord> {
        match self
            .store
            .transition(id, DeploymentStatus::Running, TransitionFields::default())
        {
            Ok(_) => {}
            Err(e) if e.code == ErrorCode::DeployInvalidTransition => {}
            Err(e) => return Err(e),
        }
        self.advance(id, DeploymentStatus::Failed, fields)
    }

    /// Called every poll iteration while the deploy job is outstanding.
    fn observe_deploy(&self, id: &str, report: Option<&JobReport>) -> Result<()> {
        let latest = self.store.get(id)?;
        if latest.status == DeploymentStatus::Cancelled {
            return Err(cancelled_error(&latest));
        }

        let started = report.is_some_and(|r| r.state != JobState::Pending);
        if started && latest.status == DeploymentStatus::Triggered {
            self.advance(
                id,
                DeploymentStatus::Running,
                TransitionFields {
                    logs_url: report.and_then(|r| r.logs_url.clone()),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    /// `failed` record: roll back when the environment allows it, then surface
    /// the failure either way.
    fn after_failure(
        &self,
        env: &Environment,
        executor: &dyn CiExecutor,
        failed: DeploymentRecord,
    ) -> Result<DeploymentRecord> {
        let reason = failed
            .reason
            .clone()
            .unwrap_or_else(|| "executor reported failure".to_string());
        log_status!("deploy", "{} failed on {}: {}", short(&failed.revision), env.name, reason);
        self.notify(DeployEventKind::Failed, &failed);

        if !env.auto_rollback {
            return Err(Error::executor_failure(failure_details(&failed, reason)));
        }

        let Some(target) = self.store.current_for(&env.name)? else {
            log_status!("deploy", "No earlier successful deployment on {}; leaving record failed", env.name);
            return Err(Error::executor_failure(failure_details(&failed, reason))
                .with_hint("No previous successful deployment to roll back to"));
        };

        let rolled_back = self.perform_rollback(env, executor, &failed, &target.revision)?;
        Err(Error::executor_failure(failure_details(&rolled_back, reason)))
    }

    fn perform_rollback(
        &self,
        env: &Environment,
        executor: &dyn CiExecutor,
        failed: &DeploymentRecord,
        target_revision: &str,
    ) -> Result<DeploymentRecord> {
        let id = failed.id.as_str();
        self.advance(
            id,
            DeploymentStatus::RollingBack,
            TransitionFields {
                rollback_target: Some(target_revision.to_string()),
                ..Default::default()
            },
        )?;
        log_status!("rollback", "Rolling {} back to {}", env.name, short(target_revision));

        let job = match executor.rollback(env, target_revision) {
            Ok(job) => job,
            Err(e) => {
                return self.rollback_failed(id, format!("rollback trigger failed: {}", e.message));
            }
        };
        self.store.annotate(
            id,
            TransitionFields {
                rollback_job_ref: Some(job.to_string()),
                ..Default::default()
            },
        )?;

        match self.poll_job(executor, &job, |_| Ok(()))?.map(|r| r.state) {
            Some(JobState::Succeeded) => {
                let done =
                    self.advance(id, DeploymentStatus::RolledBack, TransitionFields::default())?;
                log_status!("rollback", "{} restored to {}", env.name, short(target_revision));
                self.notify(DeployEventKind::RolledBack, &done);
                Ok(done)
            }
            Some(_) => self.rollback_failed(id, "rollback job failed".to_string()),
            None => self.rollback_failed(id, EXECUTOR_TIMEOUT.to_string()),
        }
    }

    fn rollback_failed(&self, id: &str, reason: String) -> Result<DeploymentRecord> {
        let record = self.advance(
            id,
            DeploymentStatus::RollbackFailed,
            TransitionFields::reason(&reason),
        )?;
        log_status!("rollback", "Rollback of {} failed: {}", id, reason);
        self.notify(DeployEventKind::RollbackFailed, &record);
        Err(Error::rollback_failed(failure_details(&record, reason)))
    }

    /// Poll until the job finishes (`Some`) or the timeout passes (`None`).
    /// Poll errors are logged and retried.
    fn poll_job<F>(
        &self,
        executor: &dyn CiExecutor,
        job: &JobRef,
        mut observe: F,
    ) -> Result<Option<JobReport>>
    where
        F: FnMut(Option<&JobReport>) -> Result<()>,
    {
        let deadline = self.poll.deadline();
        let mut backoff = self.poll.backoff();

        loop {
            let report = match executor.poll(job) {
                Ok(report) => Some(report),
                Err(e) => {
                    log_status!("poll", "Transient error polling {}: {}", job, e.message);
                    None
                }
            };

            observe(report.as_ref())?;
            if let Some(report) = report.filter(|r| r.state.is_finished()) {
                return Ok(Some(report));
            }
            if deadline.expired() {
                log_status!("poll", "Gave up on {} after {:?}", job, self.poll.timeout);
                return Ok(None);
            }

            let delay = backoff.next_delay();
            log_status!("poll", "{} not finished; next poll in {:?}", job, delay);
            deadline.sleep(delay);
        }
    }

    /// A transition that loses a race against an operator's cancel surfaces
    /// as a cancellation, not as a broken lifecycle.
    fn advance(
        &self,
        id: &str,
        next: DeploymentStatus,
        fields: TransitionFields,
    ) -> Result<DeploymentRecord> {
        match self.store.transition(id, next, fields) {
            Err(e) if e.code == ErrorCode::DeployInvalidTransition => {
                let latest = self.store.get(id)?;
                if latest.status == DeploymentStatus::Cancelled {
                    Err(cancelled_error(&latest))
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }

    /// Settle in-flight records that have outlived the polling window, such
    /// as one left behind by a process that died while watching its job.
    /// Each job is polled once; anything short of a finished job counts as
    /// an executor timeout.
    pub fn reconcile(&self) -> Result<Vec<DeploymentRecord>> {
        let now = Utc::now();
        let mut settled = Vec::new();

        for record in self.store.in_flight()? {
            if !self.is_stale(&record, now) {
                continue;
            }
            log_status!(
                "reconcile",
                "{} on {} has been {} since {}",
                record.id,
                record.environment,
                record.status,
                record.updated_at.to_rfc3339()
            );

            match self.settle(&record) {
                Ok(done) => settled.push(done),
                Err(e)
                    if matches!(
                        e.code,
                        ErrorCode::DeployInvalidTransition | ErrorCode::DeployCancelled
                    ) =>
                {
                    log_status!("reconcile", "{} moved on while settling: {}", record.id, e.message);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(settled)
    }

    /// No progress for longer than a full polling window plus one interval.
    fn is_stale(&self, record: &DeploymentRecord, now: DateTime<Utc>) -> bool {
        let window = self.poll.timeout.saturating_add(self.poll.max_interval);
        chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| record.updated_at.checked_add_signed(window))
            .is_some_and(|deadline| now > deadline)
    }

    fn settle(&self, record: &DeploymentRecord) -> Result<DeploymentRecord> {
        let id = record.id.as_str();
        match record.status {
            DeploymentStatus::Queued => {
                let cancelled = self.advance(
                    id,
                    DeploymentStatus::Cancelled,
                    TransitionFields::reason("abandoned before trigger"),
                )?;
                self.notify(DeployEventKind::Cancelled, &cancelled);
                Ok(cancelled)
            }
            DeploymentStatus::RollingBack => {
                let state = self
                    .poll_once(record.rollback_job_ref.as_deref())
                    .map(|r| r.state);
                if state == Some(JobState::Succeeded) {
                    let done =
                        self.advance(id, DeploymentStatus::RolledBack, TransitionFields::default())?;
                    self.notify(DeployEventKind::RolledBack, &done);
                    return Ok(done);
                }
                let reason = if state == Some(JobState::Failed) {
                    "rollback job failed"
                } else {
                    EXECUTOR_TIMEOUT
                };
                let failed =
                    self.advance(id, DeploymentStatus::RollbackFailed, TransitionFields::reason(reason))?;
                self.notify(DeployEventKind::RollbackFailed, &failed);
                Ok(failed)
            }
            _ => {
                let report = self.poll_once(record.executor_job_ref.as_deref());
                let logs_url = report.as_ref().and_then(|r| r.logs_url.clone());
                let settled = match report.map(|r| r.state) {
                    Some(JobState::Succeeded) => {
                        if record.status == DeploymentStatus::Triggered {
                            self.advance(id, DeploymentStatus::Running, TransitionFields::default())?;
                        }
                        let done = self.advance(
                            id,
                            DeploymentStatus::Succeeded,
                            TransitionFields {
                                logs_url,
                                ..Default::default()
                            },
                        )?;
                        self.notify(DeployEventKind::Succeeded, &done);
                        return Ok(done);
                    }
                    Some(JobState::Failed) => self.fail_unsettled(
                        id,
                        TransitionFields {
                            reason: Some("executor reported failure".to_string()),
                            logs_url,
                            ..Default::default()
                        },
                    )?,
                    _ => self.fail_unsettled(id, TransitionFields::reason(EXECUTOR_TIMEOUT))?,
                };
                self.notify(DeployEventKind::Failed, &settled);
                Ok(settled)
            }
        }
    }

    fn poll_once(&self, job_ref: Option<&str>) -> Option<JobReport> {
        let executor = self.executor.as_deref()?;
        let job = JobRef::new(job_ref?);
        match executor.poll(&job) {
            Ok(report) => Some(report),
            Err(e) => {
                log_status!("reconcile", "Could not poll {}: {}", job, e.message);
                None
            }
        }
    }

    pub fn cancel(&self, record_id: &str, operator: &str) -> Result<DeploymentRecord> {
        let record = self.store.get(record_id)?;
        if !matches!(
            record.status,
            DeploymentStatus::Queued | DeploymentStatus::Triggered
        ) {
            return Err(Error::validation_invalid_argument(
                "record_id",
                format!(
                    "deployment is {}; only queued or triggered deployments can be cancelled",
                    record.status
                ),
                Some(record.id.clone()),
                None,
            )
            .with_hint("Wait for a running deployment to finish, or roll it back once it fails"));
        }

        let cancelled = self.store.transition(
            record_id,
            DeploymentStatus::Cancelled,
            TransitionFields::reason(format!("cancelled by {}", operator)),
        )?;
        log_status!("cancel", "{} cancelled {} on {}", operator, cancelled.id, cancelled.environment);
        self.notify(DeployEventKind::Cancelled, &cancelled);
        Ok(cancelled)
    }

    /// Manual rollback of the environment's latest record, which must be `failed`.
    pub fn rollback(&self, environment: &str, operator: &str) -> Result<DeploymentRecord> {
        let env = self.registry.resolve(environment)?;
        self.reconcile()?;
        let latest = self
            .store
            .latest_for(&env.name)?
            .ok_or_else(|| Error::deployment_not_found(format!("latest deployment for {}", env.name)))?;

        if latest.status != DeploymentStatus::Failed {
            return Err(Error::validation_invalid_argument(
                "environment",
                format!(
                    "latest deployment {} is {}; only failed deployments can be rolled back",
                    latest.id, latest.status
                ),
                Some(env.name.clone()),
                None,
            ));
        }

        let target = self.store.current_for(&env.name)?.ok_or_else(|| {
            Error::validation_invalid_argument(
                "environment",
                format!("'{}' has no previous successful deployment to roll back to", env.name),
                Some(env.name.clone()),
                None,
            )
        })?;

        log_status!("rollback", "{} requested rollback of {}", operator, latest.id);
        let executor = self.executor()?;
        self.perform_rollback(env, executor, &latest, &target.revision)
    }

    /// Settles stale in-flight records first, so the report never shows a
    /// deploy nobody is watching as active.
    pub fn status(&self) -> Result<Vec<EnvironmentStatus>> {
        self.reconcile()?;
        self.registry
            .ordered()
            .iter()
            .map(|env| {
                Ok(EnvironmentStatus {
                    environment: env.name.clone(),
                    rank: env.rank,
                    protected: env.protected,
                    current: self.store.current_for(&env.name)?,
                    active: self.store.active_for(&env.name)?,
                    latest: self.store.latest_for(&env.name)?,
                })
            })
            .collect()
    }

    pub fn history(&self, environment: &str, limit: usize) -> Result<Vec<DeploymentRecord>> {
        let env = self.registry.resolve(environment)?;
        self.store.history(&env.name, limit)
    }

    fn notify(&self, kind: DeployEventKind, record: &DeploymentRecord) {
        if !self.notifier.is_empty() {
            self.notifier.dispatch(&DeployEvent::from_record(kind, record));
        }
    }
}

fn failure_details(record: &DeploymentRecord, reason: impl Into<String>) -> ExecutorFailureDetails {
    ExecutorFailureDetails {
        record_id: record.id.clone(),
        environment: record.environment.clone(),
        status: record.status.as_str().to_string(),
        reason: reason.into(),
        job_ref: record.executor_job_ref.clone(),
        logs_url: record.logs_url.clone(),
    }
}

fn cancelled_error(record: &DeploymentRecord) -> Error {
    let reason = record
        .reason
        .clone()
        .unwrap_or_else(|| "cancelled".to_string());
    Error::deployment_cancelled(failure_details(record, reason))
}

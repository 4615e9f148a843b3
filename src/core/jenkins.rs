//! Jenkins as a `CiExecutor`.
//!
//! Triggering goes through `buildWithParameters`, which answers with a queue
//! item rather than a build. The job ref handed back to the orchestrator is
//! the queue item URL; polling resolves it to a build once Jenkins schedules
//! one, then reads the build's `building` / `result` fields.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::JenkinsConfig;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::executor::{CiExecutor, JobRef, JobReport, JobState};
use crate::keychain;
use crate::log_status;

const KEYCHAIN_NAMESPACE: &str = "jenkins";

/// Where a queued item stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Waiting,
    Cancelled,
    Scheduled { build_url: String },
}

pub struct JenkinsClient {
    client: reqwest::blocking::Client,
    base_url: String,
    user: Option<String>,
    token: Option<String>,
    revision_param: String,
    environment_param: String,
    // queue item URL -> build URL
    builds: Mutex<HashMap<String, String>>,
}

impl JenkinsClient {
    pub fn from_config(config: &JenkinsConfig) -> Result<Self> {
        let user = credential(config.user.as_deref(), "JENKINS_USER", "user");
        let token = credential(config.token.as_deref(), "JENKINS_TOKEN", "token");
        if user.is_none() || token.is_none() {
            log_status!("jenkins", "No credentials found; calling {} anonymously", config.url);
        }

        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("devrules/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            user,
            token,
            revision_param: config.revision_param.clone(),
            environment_param: config.environment_param.clone(),
            builds: Mutex::new(HashMap::new()),
        })
    }

    fn job_url(&self, environment: &Environment) -> String {
        let job = environment.job_name.as_deref().unwrap_or(&environment.name);
        format!("{}/job/{}", self.base_url, job)
    }

    fn authorized(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match (&self.user, &self.token) {
            (Some(user), Some(token)) => request.basic_auth(user, Some(token)),
            _ => request,
        }
    }

    fn start(&self, environment: &Environment, revision: &str, rollback: bool) -> Result<JobRef> {
        let url = format!("{}/buildWithParameters", self.job_url(environment));
        let mut params = vec![
            (self.revision_param.as_str(), revision.to_string()),
            (self.environment_param.as_str(), environment.name.clone()),
        ];
        if rollback {
            params.push(("ROLLBACK", "true".to_string()));
        }

        let response = self
            .authorized(self.client.post(&url))
            .form(&params)
            .send()
            .map_err(|e| request_failed(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::remote_request_failed(
                format!("Jenkins rejected build request ({})", status),
                json!({ "url": url, "status": status.as_u16() }),
            ));
        }

        let queue_url = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| format!("{}/", v.trim_end_matches('/')))
            .ok_or_else(|| {
                Error::remote_request_failed(
                    "Jenkins did not return a queue item location",
                    json!({ "url": url }),
                )
            })?;

        log_status!(
            "jenkins",
            "{} {} for {} queued at {}",
            if rollback { "Rollback" } else { "Build" },
            revision,
            environment.name,
            queue_url
        );
        Ok(JobRef::new(queue_url))
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .map_err(|e| request_failed(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::remote_request_failed(
                format!("Jenkins returned {}", status),
                json!({ "url": url, "status": status.as_u16() }),
            ));
        }

        response
            .json()
            .map_err(|e| Error::internal_json(e.to_string(), Some(format!("parse {}", url))))
    }

    fn cached_build(&self, queue_url: &str) -> Result<Option<String>> {
        let builds = self
            .builds
            .lock()
            .map_err(|_| Error::internal_unexpected("Jenkins build cache poisoned"))?;
        Ok(builds.get(queue_url).cloned())
    }

    fn remember_build(&self, queue_url: &str, build_url: &str) -> Result<()> {
        let mut builds = self
            .builds
            .lock()
            .map_err(|_| Error::internal_unexpected("Jenkins build cache poisoned"))?;
        builds.insert(queue_url.to_string(), build_url.to_string());
        Ok(())
    }
}

impl CiExecutor for JenkinsClient {
    fn trigger(&self, environment: &Environment, revision: &str) -> Result<JobRef> {
        self.start(environment, revision, false)
    }

    fn poll(&self, job: &JobRef) -> Result<JobReport> {
        let queue_url = job.as_str();

        let build_url = match self.cached_build(queue_url)? {
            Some(url) => url,
            None => match parse_queue_item(&self.get_json(&format!("{}api/json", queue_url))?) {
                QueueState::Waiting => return Ok(JobReport::new(JobState::Pending)),
                QueueState::Cancelled => return Ok(JobReport::new(JobState::Failed)),
                QueueState::Scheduled { build_url } => {
                    self.remember_build(queue_url, &build_url)?;
                    build_url
                }
            },
        };

        let build = self.get_json(&format!("{}api/json", build_url))?;
        Ok(JobReport::new(parse_build_state(&build)).with_logs(format!("{}console", build_url)))
    }

    fn rollback(&self, environment: &Environment, target_revision: &str) -> Result<JobRef> {
        self.start(environment, target_revision, true)
    }
}

/// Config value, then environment variable, then keychain.
fn credential(configured: Option<&str>, env_var: &str, key: &str) -> Option<String> {
    configured
        .map(str::to_string)
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.trim().is_empty()))
        .or_else(|| keychain::lookup(KEYCHAIN_NAMESPACE, key))
}

fn request_failed(url: &str, err: reqwest::Error) -> Error {
    Error::remote_request_failed(
        format!("Jenkins request failed: {}", err),
        json!({ "url": url }),
    )
    .with_hint("Check deployment.jenkins.url and your JENKINS_USER / JENKINS_TOKEN")
}

/// `/queue/item/<n>/api/json`
pub fn parse_queue_item(item: &Value) -> QueueState {
    if item.get("cancelled").and_then(Value::as_bool).unwrap_or(false) {
        return QueueState::Cancelled;
    }
    match item
        .get("executable")
        .and_then(|e| e.get("url"))
        .and_then(Value::as_str)
    {
        Some(url) => QueueState::Scheduled {
            build_url: format!("{}/", url.trim_end_matches('/')),
        },
        None => QueueState::Waiting,
    }
}

/// `/job/<name>/<n>/api/json`
pub fn parse_build_state(build: &Value) -> JobState {
    if build.get("building").and_then(Value::as_bool).unwrap_or(false) {
        return JobState::Running;
    }
    match build.get("result").and_then(Value::as_str) {
        Some("SUCCESS") => JobState::Succeeded,
        Some(_) => JobState::Failed,
        // Finished building but no result recorded yet.
        None => JobState::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{default_environment_param, default_revision_param};
    use std::collections::BTreeSet;

    fn environment(job_name: Option<&str>) -> Environment {
        Environment {
            name: "staging".to_string(),
            rank: 1,
            protected: false,
            allowed_source_patterns: Vec::new(),
            requires_prior: BTreeSet::new(),
            default_branch: None,
            auto_rollback: false,
            job_name: job_name.map(str::to_string),
        }
    }

    fn client() -> JenkinsClient {
        JenkinsClient::from_config(&JenkinsConfig {
            url: "https://ci.example.com/".to_string(),
            user: Some("deployer".to_string()),
            token: Some("secret".to_string()),
            revision_param: default_revision_param(),
            environment_param: default_environment_param(),
        })
        .unwrap()
    }

    #[test]
    fn job_url_prefers_configured_job_name() {
        let client = client();
        assert_eq!(
            client.job_url(&environment(Some("app-staging"))),
            "https://ci.example.com/job/app-staging"
        );
        assert_eq!(
            client.job_url(&environment(None)),
            "https://ci.example.com/job/staging"
        );
    }

    #[test]
    fn configured_credentials_win() {
        assert_eq!(
            credential(Some("from-config"), "DEVRULES_TEST_UNSET_VAR", "user"),
            Some("from-config".to_string())
        );
    }

    #[test]
    fn env_credentials_fill_gaps() {
        std::env::set_var("DEVRULES_TEST_JENKINS_TOKEN", "from-env");
        assert_eq!(
            credential(Some("  "), "DEVRULES_TEST_JENKINS_TOKEN", "token"),
            Some("from-env".to_string())
        );
        std::env::remove_var("DEVRULES_TEST_JENKINS_TOKEN");
    }

    #[test]
    fn queue_item_states() {
        assert_eq!(parse_queue_item(&json!({ "why": "Waiting for next available executor" })), QueueState::Waiting);
        assert_eq!(parse_queue_item(&json!({ "cancelled": true })), QueueState::Cancelled);
        assert_eq!(
            parse_queue_item(&json!({ "executable": { "number": 42, "url": "https://ci/job/app/42" } })),
            QueueState::Scheduled {
                build_url: "https://ci/job/app/42/".to_string()
            }
        );
    }

    #[test]
    fn build_states() {
        assert_eq!(parse_build_state(&json!({ "building": true, "result": null })), JobState::Running);
        assert_eq!(parse_build_state(&json!({ "building": false, "result": "SUCCESS" })), JobState::Succeeded);
        assert_eq!(parse_build_state(&json!({ "building": false, "result": "FAILURE" })), JobState::Failed);
        assert_eq!(parse_build_state(&json!({ "building": false, "result": "ABORTED" })), JobState::Failed);
        assert_eq!(parse_build_state(&json!({ "building": false })), JobState::Running);
    }

    #[test]
    fn cached_build_is_reused() {
        let client = client();
        client
            .remember_build("https://ci/queue/item/7/", "https://ci/job/app/42/")
            .unwrap();
        assert_eq!(
            client.cached_build("https://ci/queue/item/7/").unwrap().as_deref(),
            Some("https://ci/job/app/42/")
        );
        assert!(client.cached_build("https://ci/queue/item/8/").unwrap().is_none());
    }
}

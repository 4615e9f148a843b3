//! Deployment notifications.
//!
//! Delivery is best effort: a channel failure is logged and never changes the
//! outcome of the deployment that produced the event.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::SlackConfig;
use crate::error::{Error, Result};
use crate::log_status;
use crate::record::DeploymentRecord;
use crate::revision::short;

const SLACK_POST_MESSAGE: &str = "https://slack.com/api/chat.postMessage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployEventKind {
    Started,
    Succeeded,
    Failed,
    RolledBack,
    RollbackFailed,
    Cancelled,
}

impl DeployEventKind {
    pub fn title(&self) -> &'static str {
        match self {
            DeployEventKind::Started => "Deployment started",
            DeployEventKind::Succeeded => "Deployment succeeded",
            DeployEventKind::Failed => "Deployment failed",
            DeployEventKind::RolledBack => "Deployment rolled back",
            DeployEventKind::RollbackFailed => "Rollback failed",
            DeployEventKind::Cancelled => "Deployment cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployEvent {
    pub kind: DeployEventKind,
    pub record_id: String,
    pub environment: String,
    pub revision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_url: Option<String>,
}

impl DeployEvent {
    pub fn from_record(kind: DeployEventKind, record: &DeploymentRecord) -> Self {
        Self {
            kind,
            record_id: record.id.clone(),
            environment: record.environment.clone(),
            revision: record.revision.clone(),
            branch: record.source_branch.clone(),
            author: record.triggered_by.clone(),
            reason: record.reason.clone(),
            logs_url: record.logs_url.clone(),
        }
    }
}

pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, event: &DeployEvent) -> Result<()>;
}

#[derive(Default)]
pub struct NotificationDispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Box<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send to every channel. Returns how many deliveries succeeded.
    pub fn dispatch(&self, event: &DeployEvent) -> usize {
        let mut delivered = 0;
        for channel in &self.channels {
            match channel.send(event) {
                Ok(()) => delivered += 1,
                Err(e) => log_status!(
                    "notify",
                    "Warning: {} notification for {} failed: {}",
                    channel.name(),
                    event.record_id,
                    e
                ),
            }
        }
        delivered
    }
}

/// Slack `chat.postMessage` with a per-environment channel map.
pub struct SlackChannel {
    client: reqwest::blocking::Client,
    token: String,
    default_channel: String,
    channels: BTreeMap<String, String>,
    endpoint: String,
}

impl SlackChannel {
    /// `None` when no token is configured or exported as `SLACK_TOKEN`.
    pub fn from_config(config: &SlackConfig) -> Result<Option<Self>> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("SLACK_TOKEN").ok().filter(|t| !t.trim().is_empty()));

        let Some(token) = token else {
            log_status!("notify", "Slack configured without a token; notifications disabled");
            return Ok(None);
        };

        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("devrules/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;

        Ok(Some(Self {
            client,
            token,
            default_channel: config.default_channel.clone(),
            channels: config.channels.clone(),
            endpoint: SLACK_POST_MESSAGE.to_string(),
        }))
    }

    pub fn resolve_channel(&self, environment: &str) -> &str {
        self.channels
            .get(environment)
            .map(String::as_str)
            .unwrap_or(&self.default_channel)
    }

    pub fn payload(&self, event: &DeployEvent) -> Value {
        let mut details = format!(
            "*Revision:* `{}`\n*Environment:* `{}`\n*Author:* `{}`",
            short(&event.revision),
            event.environment,
            event.author
        );
        if let Some(branch) = &event.branch {
            details.push_str(&format!("\n*Branch:* `{}`", branch));
        }
        if let Some(reason) = &event.reason {
            details.push_str(&format!("\n*Reason:* {}", reason));
        }
        if let Some(url) = &event.logs_url {
            details.push_str(&format!("\n<{}|Executor logs>", url));
        }

        json!({
            "channel": self.resolve_channel(&event.environment),
            "text": format!("{}: {}", event.kind.title(), event.environment),
            "blocks": [
                {
                    "type": "header",
                    "text": { "type": "plain_text", "text": event.kind.title() }
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": details }
                }
            ]
        })
    }
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    fn send(&self, event: &DeployEvent) -> Result<()> {
        let response: SlackResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&self.payload(event))
            .send()
            .map_err(|e| {
                Error::remote_request_failed(
                    format!("Slack request failed: {}", e),
                    json!({ "endpoint": self.endpoint }),
                )
            })?
            .json()
            .map_err(|e| Error::internal_json(e.to_string(), Some("parse Slack response".to_string())))?;

        if !response.ok {
            return Err(Error::remote_request_failed(
                format!(
                    "Slack API error: {}",
                    response.error.unwrap_or_else(|| "unknown".to_string())
                ),
                json!({ "endpoint": self.endpoint }),
            ));
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidToml,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    EnvironmentNotFound,
    DeploymentNotFound,

    DeployPolicyViolation,
    DeployConflict,
    DeployConcurrent,
    DeployExecutorFailure,
    DeployRollbackFailed,
    DeployCancelled,
    DeployInvalidTransition,

    GitCommandFailed,
    RemoteRequestFailed,

    InternalIoError,
    InternalJsonError,
    InternalStoreError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidToml => "config.invalid_toml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::EnvironmentNotFound => "environment.not_found",
            ErrorCode::DeploymentNotFound => "deployment.not_found",

            ErrorCode::DeployPolicyViolation => "deploy.policy_violation",
            ErrorCode::DeployConflict => "deploy.conflict",
            ErrorCode::DeployConcurrent => "deploy.concurrent_deployment",
            ErrorCode::DeployExecutorFailure => "deploy.executor_failure",
            ErrorCode::DeployRollbackFailed => "deploy.rollback_failed",
            ErrorCode::DeployCancelled => "deploy.cancelled",
            ErrorCode::DeployInvalidTransition => "deploy.invalid_transition",

            ErrorCode::GitCommandFailed => "git.command_failed",
            ErrorCode::RemoteRequestFailed => "remote.request_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalStoreError => "internal.store_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidTomlDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyViolationDetails {
    pub environment: String,
    pub rule: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConflictDetails {
    pub environment: String,
    pub reason: String,
    pub conflicting_record_id: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrentDeploymentDetails {
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_record_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorFailureDetails {
    pub record_id: String,
    pub environment: String,
    pub status: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidTransitionDetails {
    pub record_id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn environment_not_found(name: impl Into<String>) -> Self {
        Self::not_found(
            ErrorCode::EnvironmentNotFound,
            "Environment is not configured",
            name,
        )
        .with_hint("Run 'devrules environments' to see configured environments")
    }

    pub fn deployment_not_found(id: impl Into<String>) -> Self {
        Self::not_found(
            ErrorCode::DeploymentNotFound,
            "Deployment record not found",
            id,
        )
        .with_hint("Run 'devrules history <environment>' to see recent deployments")
    }

    fn not_found(code: ErrorCode, message: &str, id: impl Into<String>) -> Self {
        Self::new(code, message, to_details(NotFoundDetails { id: id.into() }))
    }

    pub fn policy_violation(
        environment: impl Into<String>,
        rule: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        let details = to_details(PolicyViolationDetails {
            environment: environment.into(),
            rule: rule.into(),
            reason: reason.clone(),
        });

        Self::new(ErrorCode::DeployPolicyViolation, reason, details)
    }

    pub fn deployment_conflict(
        environment: impl Into<String>,
        reason: impl Into<String>,
        conflicting_record_id: impl Into<String>,
        paths: Vec<String>,
    ) -> Self {
        let reason = reason.into();
        let conflicting_record_id = conflicting_record_id.into();
        let details = to_details(DeploymentConflictDetails {
            environment: environment.into(),
            reason: reason.clone(),
            conflicting_record_id: conflicting_record_id.clone(),
            paths,
        });

        let mut err = Self::new(ErrorCode::DeployConflict, reason, details)
            .with_hint("Wait for the conflicting deployment to settle, then retry")
            .with_hint(format!(
                "To deploy anyway, pass --override {}",
                conflicting_record_id
            ));
        err.retryable = Some(true);
        err
    }

    pub fn concurrent_deployment(
        environment: impl Into<String>,
        active_record_id: Option<String>,
    ) -> Self {
        let environment = environment.into();
        let details = to_details(ConcurrentDeploymentDetails {
            environment: environment.clone(),
            active_record_id,
        });

        let mut err = Self::new(
            ErrorCode::DeployConcurrent,
            format!(
                "Another deployment is already in flight for '{}'",
                environment
            ),
            details,
        )
        .with_hint(format!(
            "Run 'devrules status {}' and wait for the active deployment to finish",
            environment
        ));
        err.retryable = Some(true);
        err
    }

    pub fn executor_failure(details: ExecutorFailureDetails) -> Self {
        let message = format!("Deployment {} failed: {}", details.record_id, details.reason);
        let logs = details.logs_url.clone();
        let err = Self::new(ErrorCode::DeployExecutorFailure, message, to_details(details));
        match logs {
            Some(url) => err.with_hint(format!("Executor logs: {}", url)),
            None => err,
        }
    }

    pub fn rollback_failed(details: ExecutorFailureDetails) -> Self {
        let message = format!(
            "Rollback of deployment {} failed: {}",
            details.record_id, details.reason
        );
        Self::new(ErrorCode::DeployRollbackFailed, message, to_details(details))
            .with_hint("Rollback is never retried automatically; inspect the environment manually")
    }

    pub fn deployment_cancelled(details: ExecutorFailureDetails) -> Self {
        let message = format!(
            "Deployment {} was cancelled: {}",
            details.record_id, details.reason
        );
        Self::new(ErrorCode::DeployCancelled, message, to_details(details))
    }

    pub fn invalid_transition(
        record_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        let from = from.into();
        let to = to.into();
        let details = to_details(InvalidTransitionDetails {
            record_id: record_id.into(),
            from: from.clone(),
            to: to.clone(),
        });

        Self::new(
            ErrorCode::DeployInvalidTransition,
            format!("Invalid deployment transition: {} -> {}", from, to),
            details,
        )
        .with_hint("This indicates a bug or a corrupted deployment log; please report it")
    }

    pub fn git_command_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GitCommandFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn remote_request_failed(message: impl Into<String>, details: Value) -> Self {
        Self::new(ErrorCode::RemoteRequestFailed, message, details)
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let details = to_details(ConfigMissingKeyDetails {
            key: key.into(),
            path,
        });

        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            details,
        )
    }

    pub fn config_invalid_toml(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let details = to_details(ConfigInvalidTomlDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidToml,
            "Invalid TOML in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.clone(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value: {}", problem),
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_store(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(
            ErrorCode::InternalStoreError,
            "Deployment store error",
            details,
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

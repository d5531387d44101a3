//! Failure taxonomy for agent tasks.

/// Why a task did not produce a normal outcome.
///
/// Only `InvalidRequest` and `NotImplemented` are raised before a session is
/// started; every other variant is attached to a failed `TaskOutcome`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to launch agent `{binary}`: {message}")]
    LaunchFailure { binary: String, message: String },

    #[error("agent exited with code {}: {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "<signal>".to_string()))]
    ProcessExitFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("agent timed out after {elapsed_seconds:.1}s (limit {limit_seconds}s)")]
    Timeout {
        elapsed_seconds: f64,
        limit_seconds: u64,
    },

    #[error("malformed agent stream: {0}")]
    StreamDecodeFailure(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error("unexpected failure: {cause}")]
    Unknown { cause: String },
}

impl TaskError {
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn stream_decode<S: Into<String>>(message: S) -> Self {
        Self::StreamDecodeFailure(message.into())
    }

    pub fn unknown<S: Into<String>>(cause: S) -> Self {
        Self::Unknown {
            cause: cause.into(),
        }
    }

    /// Stable machine-readable code used in log records.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::InvalidRequest(_) => "INVALID_REQUEST",
            TaskError::LaunchFailure { .. } => "LAUNCH_FAILURE",
            TaskError::ProcessExitFailure { .. } => "PROCESS_EXIT_FAILURE",
            TaskError::Timeout { .. } => "TIMEOUT",
            TaskError::StreamDecodeFailure(_) => "STREAM_DECODE_FAILURE",
            TaskError::NotImplemented(_) => "NOT_IMPLEMENTED",
            TaskError::Unknown { .. } => "UNKNOWN",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            TaskError::InvalidRequest(_) => 400,
            TaskError::Timeout { .. } => 504,
            TaskError::NotImplemented(_) => 501,
            TaskError::LaunchFailure { .. }
            | TaskError::ProcessExitFailure { .. }
            | TaskError::StreamDecodeFailure(_)
            | TaskError::Unknown { .. } => 500,
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(value: std::io::Error) -> Self {
        Self::unknown(value.to_string())
    }
}

use std::fmt;

use thiserror::Error;

use crate::config::ConnectionTarget;
use crate::graph::GraphError;
use crate::usercode::UserCodeError;

/// Boxed error crossing the coordinator seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raised while building a client or environment, before any network activity.
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error("Host must not be empty")]
    InvalidHost,

    #[error("Port out of range: {0}")]
    PortOutOfRange(u32),

    #[error("Parallelism must be at least one, got {0}")]
    InvalidParallelism(i64),

    #[error("Invalid value '{value}' for configuration key '{key}'")]
    InvalidConfigValue { key: String, value: String },

    #[error("Artifact path is invalid '{path}': {reason}")]
    MalformedArtifactPath { path: String, reason: String },

    #[error("Problem with artifact {path}: {source}")]
    InvalidArtifact {
        path: String,
        #[source]
        source: BoxError,
    },
}

/// Raised once a submission is underway.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Could not build user code context: {0}")]
    UserCode(#[from] UserCodeError),

    #[error("Job {job_id} was rejected by the coordinator: {message}")]
    Rejected { job_id: String, message: String },

    #[error("Job {job_id} ended in state {state}: {message}")]
    JobFailed {
        job_id: String,
        state: String,
        message: String,
    },

    #[error("The program execution failed{}", failure_suffix(.message))]
    ExecutionFailed {
        message: String,
        #[source]
        source: BoxError,
    },
}

impl SubmissionError {
    /// Wrap an untyped failure, keeping its message and cause.
    pub fn execution_failed(source: BoxError) -> Self {
        Self::ExecutionFailed {
            message: source.to_string(),
            source,
        }
    }
}

fn failure_suffix(message: &str) -> String {
    if message.is_empty() {
        ".".to_string()
    } else {
        format!(": {}", message)
    }
}

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Construction,
    Connection,
    Submission,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Construction => write!(f, "construction"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Submission => write!(f, "submission"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    InvalidGraph(#[from] GraphError),

    #[error("Cannot establish connection to coordinator at {target}: {source}")]
    Connection {
        target: ConnectionTarget,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Construction(_) | ClientError::InvalidGraph(_) => ErrorKind::Construction,
            ClientError::Connection { .. } => ErrorKind::Connection,
            ClientError::Submission(_) => ErrorKind::Submission,
        }
    }

    /// Only connection failures are worth retrying: nothing reached the coordinator.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }
}

/// A failed connection shutdown. Reported through logs and the warning sink,
/// never returned in place of the submission outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub target: ConnectionTarget,
    pub message: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to shut down connection to {}: {}",
            self.target, self.message
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ConnectionTarget {
        ConnectionTarget::new("coordinator.local", 6123).unwrap()
    }

    #[test]
    fn execution_failed_appends_cause_message() {
        let err = SubmissionError::execution_failed("task manager lost".into());
        assert_eq!(
            err.to_string(),
            "The program execution failed: task manager lost"
        );
    }

    #[test]
    fn execution_failed_without_message_ends_with_period() {
        let err = SubmissionError::execution_failed("".into());
        assert_eq!(err.to_string(), "The program execution failed.");
    }

    #[test]
    fn connection_error_names_target_and_cause() {
        let err = ClientError::Connection {
            target: target(),
            source: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot establish connection to coordinator at coordinator.local:6123: connection refused"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn only_connection_errors_are_recoverable() {
        let connection = ClientError::Connection {
            target: target(),
            source: "refused".into(),
        };
        assert_eq!(connection.kind(), ErrorKind::Connection);
        assert!(connection.is_recoverable());

        let construction = ClientError::from(ConstructionError::PortOutOfRange(0));
        assert_eq!(construction.kind(), ErrorKind::Construction);
        assert!(!construction.is_recoverable());

        let graph = ClientError::from(GraphError::Empty);
        assert_eq!(graph.kind(), ErrorKind::Construction);

        let submission = ClientError::from(SubmissionError::execution_failed("boom".into()));
        assert_eq!(submission.kind(), ErrorKind::Submission);
        assert!(!submission.is_recoverable());
    }

    #[test]
    fn cleanup_warning_display() {
        let warning = CleanupWarning {
            target: target(),
            message: "session already closed".to_string(),
        };
        assert_eq!(
            warning.to_string(),
            "Failed to shut down connection to coordinator.local:6123: session already closed"
        );
    }
}

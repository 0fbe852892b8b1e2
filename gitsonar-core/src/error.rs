//! Error types for gitsonar.

use std::time::Duration;
use std::{error::Error, fmt, io};

/// Error type shared by the evaluation pipeline.
#[derive(Debug)]
pub enum GitSonarError {
    /// Transport failure or a transient server answer (429, 5xx).
    Network(String),
    /// Credentials were rejected (401). Aborts the whole run.
    Auth(String),
    /// Any other unsuccessful HTTP answer.
    Http {
        /// Service that answered.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The analysis server never reported a finished analysis in time.
    AnalysisTimeout {
        /// Project key that was being polled.
        project: String,
        /// Total time spent waiting.
        waited: Duration,
    },
    /// A response did not have the expected shape.
    MalformedResponse(String),
    /// No project board matches the repository.
    BoardNotFound(String),
    /// An external command failed to start or exited unsuccessfully.
    Process(String),
    /// Invalid or missing configuration.
    Config(String),
    /// An underlying I/O error.
    Io(io::Error),
    /// A CSV encoding error.
    Csv(csv::Error),
}

impl GitSonarError {
    /// Whether the error must stop the whole batch rather than a single field.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Config(_))
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl fmt::Display for GitSonarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(message) => write!(f, "network error: {message}"),
            Self::Auth(message) => write!(f, "authentication failed: {message}"),
            Self::Http {
                service,
                status,
                body,
            } => write!(f, "{service} api error ({status}): {body}"),
            Self::AnalysisTimeout { project, waited } => write!(
                f,
                "analysis for {project} never completed (waited {}s)",
                waited.as_secs()
            ),
            Self::MalformedResponse(message) => write!(f, "malformed response: {message}"),
            Self::BoardNotFound(title) => write!(f, "project board not found: {title}"),
            Self::Process(message) => write!(f, "process error: {message}"),
            Self::Config(message) => write!(f, "configuration error: {message}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Csv(err) => write!(f, "csv error: {err}"),
        }
    }
}

impl Error for GitSonarError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for GitSonarError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for GitSonarError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

/// Convenience result type for gitsonar.
pub type Result<T> = std::result::Result<T, GitSonarError>;

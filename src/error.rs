//! Error taxonomy and retry classification.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PanelError>;

/// The error kinds a panel client can surface.
///
/// Retry eligibility is determined solely from kind (see [`PanelError::is_retryable`]):
/// `Connection`, `Timeout`, and `RetriableServer` are retried; everything else is
/// surfaced immediately.
#[derive(Debug, Error, Clone)]
pub enum PanelError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("retriable server error ({status}): {message}")]
    RetriableServer { status: u16, message: String },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("API error ({status:?}): {message}")]
    ApiError { status: Option<u16>, message: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("simulation configuration error: {0}")]
    SimulationConfig(String),
}

impl PanelError {
    /// Whether a retry driver should retry an operation that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PanelError::Connection(_) | PanelError::Timeout(_) | PanelError::RetriableServer { .. }
        )
    }

    /// Map an HTTP status code to its error kind.
    ///
    /// 401/403 always become [`PanelError::Auth`] — classification never falls back to
    /// substring matching on an error's `Display` text, only on a structured status field.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => PanelError::Auth(message),
            500 => PanelError::Server { status, message },
            502 | 503 | 504 => PanelError::RetriableServer { status, message },
            _ => PanelError::ApiError { status: Some(status), message },
        }
    }
}

impl From<reqwest::Error> for PanelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PanelError::Timeout(err.to_string())
        } else if err.is_connect() {
            PanelError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            PanelError::from_status(status.as_u16(), err.to_string())
        } else {
            PanelError::ApiError { status: None, message: err.to_string() }
        }
    }
}

impl From<serde_json::Error> for PanelError {
    fn from(err: serde_json::Error) -> Self {
        PanelError::Validation(err.to_string())
    }
}

impl From<serde_yaml::Error> for PanelError {
    fn from(err: serde_yaml::Error) -> Self {
        PanelError::SimulationConfig(err.to_string())
    }
}

impl From<tonic::transport::Error> for PanelError {
    fn from(err: tonic::transport::Error) -> Self {
        PanelError::Connection(err.to_string())
    }
}

impl From<tonic::Status> for PanelError {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::Unauthenticated | Code::PermissionDenied => PanelError::Auth(status.message().to_string()),
            Code::DeadlineExceeded => PanelError::Timeout(status.message().to_string()),
            Code::Unavailable => PanelError::Connection(status.message().to_string()),
            _ => PanelError::ApiError { status: None, message: status.message().to_string() },
        }
    }
}

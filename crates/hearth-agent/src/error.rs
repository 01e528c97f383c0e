use hearth_process::{Operation, ServerStatus};
use uuid::Uuid;

use crate::tool_runner::ToolError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced to the management backend.
///
/// Anything not listed here (log/audit persistence, graceful-stop hiccups)
/// is absorbed internally and only shows up in the sink.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot {operation} while server is {status}")]
    Precondition {
        operation: Operation,
        status: ServerStatus,
    },

    #[error("tool operation failed with exit code {exit_code} after {attempts} attempt(s)")]
    ToolOperationFailed { exit_code: i32, attempts: u32 },

    #[error("server process failed to start: {0}")]
    ProcessStart(String),

    #[error("invalid stored configuration: {0}")]
    Configuration(String),

    #[error("unknown controller identifier: {0}")]
    UnknownController(String),

    #[error("server instance not found: {0}")]
    ServerNotFound(Uuid),

    #[error("server instance is deactivated: {0}")]
    ServerInactive(Uuid),

    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl Error {
    /// Stable machine-readable code for the calling layer.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Precondition { .. } => "precondition_failed",
            Error::ToolOperationFailed { .. } => "tool_failed",
            Error::ProcessStart(_) => "start_failed",
            Error::Configuration(_) => "invalid_configuration",
            Error::UnknownController(_) => "unknown_controller",
            Error::ServerNotFound(_) => "not_found",
            Error::ServerInactive(_) => "inactive",
            Error::Database(_) => "database",
            Error::Internal(_) => "internal",
        }
    }

    /// True when the caller asked for something that cannot be done right now
    /// (4xx), false for failures on our side (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Precondition { .. }
                | Error::UnknownController(_)
                | Error::ServerNotFound(_)
                | Error::ServerInactive(_)
        )
    }
}

/// Marker for stored values that cannot be converted to the requested type.
#[derive(Debug, thiserror::Error)]
#[error("{realm}/{path}: cannot parse {value:?}: {reason}")]
pub struct ConfigurationError {
    pub realm: String,
    pub path: String,
    pub value: String,
    pub reason: String,
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<ToolError> for Error {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::OperationFailed {
                exit_code,
                attempts,
            } => Error::ToolOperationFailed {
                exit_code,
                attempts,
            },
            other => Error::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<anyhow::Error> for Error {
    /// Game controllers report through `anyhow`; recover the typed failures
    /// from the chain so callers still see the right category.
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<ToolError>() {
            Ok(tool) => return tool.into(),
            Err(e) => e,
        };
        let err = match err.downcast::<ConfigurationError>() {
            Ok(cfg) => return cfg.into(),
            Err(e) => e,
        };
        let err = match err.downcast::<Error>() {
            Ok(inner) => return inner,
            Err(e) => e,
        };
        match err.downcast::<sea_orm::DbErr>() {
            Ok(db) => Error::Database(db),
            Err(e) => Error::Internal(e),
        }
    }
}

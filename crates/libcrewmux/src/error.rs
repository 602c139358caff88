use thiserror::Error;

use crewmux_protocol::ErrorCode;

#[derive(Error, Debug)]
pub enum CrewmuxError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exited: {0}")]
    SessionExited(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task conflict: {0}")]
    TaskConflict(String),

    #[error("project conflict: {0}")]
    ProjectConflict(String),

    #[error("readiness probe timed out for session {0}")]
    ProbeTimeout(String),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrewmuxError {
    /// Convert to a protocol error code plus a sanitized message.
    pub fn to_error_code(&self) -> (ErrorCode, String) {
        match self {
            CrewmuxError::SessionNotFound(_) | CrewmuxError::SessionExited(_) => {
                (ErrorCode::SessionNotFound, self.to_string())
            }
            CrewmuxError::TaskNotFound(_) => (ErrorCode::TaskNotFound, self.to_string()),
            CrewmuxError::TaskConflict(_) | CrewmuxError::ProjectConflict(_) => {
                (ErrorCode::Conflict, self.to_string())
            }
            CrewmuxError::ProbeTimeout(_) => (ErrorCode::Timeout, self.to_string()),
            CrewmuxError::Pty(_) | CrewmuxError::Store(_) => {
                (ErrorCode::ServerError, self.to_string())
            }
            CrewmuxError::Io(_) => (ErrorCode::ServerError, "internal I/O error".to_string()),
            CrewmuxError::Json(_) => {
                (ErrorCode::ServerError, "internal serialization error".to_string())
            }
        }
    }
}

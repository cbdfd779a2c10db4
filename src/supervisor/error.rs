//! Supervisor 에러 타입. 호출자가 재시도 여부와 사용자 메시지를 구분할 수 있도록
//! 에러 종류를 나눕니다.

use std::process::ExitStatus;
use std::time::Duration;

/// Errors reported by the process supervisor and the console correlator.
#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Server is not ready yet")]
    NotReady,

    #[error("Server is already stopping")]
    StopInProgress,

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Console I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?} waiting for console response")]
    Timeout(Duration),

    #[error("Server did not exit within {0:?} and was killed")]
    ForcedKill(Duration),

    #[error("Server exited with {0}")]
    ExitStatus(ExitStatus),

    #[error("Unexpected console response: {0}")]
    UnexpectedResponse(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl ManagerError {
    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::NotRunning => "NOT_RUNNING",
            Self::NotReady => "NOT_READY",
            Self::StopInProgress => "STOP_IN_PROGRESS",
            Self::Spawn { .. } => "SPAWN_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::ForcedKill(_) => "FORCED_KILL",
            Self::ExitStatus(_) => "EXIT_STATUS",
            Self::UnexpectedResponse(_) => "UNEXPECTED_RESPONSE",
            Self::TaskFailed(_) => "TASK_FAILED",
        }
    }

    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NotReady | Self::StopInProgress)
    }

    /// The server is offline (or on its way there), as opposed to a failed query.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::NotRunning | Self::NotReady)
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ManagerError::AlreadyRunning.error_code(), "ALREADY_RUNNING");
        assert_eq!(ManagerError::Timeout(Duration::from_secs(4)).error_code(), "TIMEOUT");
        assert_eq!(ManagerError::ForcedKill(Duration::from_secs(1)).error_code(), "FORCED_KILL");
    }

    #[test]
    fn test_retryable() {
        assert!(ManagerError::Timeout(Duration::from_secs(4)).is_retryable());
        assert!(!ManagerError::AlreadyRunning.is_retryable());
        assert!(ManagerError::NotReady.is_offline());
        assert!(!ManagerError::Timeout(Duration::from_secs(4)).is_offline());
    }

    #[test]
    fn test_io_conversion() {
        let err: ManagerError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert_eq!(err.error_code(), "IO_ERROR");
        assert!(err.to_string().contains("pipe closed"));
    }
}

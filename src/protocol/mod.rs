//! Network protocols used next to the console. Currently only the UDP query
//! protocol, as a fallback source of occupancy when the console is unavailable.

pub mod query;

use thiserror::Error;

/// 프로토콜 통신 오류 타입
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Protocol-specific error: {0}")]
    Protocol(String),
}

impl ProtocolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::TimeoutError("no response from 127.0.0.1:25565".into());
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timeout: no response from 127.0.0.1:25565");
        assert!(!ProtocolError::Protocol("bad packet".into()).is_timeout());
    }
}

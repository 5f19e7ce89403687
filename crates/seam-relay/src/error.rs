//! Error types for the relay crate.

use crate::codec::CodecError;
use crate::endpoint::EndpointError;
use crate::session::{ConnectError, SessionError};

/// Top-level error for a relay instance.
///
/// Errors inside the long-running loops are never surfaced here — they are
/// logged and drive the cancellation scope toward teardown. What does
/// surface is startup failure and teardown failure, both of which the caller
/// needs to act on.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("accept task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_from_connect_error() {
        let err: RelayError = ConnectError::Rejected { status: 403 }.into();
        assert!(matches!(err, RelayError::Connect(_)));
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn test_relay_error_from_endpoint_error() {
        let err: RelayError =
            EndpointError::NoListener(std::path::PathBuf::from("/tmp/x.sock")).into();
        assert!(matches!(err, RelayError::Endpoint(_)));
        assert!(err.to_string().contains("x.sock"));
    }

    #[test]
    fn test_relay_error_from_session_error() {
        let err: RelayError = SessionError::HandlerMissing.into();
        assert!(matches!(err, RelayError::Session(_)));
    }

    #[test]
    fn test_relay_error_display_address_in_use() {
        let err: RelayError =
            EndpointError::AddressInUse(std::path::PathBuf::from("/run/maker.sock")).into();
        assert!(err.to_string().contains("already in use"));
        assert!(err.to_string().contains("maker.sock"));
    }
}

use thiserror::Error;

use crate::transport::TransportError;

/// Fallback text when the server rejects a request without saying why.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Failure of a single request/acknowledgement exchange. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,

    /// Server answered `success: false`.
    #[error("{0}")]
    Rejected(String),

    /// Transport dropped before the acknowledgement arrived.
    #[error("connection closed before acknowledgement")]
    Closed,

    #[error("malformed acknowledgement: missing `{0}`")]
    Malformed(&'static str),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            _ => Self::Closed,
        }
    }
}

/// Uniform result error of the repository facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Input rejected before any network interaction.
    #[error("{0}")]
    Validation(&'static str),

    #[error("{0}")]
    Failure(String),
}

impl From<SessionError> for RepositoryError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Rejected(message) => Self::Failure(message),
            other => Self::Failure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_surfaces_as_failure_text() {
        let err: RepositoryError = SessionError::NotConnected.into();
        assert_eq!(err, RepositoryError::Failure("not connected".to_string()));
    }

    #[test]
    fn rejection_keeps_server_text() {
        let err: RepositoryError = SessionError::Rejected("Conversation introuvable".into()).into();
        assert_eq!(err.to_string(), "Conversation introuvable");
    }
}

//! Sync Errors

use struct_types::{MutationError, SerializationError};

// ─────────────────────────────────────────────────────────────────────────────
// Sync Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by controllers, proxies and message routing
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("No controller named \"{0}\" found")]
    ControllerNotFound(String),

    #[error("Action \"{0}\" not found on controller")]
    ActionNotFound(String),

    #[error("Unknown event \"{0}\"")]
    UnknownEvent(String),

    #[error("Controller named \"{0}\" registered already")]
    DuplicateController(String),

    #[error("Controller \"{0}\" is bound to a server already")]
    AlreadyRegistered(String),

    #[error("Meta message of type \"{0}\" not accepted")]
    MetaNotAccepted(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Client of session \"{session}\" failed to receive update: {reason}")]
    Delivery { session: String, reason: String },

    /// Message refused by middleware or an action handler
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    /// Errors caused by the caller rather than by the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::ControllerNotFound(_)
                | SyncError::ActionNotFound(_)
                | SyncError::UnknownEvent(_)
                | SyncError::InvalidMessage(_)
                | SyncError::Rejected(_)
        )
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

// ─────────────────────────────────────────────────────────────────────────────
// Bridge Error
// ─────────────────────────────────────────────────────────────────────────────

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The remote handler answered with an error
    #[error("Server Error: {0}")]
    Remote(String),

    #[error("No handler registered for topic \"{0}\"")]
    NoHandler(String),

    #[error("Bridge disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(SyncError::ControllerNotFound("Foo::missing".into()).is_client_error());
        assert!(!SyncError::DuplicateController("Foo".into()).is_client_error());
        assert!(!SyncError::Bridge(BridgeError::Disconnected).is_client_error());
    }

    #[test]
    fn test_remote_error_message() {
        let err = SyncError::from(BridgeError::Remote("Not authenticated".into()));
        assert_eq!(err.to_string(), "Server Error: Not authenticated");
    }
}

//! Typed rejections returned by the store, registry and router.

use crate::ids::{ConnectionId, SessionId, WorkId};
use crate::registry::Role;
use crate::session::SessionStatus;

// ── Error code constants ────────────────────────────────────────────

/// Frame could not be decoded as a JSON object with a `type`.
pub const INVALID_FRAME: &str = "INVALID_FRAME";
/// `type` is not one the relay understands.
pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
/// Required field missing or of the wrong shape.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Create with an id that is already live.
pub const SESSION_EXISTS: &str = "SESSION_EXISTS";
/// Session id unknown (never created or already swept).
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Session is not in the status the operation requires.
pub const INVALID_STATUS: &str = "INVALID_STATUS";
/// Session already has a live client-leg connection.
pub const ALREADY_BOUND: &str = "ALREADY_BOUND";
/// Connection is already bound to another session.
pub const CONNECTION_ALREADY_BOUND: &str = "CONNECTION_ALREADY_BOUND";
/// Sender is not the controller that created the session.
pub const NOT_SESSION_OWNER: &str = "NOT_SESSION_OWNER";
/// Sender is not the client bound to the session.
pub const NOT_BOUND: &str = "NOT_BOUND";
/// No client-leg connection is bound to the session.
pub const CLIENT_NOT_CONNECTED: &str = "CLIENT_NOT_CONNECTED";
/// Message not allowed for the sender's role.
pub const ROLE_REQUIRED: &str = "ROLE_REQUIRED";
/// Outcome reported for a different work request.
pub const WORK_ID_MISMATCH: &str = "WORK_ID_MISMATCH";
/// Target queue full or closed.
pub const DELIVERY_FAILED: &str = "DELIVERY_FAILED";
/// Connection id not present in the registry.
pub const UNKNOWN_CONNECTION: &str = "UNKNOWN_CONNECTION";

/// Precondition violations. Each variant leaves session and registry state
/// unchanged.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// A field failed validation after decoding.
    #[error("invalid {field}: {reason}")]
    InvalidParams {
        /// Offending field (wire name).
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Duplicate create.
    #[error("session {0} already exists")]
    SessionExists(SessionId),

    /// Unknown or already removed session.
    #[error("unknown session: {0}")]
    SessionNotFound(SessionId),

    /// Session is in the wrong status for the operation.
    #[error("session {id} is {actual}, expected {expected}")]
    InvalidStatus {
        /// Session.
        id: SessionId,
        /// Current status.
        actual: SessionStatus,
        /// Status the operation requires.
        expected: SessionStatus,
    },

    /// Session already has a live client binding.
    #[error("session {0} is already bound to another connection")]
    AlreadyBound(SessionId),

    /// Sender already carries a binding.
    #[error("connection is already bound to session {0}")]
    ConnectionAlreadyBound(SessionId),

    /// Sender is a controller, but not the one that created the session.
    #[error("session {0} belongs to another controller")]
    NotSessionOwner(SessionId),

    /// Sender is not the session's bound client.
    #[error("connection is not bound to session {0}")]
    NotBound(SessionId),

    /// No client is bound to receive work.
    #[error("no client connected for session {0}")]
    ClientNotConnected(SessionId),

    /// Sender's role does not permit this message.
    #[error("{msg_type} requires a {required} connection")]
    RoleRequired {
        /// Rejected message type.
        msg_type: &'static str,
        /// Role the message requires.
        required: Role,
    },

    /// `work_result` names a different work request.
    #[error("work result for {actual} does not match in-flight work {expected} on session {id}")]
    WorkIdMismatch {
        /// Session.
        id: SessionId,
        /// In-flight work id.
        expected: WorkId,
        /// Reported work id.
        actual: WorkId,
    },

    /// The work request could not be queued for the client.
    #[error("failed to deliver work request to the client of session {0}")]
    DeliveryFailed(SessionId),

    /// Connection not registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

impl RelayError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::SessionExists(_) => SESSION_EXISTS,
            Self::SessionNotFound(_) => SESSION_NOT_FOUND,
            Self::InvalidStatus { .. } => INVALID_STATUS,
            Self::AlreadyBound(_) => ALREADY_BOUND,
            Self::ConnectionAlreadyBound(_) => CONNECTION_ALREADY_BOUND,
            Self::NotSessionOwner(_) => NOT_SESSION_OWNER,
            Self::NotBound(_) => NOT_BOUND,
            Self::ClientNotConnected(_) => CLIENT_NOT_CONNECTED,
            Self::RoleRequired { .. } => ROLE_REQUIRED,
            Self::WorkIdMismatch { .. } => WORK_ID_MISMATCH,
            Self::DeliveryFailed(_) => DELIVERY_FAILED,
            Self::UnknownConnection(_) => UNKNOWN_CONNECTION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_session() {
        let err = RelayError::SessionNotFound(SessionId::from_raw("S9"));
        assert_eq!(err.to_string(), "unknown session: S9");
        assert_eq!(err.code(), SESSION_NOT_FOUND);
    }

    #[test]
    fn invalid_status_message() {
        let err = RelayError::InvalidStatus {
            id: SessionId::from_raw("S1"),
            actual: SessionStatus::Completed,
            expected: SessionStatus::TransactionInFlight,
        };
        assert_eq!(
            err.to_string(),
            "session S1 is completed, expected transaction_in_flight"
        );
        assert_eq!(err.code(), INVALID_STATUS);
    }

    #[test]
    fn not_session_owner_message() {
        let err = RelayError::NotSessionOwner(SessionId::from_raw("S1"));
        assert_eq!(err.to_string(), "session S1 belongs to another controller");
        assert_eq!(err.code(), NOT_SESSION_OWNER);
    }

    #[test]
    fn role_required_message() {
        let err = RelayError::RoleRequired {
            msg_type: "create_session",
            required: Role::Controller,
        };
        assert_eq!(err.to_string(), "create_session requires a controller connection");
    }

    #[test]
    fn codes_are_screaming_snake_case() {
        let errors = [
            RelayError::AlreadyBound(SessionId::from_raw("S")),
            RelayError::NotBound(SessionId::from_raw("S")),
            RelayError::NotSessionOwner(SessionId::from_raw("S")),
            RelayError::DeliveryFailed(SessionId::from_raw("S")),
            RelayError::UnknownConnection(ConnectionId::from_raw("c")),
        ];
        for err in errors {
            assert!(
                err.code().chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "bad code {}",
                err.code()
            );
        }
    }
}

//! Session record and its status graph.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RelayError;
use crate::ids::{ConnectionId, SessionId, WorkId};

/// Position of a session in the handshake.
///
/// Variants are declared in handshake order; the derived `Ord` is the
/// forward direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created by a controller, waiting for a client to bind.
    Created,
    /// A client connection is bound.
    Bound,
    /// The client reported an external resource (e.g. a wallet).
    ResourceLinked,
    /// A work request was forwarded to the client.
    TransactionInFlight,
    /// The client reported the work outcome.
    Completed,
    /// Evicted by the sweeper before completing.
    Expired,
}

impl SessionStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Bound => "bound",
            Self::ResourceLinked => "resource_linked",
            Self::TransactionInFlight => "transaction_in_flight",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }

    /// The single forward successor along the handshake, if any.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Bound),
            Self::Bound => Some(Self::ResourceLinked),
            Self::ResourceLinked => Some(Self::TransactionInFlight),
            Self::TransactionInFlight => Some(Self::Completed),
            Self::Completed | Self::Expired => None,
        }
    }

    /// Whether `self → next` is an edge of the transition graph.
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Expired {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by the client for the in-flight work request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// Whether the work succeeded.
    pub success: bool,
    /// Opaque result data (e.g. a transaction hash).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
    /// Client-side error description when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters for a controller's create request.
#[derive(Clone, Debug)]
pub struct NewSession {
    /// Session token chosen by the controller.
    pub id: SessionId,
    /// End user the session acts for.
    pub owner_id: String,
    /// Chat/group the request originated from.
    pub group_id: String,
    /// Human-readable owner name shown to the client.
    pub display_name: String,
    /// Opaque data handed to the client on bind.
    pub pending_payload: Option<Value>,
    /// Controller connection that issued the create.
    pub created_by: ConnectionId,
}

/// One handshake instance.
///
/// Fields are read-only from outside the crate; every mutation goes through
/// [`Session::advance`] so the status can only move forward.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    id: SessionId,
    owner_id: String,
    group_id: String,
    display_name: String,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    created_by: ConnectionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bound_resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    work_id: Option<WorkId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<Outcome>,
}

impl Session {
    pub(crate) fn new(params: NewSession, now: DateTime<Utc>) -> Self {
        Self {
            id: params.id,
            owner_id: params.owner_id,
            group_id: params.group_id,
            display_name: params.display_name,
            status: SessionStatus::Created,
            created_at: now,
            created_by: params.created_by,
            connected_at: None,
            completed_at: None,
            bound_resource_id: None,
            resource_link: None,
            pending_payload: params.pending_payload,
            work_id: None,
            outcome: None,
        }
    }

    /// Move from `expected` to its successor.
    ///
    /// Fails without touching the record if the session is not currently in
    /// `expected`.
    pub(crate) fn advance(
        &mut self,
        expected: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<SessionStatus, RelayError> {
        if self.status != expected {
            return Err(RelayError::InvalidStatus {
                id: self.id.clone(),
                actual: self.status,
                expected,
            });
        }
        let Some(next) = expected.successor() else {
            return Err(RelayError::InvalidStatus {
                id: self.id.clone(),
                actual: self.status,
                expected,
            });
        };
        debug_assert!(self.status.can_transition_to(next));
        self.status = next;
        match next {
            SessionStatus::Bound => self.connected_at = Some(now),
            SessionStatus::Completed => self.completed_at = Some(now),
            _ => {}
        }
        Ok(next)
    }

    /// Mark a non-terminal session as expired. Returns `false` if it had
    /// already reached a terminal status.
    pub(crate) fn expire(&mut self) -> bool {
        if !self.status.can_transition_to(SessionStatus::Expired) {
            return false;
        }
        self.status = SessionStatus::Expired;
        true
    }

    pub(crate) fn set_resource(&mut self, resource_id: String, link: Option<String>) {
        self.bound_resource_id = Some(resource_id);
        self.resource_link = link;
    }

    pub(crate) fn set_work_id(&mut self, work_id: WorkId) {
        self.work_id = Some(work_id);
    }

    pub(crate) fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }

    /// Session token.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// End user the session acts for.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Chat/group the request originated from.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Human-readable owner name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// When the controller created the session.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Controller connection that created the session.
    pub fn created_by(&self) -> &ConnectionId {
        &self.created_by
    }

    /// When a client bound.
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// When the outcome was reported.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Linked resource (e.g. wallet address).
    pub fn bound_resource_id(&self) -> Option<&str> {
        self.bound_resource_id.as_deref()
    }

    /// Optional link describing the resource.
    pub fn resource_link(&self) -> Option<&str> {
        self.resource_link.as_deref()
    }

    /// Data attached at creation.
    pub fn pending_payload(&self) -> Option<&Value> {
        self.pending_payload.as_ref()
    }

    /// Identifier of the dispatched work request.
    pub fn work_id(&self) -> Option<&WorkId> {
        self.work_id.as_ref()
    }

    /// Reported outcome, once completed.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }
}

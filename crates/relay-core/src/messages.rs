//! Wire envelope: inbound frames decoded once into [`ClientMessage`],
//! outbound frames built as [`ServerMessage`] and stamped on encode.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{INVALID_FRAME, INVALID_PARAMS, UNKNOWN_TYPE};
use crate::ids::{ConnectionId, SessionId, WorkId};
use crate::session::Session;
use crate::sweep::EvictionReason;

/// Frames a peer may send.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Upgrade this socket to the controller role.
    RegisterController,
    /// Controller opens a new session.
    CreateSession {
        session_id: SessionId,
        owner_id: String,
        group_id: String,
        display_name: String,
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Client claims a session.
    BindSession { session_id: SessionId },
    /// Client reports the external resource it linked.
    ResourceLinked {
        session_id: SessionId,
        resource_id: String,
        #[serde(default)]
        resource_link: Option<String>,
    },
    /// Controller asks the bound client to perform work.
    DispatchWork {
        session_id: SessionId,
        payload: Value,
        #[serde(default)]
        work_id: Option<WorkId>,
    },
    /// Client reports the outcome of the in-flight work.
    WorkResult {
        session_id: SessionId,
        success: bool,
        #[serde(default)]
        work_id: Option<WorkId>,
        #[serde(default)]
        result_data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Application-level keepalive.
    Heartbeat,
    /// Snapshot query for one session.
    SessionStatus { session_id: SessionId },
}

impl ClientMessage {
    /// Every `type` discriminator the relay accepts.
    pub const TYPES: &'static [&'static str] = &[
        "register_controller",
        "create_session",
        "bind_session",
        "resource_linked",
        "dispatch_work",
        "work_result",
        "heartbeat",
        "session_status",
    ];

    /// Wire discriminator of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RegisterController => "register_controller",
            Self::CreateSession { .. } => "create_session",
            Self::BindSession { .. } => "bind_session",
            Self::ResourceLinked { .. } => "resource_linked",
            Self::DispatchWork { .. } => "dispatch_work",
            Self::WorkResult { .. } => "work_result",
            Self::Heartbeat => "heartbeat",
            Self::SessionStatus { .. } => "session_status",
        }
    }
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Binary frame whose bytes are not UTF-8.
    #[error("frame is not valid UTF-8 (invalid byte at offset {valid_up_to})")]
    InvalidUtf8 {
        /// Length of the valid UTF-8 prefix.
        valid_up_to: usize,
    },
    /// Not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Valid JSON but not an object.
    #[error("frame must be a JSON object")]
    NotAnObject,
    /// Object without a string `type`.
    #[error("frame is missing a string \"type\" field")]
    MissingType,
    /// `type` names no known message.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// Known `type` whose fields do not fit.
    #[error("invalid {msg_type} frame: {reason}")]
    InvalidFields {
        /// Message type.
        msg_type: &'static str,
        /// serde's description of the problem.
        reason: String,
    },
}

impl DecodeError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUtf8 { .. } | Self::Malformed(_) | Self::NotAnObject | Self::MissingType => {
                INVALID_FRAME
            }
            Self::UnknownType(_) => UNKNOWN_TYPE,
            Self::InvalidFields { .. } => INVALID_PARAMS,
        }
    }

    /// The `type` the sender used, when one could be read.
    pub fn request_type(&self) -> Option<&str> {
        match self {
            Self::UnknownType(t) => Some(t.as_str()),
            Self::InvalidFields { msg_type, .. } => Some(*msg_type),
            _ => None,
        }
    }
}

/// Decode one binary frame. The bytes must be UTF-8 JSON; nothing is
/// replaced or dropped.
pub fn decode_bytes(data: &[u8]) -> Result<ClientMessage, DecodeError> {
    let text = std::str::from_utf8(data).map_err(|e| DecodeError::InvalidUtf8 {
        valid_up_to: e.valid_up_to(),
    })?;
    decode(text)
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(DecodeError::NotAnObject);
    };
    let Some(raw_type) = object.get("type").and_then(Value::as_str) else {
        return Err(DecodeError::MissingType);
    };
    let Some(msg_type) = ClientMessage::TYPES.iter().copied().find(|t| *t == raw_type) else {
        return Err(DecodeError::UnknownType(raw_type.to_owned()));
    };
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidFields {
        msg_type,
        reason: e.to_string(),
    })
}

/// Frames the relay sends.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once when a socket opens.
    ConnectionEstablished { connection_id: ConnectionId },
    /// Reply to `register_controller`.
    ControllerRegistered { connection_id: ConnectionId },
    /// Reply to `create_session`.
    SessionCreated { session_id: SessionId },
    /// Reply to a successful `bind_session`.
    SessionBound {
        session_id: SessionId,
        owner_id: String,
        group_id: String,
        display_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pending_payload: Option<Value>,
    },
    /// Broadcast to controllers when a client links a resource.
    ResourceLinked {
        session_id: SessionId,
        owner_id: String,
        group_id: String,
        display_name: String,
        created_by: ConnectionId,
        resource_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_link: Option<String>,
    },
    /// Acknowledges a request that has no richer reply.
    Ack {
        request_type: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        work_id: Option<WorkId>,
    },
    /// Forwarded to the bound client.
    WorkRequest {
        session_id: SessionId,
        work_id: WorkId,
        payload: Value,
    },
    /// Broadcast to controllers when the client reports an outcome.
    WorkCompleted {
        session_id: SessionId,
        owner_id: String,
        group_id: String,
        created_by: ConnectionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        work_id: Option<WorkId>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `heartbeat`.
    HeartbeatAck,
    /// Reply to `session_status`.
    SessionStatus { session: Session },
    /// Sweeper evicted a live session.
    SessionExpired {
        session_id: SessionId,
        reason: EvictionReason,
    },
    /// Rejection sent back to the originator.
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_type: Option<String>,
    },
}

impl ServerMessage {
    /// Wire discriminator of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::ControllerRegistered { .. } => "controller_registered",
            Self::SessionCreated { .. } => "session_created",
            Self::SessionBound { .. } => "session_bound",
            Self::ResourceLinked { .. } => "resource_linked",
            Self::Ack { .. } => "ack",
            Self::WorkRequest { .. } => "work_request",
            Self::WorkCompleted { .. } => "work_completed",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::SessionStatus { .. } => "session_status",
            Self::SessionExpired { .. } => "session_expired",
            Self::Error { .. } => "error",
        }
    }
}

/// Serialize `msg` with a `timestamp` field set to `now`.
pub fn encode(msg: &ServerMessage, now: DateTime<Utc>) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(msg)?;
    if let Value::Object(map) = &mut value {
        let _ = map.insert(
            "timestamp".into(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    serde_json::to_string(&value)
}

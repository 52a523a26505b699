//! Message Router: validates decoded frames against the store and registry
//! and routes the resulting frames to peers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::errors::RelayError;
use crate::ids::{ConnectionId, SessionId, WorkId};
use crate::messages::{self, ClientMessage, DecodeError, ServerMessage};
use crate::registry::{ConnectionRegistry, Role};
use crate::session::{NewSession, Outcome, Session, SessionStatus};
use crate::store::SessionStore;
use crate::sweep::{EvictionReason, Evicted, SweepPolicy, SweepReport};

/// What happened to one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Frame applied.
    Handled {
        /// Decoded message type.
        msg_type: &'static str,
    },
    /// Frame rejected; an `error` frame went back to the sender.
    Rejected {
        /// Decoded message type, if decoding got that far.
        msg_type: Option<&'static str>,
        /// Error code sent back.
        code: &'static str,
    },
}

/// Point-in-time counters for health and metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Open sockets.
    pub connections: usize,
    /// Sockets in the controller role.
    pub controllers: usize,
    /// Live session bindings.
    pub bindings: usize,
    /// Session records in the store.
    pub sessions: usize,
    /// Sessions awaiting a work outcome.
    pub in_flight: usize,
    /// Frames dropped because a peer's queue was full or closed.
    pub dropped_frames: u64,
}

/// Store, registry and routing logic behind one `&mut self`.
///
/// Every operation runs to completion without awaiting, so whoever owns the
/// `Relay` linearizes all session and binding changes.
#[derive(Debug)]
pub struct Relay {
    store: SessionStore,
    registry: ConnectionRegistry,
    policy: SweepPolicy,
    dropped_frames: u64,
}

impl Relay {
    /// Create an empty relay with the given eviction policy.
    pub fn new(policy: SweepPolicy) -> Self {
        Self {
            store: SessionStore::new(),
            registry: ConnectionRegistry::new(),
            policy,
            dropped_frames: 0,
        }
    }

    /// Register a freshly opened socket and greet it.
    pub fn open(&mut self, handle: Arc<ConnectionHandle>, now: DateTime<Utc>) {
        let greeting = ServerMessage::ConnectionEstablished {
            connection_id: handle.id.clone(),
        };
        self.registry.register_client(Arc::clone(&handle));
        let _ = self.send(&handle, &greeting, now);
        debug!(conn_id = %handle.id, "connection registered");
    }

    /// Forget a closed socket. Any session it was bound to keeps its status.
    pub fn close(&mut self, conn: &ConnectionId) {
        if let Some((role, session)) = self.registry.unregister(conn) {
            match session {
                Some(session_id) => {
                    info!(conn_id = %conn, %role, session_id = %session_id, "bound client disconnected");
                }
                None => debug!(conn_id = %conn, %role, "connection unregistered"),
            }
        }
    }

    /// Decode and apply one text frame from `conn`.
    pub fn handle_frame(&mut self, conn: &ConnectionId, text: &str, now: DateTime<Utc>) -> Disposition {
        self.apply_decoded(conn, messages::decode(text), now)
    }

    /// Decode and apply one binary frame from `conn`. Bytes that are not
    /// UTF-8 are rejected with `INVALID_FRAME`.
    pub fn handle_binary(&mut self, conn: &ConnectionId, data: &[u8], now: DateTime<Utc>) -> Disposition {
        self.apply_decoded(conn, messages::decode_bytes(data), now)
    }

    fn apply_decoded(
        &mut self,
        conn: &ConnectionId,
        decoded: Result<ClientMessage, DecodeError>,
        now: DateTime<Utc>,
    ) -> Disposition {
        let msg = match decoded {
            Ok(msg) => msg,
            Err(err) => {
                debug!(conn_id = %conn, error = %err, "undecodable frame");
                let code = err.code();
                let reply = ServerMessage::Error {
                    code,
                    message: err.to_string(),
                    request_type: err.request_type().map(str::to_owned),
                };
                self.reply(conn, &reply, now);
                return Disposition::Rejected { msg_type: None, code };
            }
        };

        let msg_type = msg.type_name();
        match self.dispatch(conn, msg, now) {
            Ok(()) => Disposition::Handled { msg_type },
            Err(err) => {
                debug!(conn_id = %conn, msg_type, error = %err, "request rejected");
                let code = err.code();
                let reply = ServerMessage::Error {
                    code,
                    message: err.to_string(),
                    request_type: Some(msg_type.to_owned()),
                };
                self.reply(conn, &reply, now);
                Disposition::Rejected {
                    msg_type: Some(msg_type),
                    code,
                }
            }
        }
    }

    fn dispatch(&mut self, conn: &ConnectionId, msg: ClientMessage, now: DateTime<Utc>) -> Result<(), RelayError> {
        match msg {
            ClientMessage::RegisterController => self.register_controller(conn, now),
            ClientMessage::CreateSession {
                session_id,
                owner_id,
                group_id,
                display_name,
                payload,
            } => self.create_session(
                conn,
                NewSession {
                    id: session_id,
                    owner_id,
                    group_id,
                    display_name,
                    pending_payload: payload,
                    created_by: conn.clone(),
                },
                now,
            ),
            ClientMessage::BindSession { session_id } => self.bind_session(conn, &session_id, now),
            ClientMessage::ResourceLinked {
                session_id,
                resource_id,
                resource_link,
            } => self.resource_linked(conn, &session_id, resource_id, resource_link, now),
            ClientMessage::DispatchWork {
                session_id,
                payload,
                work_id,
            } => self.dispatch_work(conn, &session_id, payload, work_id, now),
            ClientMessage::WorkResult {
                session_id,
                success,
                work_id,
                result_data,
                error,
            } => self.work_result(
                conn,
                &session_id,
                work_id,
                Outcome {
                    success,
                    result_data,
                    error,
                },
                now,
            ),
            ClientMessage::Heartbeat => {
                self.reply(conn, &ServerMessage::HeartbeatAck, now);
                Ok(())
            }
            ClientMessage::SessionStatus { session_id } => {
                let session = self.store.require(&session_id)?.clone();
                self.reply(conn, &ServerMessage::SessionStatus { session }, now);
                Ok(())
            }
        }
    }

    fn register_controller(&mut self, conn: &ConnectionId, now: DateTime<Utc>) -> Result<(), RelayError> {
        self.registry.register_controller(conn)?;
        info!(conn_id = %conn, "controller registered");
        let reply = ServerMessage::ControllerRegistered {
            connection_id: conn.clone(),
        };
        self.reply(conn, &reply, now);
        Ok(())
    }

    fn create_session(&mut self, conn: &ConnectionId, params: NewSession, now: DateTime<Utc>) -> Result<(), RelayError> {
        self.require_role(conn, Role::Controller, "create_session")?;
        require_non_empty(params.id.as_str(), "sessionId")?;
        require_non_empty(&params.owner_id, "ownerId")?;
        require_non_empty(&params.group_id, "groupId")?;

        let session_id = self.store.create(params, now)?.id().clone();
        info!(conn_id = %conn, session_id = %session_id, "session created");
        self.reply(conn, &ServerMessage::SessionCreated { session_id }, now);
        Ok(())
    }

    /// Validates both the store and the registry before touching either, so
    /// a rejected bind leaves no partial state.
    fn bind_session(&mut self, conn: &ConnectionId, session_id: &SessionId, now: DateTime<Utc>) -> Result<(), RelayError> {
        self.require_role(conn, Role::Client, "bind_session")?;
        let _ = self.store.require(session_id)?;
        self.registry.check_bind(conn, session_id)?;
        let _ = self.store.require_status(session_id, SessionStatus::Created)?;

        let session = self.store.mark_bound(session_id, now)?;
        let reply = ServerMessage::SessionBound {
            session_id: session.id().clone(),
            owner_id: session.owner_id().to_owned(),
            group_id: session.group_id().to_owned(),
            display_name: session.display_name().to_owned(),
            pending_payload: session.pending_payload().cloned(),
        };
        self.registry.bind(conn, session_id)?;
        info!(conn_id = %conn, session_id = %session_id, "client bound");
        self.reply(conn, &reply, now);
        Ok(())
    }

    fn resource_linked(
        &mut self,
        conn: &ConnectionId,
        session_id: &SessionId,
        resource_id: String,
        resource_link: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        self.require_role(conn, Role::Client, "resource_linked")?;
        require_non_empty(&resource_id, "resourceId")?;
        self.require_bound(conn, session_id)?;

        let session = self.store.link_resource(session_id, resource_id, resource_link, now)?;
        let broadcast = ServerMessage::ResourceLinked {
            session_id: session.id().clone(),
            owner_id: session.owner_id().to_owned(),
            group_id: session.group_id().to_owned(),
            display_name: session.display_name().to_owned(),
            created_by: session.created_by().clone(),
            resource_id: session.bound_resource_id().unwrap_or_default().to_owned(),
            resource_link: session.resource_link().map(str::to_owned),
        };
        info!(conn_id = %conn, session_id = %session_id, "resource linked");
        let _ = self.broadcast(&broadcast, now);
        self.ack(conn, "resource_linked", session_id, None, now);
        Ok(())
    }

    /// Only the controller that created the session may dispatch work to its
    /// client. The work request is queued for the client before the status
    /// moves, so a session is never `TransactionInFlight` without the client
    /// having been handed the request.
    fn dispatch_work(
        &mut self,
        conn: &ConnectionId,
        session_id: &SessionId,
        payload: Value,
        work_id: Option<WorkId>,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        self.require_role(conn, Role::Controller, "dispatch_work")?;
        if payload.is_null() {
            return Err(RelayError::InvalidParams {
                field: "payload",
                reason: "must not be null",
            });
        }
        if self.store.require(session_id)?.created_by() != conn {
            return Err(RelayError::NotSessionOwner(session_id.clone()));
        }
        let _ = self.store.require_status(session_id, SessionStatus::ResourceLinked)?;
        let client = self
            .registry
            .client_for(session_id)
            .ok_or_else(|| RelayError::ClientNotConnected(session_id.clone()))?;

        let work_id = work_id.unwrap_or_default();
        let request = ServerMessage::WorkRequest {
            session_id: session_id.clone(),
            work_id: work_id.clone(),
            payload,
        };
        if !self.send(&client, &request, now) {
            return Err(RelayError::DeliveryFailed(session_id.clone()));
        }
        let _ = self.store.start_work(session_id, work_id.clone(), now)?;
        info!(conn_id = %conn, session_id = %session_id, work_id = %work_id, "work dispatched");
        self.ack(conn, "dispatch_work", session_id, Some(work_id), now);
        Ok(())
    }

    fn work_result(
        &mut self,
        conn: &ConnectionId,
        session_id: &SessionId,
        work_id: Option<WorkId>,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        self.require_role(conn, Role::Client, "work_result")?;
        self.require_bound(conn, session_id)?;

        let session = self
            .store
            .complete_work(session_id, work_id.as_ref(), outcome.clone(), now)?;
        let broadcast = ServerMessage::WorkCompleted {
            session_id: session.id().clone(),
            owner_id: session.owner_id().to_owned(),
            group_id: session.group_id().to_owned(),
            created_by: session.created_by().clone(),
            work_id: session.work_id().cloned(),
            success: outcome.success,
            result_data: outcome.result_data,
            error: outcome.error,
        };
        let work_id = session.work_id().cloned();
        info!(conn_id = %conn, session_id = %session_id, success = outcome.success, "work completed");
        let _ = self.broadcast(&broadcast, now);
        self.ack(conn, "work_result", session_id, work_id, now);
        Ok(())
    }

    /// Evict sessions the policy marks at `now` and release their bindings.
    ///
    /// Sessions evicted for age notify every controller and their bound
    /// client with `session_expired`; completed sessions leave silently.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for Evicted { session, reason } in self.store.sweep(&self.policy, now) {
            let session_id = session.id().clone();
            let client = self.registry.release_session(&session_id);
            if client.is_some() {
                report.released_bindings += 1;
            }

            match reason {
                EvictionReason::MaxAge => {
                    info!(session_id = %session_id, status = %session.status(), "session expired");
                    let notice = ServerMessage::SessionExpired {
                        session_id: session_id.clone(),
                        reason,
                    };
                    let _ = self.broadcast(&notice, now);
                    if let Some(client) = client {
                        let _ = self.send(&client, &notice, now);
                    }
                }
                EvictionReason::Completed => {
                    debug!(session_id = %session_id, "completed session removed");
                }
            }
            report.evicted.push((session_id, reason));
        }
        report
    }

    /// Snapshot of one session.
    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.store.get(id).cloned()
    }

    /// Current counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.registry.len(),
            controllers: self.registry.controller_count(),
            bindings: self.registry.binding_count(),
            sessions: self.store.len(),
            in_flight: self.store.count_with_status(SessionStatus::TransactionInFlight),
            dropped_frames: self.dropped_frames,
        }
    }

    /// Frames dropped on full or closed queues so far. Cheaper than
    /// [`Relay::stats`], which scans every session.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Read access to the session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Read access to the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn require_role(&self, conn: &ConnectionId, required: Role, msg_type: &'static str) -> Result<(), RelayError> {
        let role = self
            .registry
            .role_of(conn)
            .ok_or_else(|| RelayError::UnknownConnection(conn.clone()))?;
        if role == required {
            Ok(())
        } else {
            Err(RelayError::RoleRequired { msg_type, required })
        }
    }

    fn require_bound(&self, conn: &ConnectionId, session_id: &SessionId) -> Result<(), RelayError> {
        let _ = self.store.require(session_id)?;
        if self.registry.bound_session(conn) == Some(session_id) {
            Ok(())
        } else {
            Err(RelayError::NotBound(session_id.clone()))
        }
    }

    fn ack(
        &mut self,
        conn: &ConnectionId,
        request_type: &'static str,
        session_id: &SessionId,
        work_id: Option<WorkId>,
        now: DateTime<Utc>,
    ) {
        let ack = ServerMessage::Ack {
            request_type,
            session_id: Some(session_id.clone()),
            work_id,
        };
        self.reply(conn, &ack, now);
    }

    fn reply(&mut self, conn: &ConnectionId, msg: &ServerMessage, now: DateTime<Utc>) {
        if let Some(handle) = self.registry.get(conn) {
            let _ = self.send(&handle, msg, now);
        }
    }

    fn send(&mut self, handle: &ConnectionHandle, msg: &ServerMessage, now: DateTime<Utc>) -> bool {
        let frame = match messages::encode(msg, now) {
            Ok(frame) => Arc::new(frame),
            Err(err) => {
                warn!(conn_id = %handle.id, msg_type = msg.type_name(), error = %err, "failed to encode frame");
                return false;
            }
        };
        if handle.send(frame) {
            true
        } else {
            self.dropped_frames += 1;
            warn!(
                conn_id = %handle.id,
                msg_type = msg.type_name(),
                closed = handle.is_closed(),
                dropped = handle.drop_count(),
                "outbound queue full or closed, frame dropped"
            );
            false
        }
    }

    /// Fan out to every controller; returns how many queues accepted it.
    fn broadcast(&mut self, msg: &ServerMessage, now: DateTime<Utc>) -> usize {
        let frame = match messages::encode(msg, now) {
            Ok(frame) => Arc::new(frame),
            Err(err) => {
                warn!(msg_type = msg.type_name(), error = %err, "failed to encode broadcast");
                return 0;
            }
        };
        let mut delivered = 0;
        for controller in self.registry.controllers() {
            if controller.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                self.dropped_frames += 1;
                warn!(
                    conn_id = %controller.id,
                    msg_type = msg.type_name(),
                    closed = controller.is_closed(),
                    dropped = controller.drop_count(),
                    "broadcast dropped"
                );
            }
        }
        debug!(msg_type = msg.type_name(), delivered, "broadcast sent");
        delivered
    }
}

fn require_non_empty(value: &str, field: &'static str) -> Result<(), RelayError> {
    if value.trim().is_empty() {
        Err(RelayError::InvalidParams {
            field,
            reason: "must not be empty",
        })
    } else {
        Ok(())
    }
}

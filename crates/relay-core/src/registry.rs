//! Connection Registry: roles of live sockets and the session → client-leg
//! binding table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::connection::ConnectionHandle;
use crate::errors::RelayError;
use crate::ids::{ConnectionId, SessionId};

/// Which side of the handshake a socket speaks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Per-session front end. Every socket starts here.
    Client,
    /// Bot-side process; receives broadcasts.
    Controller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Controller => "controller",
        })
    }
}

#[derive(Debug)]
struct Entry {
    handle: Arc<ConnectionHandle>,
    role: Role,
    bound_session: Option<SessionId>,
}

/// Live sockets keyed by [`ConnectionId`].
///
/// `clients_by_session` is the reverse index of `Entry::bound_session` and
/// the two are only ever changed together.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Entry>,
    clients_by_session: HashMap<SessionId, ConnectionId>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened socket in the client role.
    pub fn register_client(&mut self, handle: Arc<ConnectionHandle>) {
        let id = handle.id.clone();
        let _ = self.connections.insert(
            id,
            Entry {
                handle,
                role: Role::Client,
                bound_session: None,
            },
        );
    }

    /// Upgrade a socket to the controller role.
    ///
    /// Idempotent for controllers; rejected for a client that already holds
    /// a session binding.
    pub fn register_controller(&mut self, id: &ConnectionId) -> Result<(), RelayError> {
        let entry = self
            .connections
            .get_mut(id)
            .ok_or_else(|| RelayError::UnknownConnection(id.clone()))?;
        if let Some(session) = &entry.bound_session {
            return Err(RelayError::ConnectionAlreadyBound(session.clone()));
        }
        entry.role = Role::Controller;
        Ok(())
    }

    /// Check that `conn` may bind `session` without changing anything.
    pub fn check_bind(&self, conn: &ConnectionId, session: &SessionId) -> Result<(), RelayError> {
        let entry = self
            .connections
            .get(conn)
            .ok_or_else(|| RelayError::UnknownConnection(conn.clone()))?;
        if entry.role != Role::Client {
            return Err(RelayError::RoleRequired {
                msg_type: "bind_session",
                required: Role::Client,
            });
        }
        if let Some(existing) = &entry.bound_session {
            return Err(RelayError::ConnectionAlreadyBound(existing.clone()));
        }
        if self.clients_by_session.contains_key(session) {
            return Err(RelayError::AlreadyBound(session.clone()));
        }
        Ok(())
    }

    /// Bind `conn` as the client leg of `session`.
    pub fn bind(&mut self, conn: &ConnectionId, session: &SessionId) -> Result<(), RelayError> {
        self.check_bind(conn, session)?;
        if let Some(entry) = self.connections.get_mut(conn) {
            entry.bound_session = Some(session.clone());
        }
        let _ = self.clients_by_session.insert(session.clone(), conn.clone());
        Ok(())
    }

    /// Snapshot of every controller handle.
    pub fn controllers(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .values()
            .filter(|e| e.role == Role::Controller)
            .map(|e| Arc::clone(&e.handle))
            .collect()
    }

    /// Handle of the client bound to `session`.
    pub fn client_for(&self, session: &SessionId) -> Option<Arc<ConnectionHandle>> {
        let conn = self.clients_by_session.get(session)?;
        self.connections.get(conn).map(|e| Arc::clone(&e.handle))
    }

    /// Handle of any registered connection.
    pub fn get(&self, conn: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(conn).map(|e| Arc::clone(&e.handle))
    }

    /// Role of a registered connection.
    pub fn role_of(&self, conn: &ConnectionId) -> Option<Role> {
        self.connections.get(conn).map(|e| e.role)
    }

    /// Session the connection is bound to.
    pub fn bound_session(&self, conn: &ConnectionId) -> Option<&SessionId> {
        self.connections.get(conn)?.bound_session.as_ref()
    }

    /// Forget a closed socket and any binding it held.
    ///
    /// Session status is untouched; the caller only learns which session
    /// lost its client.
    pub fn unregister(&mut self, conn: &ConnectionId) -> Option<(Role, Option<SessionId>)> {
        let entry = self.connections.remove(conn)?;
        if let Some(session) = &entry.bound_session {
            let _ = self.clients_by_session.remove(session);
        }
        Some((entry.role, entry.bound_session))
    }

    /// Drop the binding for a removed session, returning the client that
    /// held it. The socket itself stays registered.
    pub fn release_session(&mut self, session: &SessionId) -> Option<Arc<ConnectionHandle>> {
        let conn = self.clients_by_session.remove(session)?;
        let entry = self.connections.get_mut(&conn)?;
        entry.bound_session = None;
        Some(Arc::clone(&entry.handle))
    }

    /// Number of registered sockets.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no sockets are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of controller sockets.
    pub fn controller_count(&self) -> usize {
        self.connections
            .values()
            .filter(|e| e.role == Role::Controller)
            .count()
    }

    /// Number of live session bindings.
    pub fn binding_count(&self) -> usize {
        self.clients_by_session.len()
    }
}

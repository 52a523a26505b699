//! Single-writer relay actor.
//!
//! One task owns the [`Relay`]; socket readers, HTTP handlers and the
//! sweeper talk to it through [`RelayHandle`]. Commands are applied one at a
//! time in arrival order, which is what linearizes binds, reports and
//! sweeps.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use relay_core::{
    ConnectionHandle, ConnectionId, Disposition, Relay, RelayStats, Session, SessionId,
    SweepReport,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::{
    RELAY_BROADCAST_DROPS_TOTAL, RELAY_ERRORS_TOTAL, RELAY_FRAMES_TOTAL, RELAY_SESSIONS_ACTIVE,
    RELAY_SESSIONS_SWEPT_TOTAL,
};

/// Work item for the relay actor.
#[derive(Debug)]
pub enum RelayCommand {
    /// A socket opened.
    Open(Arc<ConnectionHandle>),
    /// A text frame arrived on a socket.
    Frame {
        /// Sender.
        conn: ConnectionId,
        /// Raw frame text.
        text: String,
    },
    /// A binary frame arrived on a socket.
    Binary {
        /// Sender.
        conn: ConnectionId,
        /// Raw frame bytes.
        data: Vec<u8>,
    },
    /// A socket closed.
    Close(ConnectionId),
    /// Run one eviction pass.
    Sweep(oneshot::Sender<SweepReport>),
    /// Snapshot one session.
    Session(SessionId, oneshot::Sender<Option<Session>>),
    /// Read counters.
    Stats(oneshot::Sender<RelayStats>),
}

/// Cloneable sender side of the relay actor.
#[derive(Clone, Debug)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    /// Register a new socket. Returns `false` if the actor has stopped.
    pub async fn open(&self, handle: Arc<ConnectionHandle>) -> bool {
        self.tx.send(RelayCommand::Open(handle)).await.is_ok()
    }

    /// Submit an inbound frame. Returns `false` if the actor has stopped.
    pub async fn frame(&self, conn: ConnectionId, text: String) -> bool {
        self.tx.send(RelayCommand::Frame { conn, text }).await.is_ok()
    }

    /// Submit an inbound binary frame. Returns `false` if the actor has stopped.
    pub async fn binary(&self, conn: ConnectionId, data: Vec<u8>) -> bool {
        self.tx.send(RelayCommand::Binary { conn, data }).await.is_ok()
    }

    /// Unregister a socket.
    pub async fn close(&self, conn: ConnectionId) {
        let _ = self.tx.send(RelayCommand::Close(conn)).await;
    }

    /// Run a sweep and wait for its report.
    pub async fn sweep(&self) -> Option<SweepReport> {
        self.request(RelayCommand::Sweep).await
    }

    /// Snapshot of one session; `None` if unknown or the actor has stopped.
    pub async fn session(&self, id: SessionId) -> Option<Session> {
        self.request(|reply| RelayCommand::Session(id, reply))
            .await
            .flatten()
    }

    /// Current counters; `None` if the actor has stopped.
    pub async fn stats(&self) -> Option<RelayStats> {
        self.request(RelayCommand::Stats).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> RelayCommand) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.ok()?;
        rx.await.ok()
    }
}

/// Spawn the actor task that owns `relay`.
///
/// The task exits when `cancel` fires or every [`RelayHandle`] is dropped.
pub fn spawn_relay(
    relay: Relay,
    capacity: usize,
    cancel: CancellationToken,
) -> (RelayHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(relay, rx, cancel));
    (RelayHandle { tx }, task)
}

async fn run(mut relay: Relay, mut rx: mpsc::Receiver<RelayCommand>, cancel: CancellationToken) {
    let mut reported_drops = 0;
    loop {
        let command = tokio::select! {
            () = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        apply(&mut relay, command);

        gauge!(RELAY_SESSIONS_ACTIVE).set(relay.store().len() as f64);
        let dropped = relay.dropped_frames();
        if dropped > reported_drops {
            counter!(RELAY_BROADCAST_DROPS_TOTAL).increment(dropped - reported_drops);
            reported_drops = dropped;
        }
    }
    info!(sessions = relay.store().len(), "relay actor stopped");
}

fn apply(relay: &mut Relay, command: RelayCommand) {
    match command {
        RelayCommand::Open(handle) => relay.open(handle, Utc::now()),
        RelayCommand::Frame { conn, text } => record(relay.handle_frame(&conn, &text, Utc::now())),
        RelayCommand::Binary { conn, data } => record(relay.handle_binary(&conn, &data, Utc::now())),
        RelayCommand::Close(conn) => relay.close(&conn),
        RelayCommand::Sweep(reply) => {
            let report = relay.sweep(Utc::now());
            for (_, reason) in &report.evicted {
                counter!(RELAY_SESSIONS_SWEPT_TOTAL, "reason" => reason.as_str()).increment(1);
            }
            if report.is_empty() {
                debug!("sweep found nothing to evict");
            } else {
                info!(
                    expired = report.expired(),
                    completed = report.completed(),
                    released_bindings = report.released_bindings,
                    "sweep evicted sessions"
                );
            }
            let _ = reply.send(report);
        }
        RelayCommand::Session(id, reply) => {
            let _ = reply.send(relay.session(&id));
        }
        RelayCommand::Stats(reply) => {
            let _ = reply.send(relay.stats());
        }
    }
}

fn record(disposition: Disposition) {
    match disposition {
        Disposition::Handled { msg_type } => {
            counter!(RELAY_FRAMES_TOTAL, "type" => msg_type).increment(1);
        }
        Disposition::Rejected { msg_type, code } => {
            counter!(RELAY_FRAMES_TOTAL, "type" => msg_type.unwrap_or("invalid")).increment(1);
            counter!(RELAY_ERRORS_TOTAL, "code" => code).increment(1);
        }
    }
}

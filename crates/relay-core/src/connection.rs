//! Outbound handle for one live socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::ids::ConnectionId;

/// Send side of a connection's outbound queue.
///
/// The socket writer task owns the receiver. Sends never block: a full or
/// closed queue drops the frame and bumps the drop counter.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection id.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    dropped_messages: AtomicU64,
}

impl ConnectionHandle {
    /// Wrap the sender of a connection's outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue an encoded frame.
    ///
    /// Returns `false` if the queue is full or the writer has gone away.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Whether the writer side has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(ConnectionId::from_raw("conn_1"), tx), rx)
    }

    #[tokio::test]
    async fn send_delivers_in_order() {
        let (conn, mut rx) = make_handle(8);
        for i in 0..3 {
            assert!(conn.send(Arc::new(format!("msg_{i}"))));
        }
        for i in 0..3 {
            assert_eq!(*rx.recv().await.unwrap(), format!("msg_{i}"));
        }
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (conn, _rx) = make_handle(1);
        assert!(conn.send(Arc::new("first".into())));
        assert!(!conn.send(Arc::new("second".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_queue_drops() {
        let (conn, rx) = make_handle(4);
        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.send(Arc::new("late".into())));
        assert_eq!(conn.drop_count(), 1);
    }
}

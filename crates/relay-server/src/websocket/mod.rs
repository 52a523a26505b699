//! WebSocket transport: per-socket session loop and liveness checks.

pub mod heartbeat;
pub mod session;

pub use heartbeat::{HeartbeatResult, Liveness};
pub use session::{SocketLimits, run_ws_session};

//! HTTP and WebSocket front end for the session relay.
//!
//! [`RelayServer`] wires the pieces together:
//!
//! - a single relay actor ([`actor`]) that owns all session and connection
//!   state and applies commands one at a time
//! - one task pair per socket ([`websocket`]) feeding it frames and draining
//!   that socket's outbound queue
//! - the periodic expiry sweeper ([`sweeper`])
//! - `/health`, `/sessions/{id}` and `/metrics` side endpoints

pub mod actor;
pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod sweeper;
pub mod websocket;

pub use actor::RelayHandle;
pub use config::ServerConfig;
pub use server::RelayServer;

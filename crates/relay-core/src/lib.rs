//! # relay-core
//!
//! The in-memory heart of the handshake relay.
//!
//! - [`store::SessionStore`] owns session records and enforces the
//!   `Created → Bound → ResourceLinked → TransactionInFlight → Completed`
//!   state machine.
//! - [`registry::ConnectionRegistry`] owns connection roles and the
//!   session → client-leg binding table.
//! - [`router::Relay`] decodes inbound frames, validates them against both,
//!   and routes outbound frames to the resolved peers.
//! - [`sweep`] holds the eviction policy applied by the periodic sweeper.
//!
//! Nothing in here performs socket I/O. Outbound frames are pushed onto
//! bounded per-connection queues held by [`connection::ConnectionHandle`].

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;
pub mod sweep;

pub use connection::ConnectionHandle;
pub use errors::RelayError;
pub use ids::{ConnectionId, SessionId, WorkId};
pub use messages::{ClientMessage, DecodeError, ServerMessage};
pub use registry::{ConnectionRegistry, Role};
pub use router::{Disposition, Relay, RelayStats};
pub use session::{NewSession, Outcome, Session, SessionStatus};
pub use store::SessionStore;
pub use sweep::{EvictionReason, SweepPolicy, SweepReport};

//! Cognigy Socket - session client for real-time conversations.
//!
//! This crate provides the session lifecycle manager that handles:
//! - Opening a Socket.IO session with query or in-band identity handshake
//! - Buffering messages while disconnected and flushing them on connect
//! - Watchdog-driven reconnection with a bounded retry budget
//! - Demultiplexing backend replies into typed events
//! - Event dispatching via tokio broadcast channels

pub mod buffer;
pub mod engineio;
pub mod envelope;
pub mod events;
pub mod io_transport;
pub mod link;
pub mod manager;
pub mod markup;
pub mod reconnect;
pub mod socketio;
pub mod transport;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use buffer::{MessageBuffer, PendingMessage};
pub use envelope::{demultiplex, ReplyEnvelope};
pub use events::{
    ClientEvent, ConnectionState, EventDispatcher, FinalPing, FinalPingFraming, LifecycleEvent,
    Output,
};
pub use io_transport::SocketIoTransport;
pub use manager::SessionClient;
pub use reconnect::ReconnectPolicy;
pub use transport::{Ack, OpenedSession, Transport, TransportConfig, TransportEvent, TransportSession};

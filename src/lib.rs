//! Throughput measurement over a small binary control/data protocol.
//!
//! A client announces itself on the control channel with a `Hello`, the server answers
//! with the port of a freshly bound data channel, both sides run the negotiated transfer
//! mechanism over that data channel, and the client ends the session with a `Goodbye`.

pub mod client;
pub mod communicator;
pub mod error;
pub mod mechanism;
pub mod messages;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};

/// Default port of the control channel.
pub const CONTROL_PORT: u16 = 4991;

/// First data port handed out by a server.
pub const FIRST_CLIENT_ID: u16 = 5000;

/// Identifier of a session. It is also the port of the session's data channel.
pub type ClientId = u16;

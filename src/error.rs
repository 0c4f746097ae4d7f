use std::{fmt, io, time::Duration};

use thiserror::Error;

use crate::messages::{Mechanism, Protocol, Tag};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("malformed message: expected tag {expected}, found {found}")]
	MalformedMessage { expected: Tag, found: u8 },
	#[error("unknown protocol {0}")]
	UnknownProtocol(u8),
	#[error("unknown transfer mechanism {0}")]
	UnknownMechanism(u8),
	#[error("short read: expected {expected} bytes, got {actual}")]
	ShortRead { expected: usize, actual: usize },
	#[error("short write: expected {expected} bytes, wrote {actual}")]
	ShortWrite { expected: usize, actual: usize },
	#[error("connection closed by peer")]
	ConnectionClosed,
	#[error("transport error: {0}")]
	Transport(#[from] io::Error),
	#[error("timed out after {0:?}")]
	Timeout(Duration),
	#[error("unsupported configuration: {protocol} with {mechanism}")]
	UnsupportedConfiguration { protocol: Protocol, mechanism: Mechanism },
	#[error("handshake failed while {stage}: {source}")]
	HandshakeFailed {
		stage: HandshakeStage,
		#[source]
		source: Box<Error>,
	},
	#[error("assigned data port {0} is out of range")]
	InvalidDataPort(u32),
	#[error("data transfer failed: {0}")]
	Transfer(#[source] Box<Error>),
	#[error("failed to send goodbye: {0}")]
	Goodbye(#[source] Box<Error>),
	#[error("no client ids left")]
	ClientIdsExhausted,
	#[error("message size {requested} exceeds the limit of {limit} bytes")]
	MessageTooLarge { requested: u32, limit: u32 },
	#[error("communicator task failed: {0}")]
	Task(#[from] tokio::task::JoinError),
}

impl Error {
	/// Whether the connection this error came from can no longer carry messages.
	pub fn is_connection_lost(&self) -> bool {
		match self {
			Error::ConnectionClosed | Error::ShortRead { .. } | Error::ShortWrite { .. } => true,
			Error::Transport(e) => matches!(
				e.kind(),
				io::ErrorKind::UnexpectedEof
					| io::ErrorKind::ConnectionReset
					| io::ErrorKind::ConnectionAborted
					| io::ErrorKind::BrokenPipe
					| io::ErrorKind::NotConnected
					| io::ErrorKind::WriteZero
			),
			_ => false,
		}
	}

	pub(crate) fn handshake(stage: HandshakeStage, source: Error) -> Self {
		Error::HandshakeFailed { stage, source: Box::new(source) }
	}
}

/// Point of the client handshake at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
	Connect,
	SendHello,
	ReadResponse,
}

impl fmt::Display for HandshakeStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			HandshakeStage::Connect => f.write_str("connecting to the control channel"),
			HandshakeStage::SendHello => f.write_str("sending hello"),
			HandshakeStage::ReadResponse => f.write_str("reading the hello response"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn connection_lost_classification() {
		assert!(Error::ConnectionClosed.is_connection_lost());
		assert!(Error::ShortRead { expected: 5, actual: 2 }.is_connection_lost());
		assert!(Error::from(io::Error::from(io::ErrorKind::ConnectionReset)).is_connection_lost());
		assert!(!Error::MalformedMessage { expected: Tag::Data, found: 9 }.is_connection_lost());
		assert!(!Error::Timeout(Duration::from_secs(1)).is_connection_lost());
	}

	#[test]
	fn handshake_error_names_its_stage() {
		let error = Error::handshake(HandshakeStage::ReadResponse, Error::ConnectionClosed);
		assert_eq!(error.to_string(), "handshake failed while reading the hello response: connection closed by peer");
	}
}

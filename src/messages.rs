//! Fixed-layout wire messages.
//!
//! Every message starts with a one byte [`Tag`]. Multi-byte integers are big-endian.
//!
//! ```text
//! Hello:       | tag (0) | protocol | mechanism | message_size (4) |   7 bytes
//! Goodbye:     | tag (1) |                                              1 byte
//! Data:        | tag (2) | message_no (4) | payload (message_size)     5 bytes + payload
//! Acknowledge: | tag (3) | message_no (4) |                             5 bytes
//! ```
//!
//! The payload of a [`Data`] message is not length prefixed. Its length is the
//! `message_size` negotiated in the [`Hello`] and has to be supplied by the caller.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

pub const TAG_SIZE: usize = 1;
pub const MESSAGE_NO_SIZE: usize = 4;

pub const HELLO_SIZE: usize = TAG_SIZE + 1 + 1 + 4;
pub const GOODBYE_SIZE: usize = TAG_SIZE;
pub const DATA_HEADER_SIZE: usize = TAG_SIZE + MESSAGE_NO_SIZE;
pub const ACKNOWLEDGE_SIZE: usize = TAG_SIZE + MESSAGE_NO_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
	Hello = 0,
	Goodbye = 1,
	Data = 2,
	Acknowledge = 3,
}

impl TryFrom<u8> for Tag {
	type Error = u8;

	fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
		match value {
			0 => Ok(Tag::Hello),
			1 => Ok(Tag::Goodbye),
			2 => Ok(Tag::Data),
			3 => Ok(Tag::Acknowledge),
			other => Err(other),
		}
	}
}

impl fmt::Display for Tag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Tag::Hello => "Hello",
			Tag::Goodbye => "Goodbye",
			Tag::Data => "Data",
			Tag::Acknowledge => "Acknowledge",
		};
		write!(f, "{}({})", name, *self as u8)
	}
}

/// Transport used for the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Protocol {
	Tcp = 0,
	Udp = 1,
}

impl TryFrom<u8> for Protocol {
	type Error = Error;

	fn try_from(value: u8) -> Result<Self> {
		match value {
			0 => Ok(Protocol::Tcp),
			1 => Ok(Protocol::Udp),
			other => Err(Error::UnknownProtocol(other)),
		}
	}
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Protocol::Tcp => f.write_str("TCP"),
			Protocol::Udp => f.write_str("UDP"),
		}
	}
}

/// How data messages are paced on the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Mechanism {
	/// Pipelined, no per-message acknowledgement.
	Streaming = 0,
	/// Every data message waits for its acknowledgement.
	StopAndGo = 1,
}

impl TryFrom<u8> for Mechanism {
	type Error = Error;

	fn try_from(value: u8) -> Result<Self> {
		match value {
			0 => Ok(Mechanism::Streaming),
			1 => Ok(Mechanism::StopAndGo),
			other => Err(Error::UnknownMechanism(other)),
		}
	}
}

impl fmt::Display for Mechanism {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Mechanism::Streaming => f.write_str("Streaming"),
			Mechanism::StopAndGo => f.write_str("StopAndGo"),
		}
	}
}

fn check_tag(buffer: &[u8], expected: Tag) -> Result<()> {
	let found = buffer[0];
	if found != expected as u8 {
		return Err(Error::MalformedMessage { expected, found });
	}
	Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
	u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Client -> Server; control channel.
/// Opens a session and negotiates the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
	pub protocol: Protocol,
	pub mechanism: Mechanism,
	/// Payload length of every following data message.
	pub message_size: u32,
}

impl Hello {
	pub const SIZE: usize = HELLO_SIZE;

	pub fn encode(&self) -> [u8; HELLO_SIZE] {
		let mut buffer = [0u8; HELLO_SIZE];
		buffer[0] = Tag::Hello as u8;
		buffer[1] = self.protocol as u8;
		buffer[2] = self.mechanism as u8;
		buffer[3..7].copy_from_slice(&self.message_size.to_be_bytes());
		buffer
	}

	pub fn decode(buffer: &[u8; HELLO_SIZE]) -> Result<Self> {
		check_tag(buffer, Tag::Hello)?;
		Ok(Hello {
			protocol: Protocol::try_from(buffer[1])?,
			mechanism: Mechanism::try_from(buffer[2])?,
			message_size: read_u32(&buffer[3..7]),
		})
	}
}

/// Client -> Server; control channel.
/// The client considers its transfer finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Goodbye;

impl Goodbye {
	pub const SIZE: usize = GOODBYE_SIZE;

	pub fn encode(&self) -> [u8; GOODBYE_SIZE] {
		[Tag::Goodbye as u8]
	}

	pub fn decode(buffer: &[u8; GOODBYE_SIZE]) -> Result<Self> {
		check_tag(buffer, Tag::Goodbye)?;
		Ok(Goodbye)
	}
}

/// Either direction; data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
	pub message_no: u32,
	pub payload: Vec<u8>,
}

impl Data {
	pub const HEADER_SIZE: usize = DATA_HEADER_SIZE;

	/// A message carrying `message_size` zero bytes.
	pub fn zeroed(message_no: u32, message_size: usize) -> Self {
		Data { message_no, payload: vec![0; message_size] }
	}

	/// Encodes the fixed header. The payload is sent as a separate region.
	pub fn encode_header(&self) -> [u8; DATA_HEADER_SIZE] {
		Self::header(self.message_no)
	}

	/// Header of the data message numbered `message_no`.
	pub fn header(message_no: u32) -> [u8; DATA_HEADER_SIZE] {
		let mut buffer = [0u8; DATA_HEADER_SIZE];
		buffer[0] = Tag::Data as u8;
		buffer[1..5].copy_from_slice(&message_no.to_be_bytes());
		buffer
	}

	/// Decodes only the header and returns the message number.
	pub fn decode_header(buffer: &[u8; DATA_HEADER_SIZE]) -> Result<u32> {
		check_tag(buffer, Tag::Data)?;
		Ok(read_u32(&buffer[1..5]))
	}

	/// Reassembles a message from its header and the separately read payload.
	pub fn decode(header: &[u8; DATA_HEADER_SIZE], payload: Vec<u8>) -> Result<Self> {
		let message_no = Self::decode_header(header)?;
		Ok(Data { message_no, payload })
	}

	/// Bytes this message occupies on the wire.
	pub fn wire_len(&self) -> usize {
		DATA_HEADER_SIZE + self.payload.len()
	}
}

/// Server -> Client.
///
/// On the data channel `message_no` echoes the data message being confirmed. As the
/// answer to a [`Hello`] the same field carries the port of the assigned data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledge {
	pub message_no: u32,
}

impl Acknowledge {
	pub const SIZE: usize = ACKNOWLEDGE_SIZE;

	pub fn encode(&self) -> [u8; ACKNOWLEDGE_SIZE] {
		let mut buffer = [0u8; ACKNOWLEDGE_SIZE];
		buffer[0] = Tag::Acknowledge as u8;
		buffer[1..5].copy_from_slice(&self.message_no.to_be_bytes());
		buffer
	}

	pub fn decode(buffer: &[u8; ACKNOWLEDGE_SIZE]) -> Result<Self> {
		check_tag(buffer, Tag::Acknowledge)?;
		Ok(Acknowledge { message_no: read_u32(&buffer[1..5]) })
	}
}

//! Transfer mechanisms driving a data channel, and the registry choosing one for a
//! (protocol, mechanism) pair.
//!
//! Both sides tolerate a failed message: it is logged, the iteration is abandoned and the
//! next message is tried. Only an error meaning the connection is gone ends the loop early.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::communicator::StopSignal;
use crate::error::{Error, Result};
use crate::messages::{Acknowledge, Mechanism, Protocol, DATA_HEADER_SIZE};
use crate::stats::{ClientStats, ServerStats};
use crate::transport::{read_acknowledge_within, read_data, with_timeout, write_data, write_frame};

/// Parameters negotiated by a `Hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
	pub protocol: Protocol,
	pub mechanism: Mechanism,
	pub message_size: u32,
	/// Applied to every write on the data channel and to the wait for the next incoming
	/// frame. A frame that has started is always read to the end.
	pub io_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
	TcpStopAndGo,
	TcpStreaming,
}

const REGISTRY: &[((Protocol, Mechanism), Transfer)] = &[
	((Protocol::Tcp, Mechanism::StopAndGo), Transfer::TcpStopAndGo),
	((Protocol::Tcp, Mechanism::Streaming), Transfer::TcpStreaming),
];

impl Transfer {
	/// Looks up the implementation for a requested configuration.
	pub fn select(protocol: Protocol, mechanism: Mechanism) -> Result<Self> {
		REGISTRY
			.iter()
			.find(|(key, _)| *key == (protocol, mechanism))
			.map(|(_, transfer)| *transfer)
			.ok_or(Error::UnsupportedConfiguration { protocol, mechanism })
	}

	pub fn protocol(&self) -> Protocol {
		match self {
			Transfer::TcpStopAndGo | Transfer::TcpStreaming => Protocol::Tcp,
		}
	}

	pub fn mechanism(&self) -> Mechanism {
		match self {
			Transfer::TcpStopAndGo => Mechanism::StopAndGo,
			Transfer::TcpStreaming => Mechanism::Streaming,
		}
	}

	/// Server side. Reads data messages until the peer closes the connection or `stop`
	/// fires, recording every complete message in `stats`.
	pub async fn serve<S>(
		&self,
		stream: &mut S,
		settings: &TransferSettings,
		stats: &mut ServerStats,
		stop: &mut StopSignal,
	) -> Result<()>
	where
		S: AsyncRead + AsyncWrite + Unpin,
	{
		let mut payload = vec![0u8; settings.message_size as usize];
		match self {
			Transfer::TcpStopAndGo => serve_stop_and_go(stream, &mut payload, settings.io_timeout, stats, stop).await,
			Transfer::TcpStreaming => serve_streaming(stream, &mut payload, settings.io_timeout, stats, stop).await,
		}
	}

	/// Client side. Sends `message_count` data messages of `settings.message_size` bytes.
	pub async fn drive<S>(
		&self,
		stream: &mut S,
		settings: &TransferSettings,
		message_count: u32,
		stats: &mut ClientStats,
	) -> Result<()>
	where
		S: AsyncRead + AsyncWrite + Unpin,
	{
		let payload = vec![0u8; settings.message_size as usize];
		match self {
			Transfer::TcpStopAndGo => drive_stop_and_go(stream, &payload, message_count, settings.io_timeout, stats).await,
			Transfer::TcpStreaming => drive_streaming(stream, &payload, message_count, settings.io_timeout, stats).await,
		}
	}
}

async fn serve_stop_and_go<S>(
	stream: &mut S,
	payload: &mut [u8],
	io_timeout: Option<Duration>,
	stats: &mut ServerStats,
	stop: &mut StopSignal,
) -> Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	loop {
		let read = tokio::select! {
			_ = stop.stopped() => {
				log::debug!("Stop requested, leaving stop-and-go loop");
				return Ok(());
			}
			read = read_data(stream, payload, io_timeout) => read,
		};

		let message_no = match read {
			Ok(message_no) => message_no,
			Err(Error::ConnectionClosed) => {
				log::debug!("Data channel closed by peer");
				return Ok(());
			}
			Err(e) if e.is_connection_lost() => return Err(e),
			Err(e) => {
				log::warn!("Abandoning data message: {}", e);
				continue;
			}
		};
		log::trace!("Read data message {}", message_no);
		stats.record_read(DATA_HEADER_SIZE + payload.len());

		let ack = Acknowledge { message_no };
		match with_timeout(io_timeout, write_frame(stream, &ack.encode())).await {
			Ok(()) => log::trace!("Sent acknowledge for data message {}", message_no),
			Err(e) if e.is_connection_lost() => return Err(e),
			Err(e) => log::warn!("Failed to acknowledge data message {}: {}", message_no, e),
		}
	}
}

async fn serve_streaming<S>(
	stream: &mut S,
	payload: &mut [u8],
	io_timeout: Option<Duration>,
	stats: &mut ServerStats,
	stop: &mut StopSignal,
) -> Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	loop {
		let read = tokio::select! {
			_ = stop.stopped() => {
				log::debug!("Stop requested, leaving streaming loop");
				return Ok(());
			}
			read = read_data(stream, payload, io_timeout) => read,
		};

		match read {
			Ok(message_no) => {
				log::trace!("Read data message {}", message_no);
				stats.record_read(DATA_HEADER_SIZE + payload.len());
			}
			Err(Error::ConnectionClosed) => break,
			Err(e) if e.is_connection_lost() => return Err(e),
			Err(e) => log::warn!("Abandoning data message: {}", e),
		}
	}

	// The peer has finished sending; tell it how much arrived.
	let received = u32::try_from(stats.no_of_read_messages).unwrap_or(u32::MAX);
	log::debug!("Data channel drained after {} messages", received);
	with_timeout(io_timeout, write_frame(stream, &Acknowledge { message_no: received }.encode())).await
}

async fn drive_stop_and_go<S>(
	stream: &mut S,
	payload: &[u8],
	message_count: u32,
	io_timeout: Option<Duration>,
	stats: &mut ClientStats,
) -> Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let mut frame = Vec::with_capacity(DATA_HEADER_SIZE + payload.len());
	stats.mark_start();

	for message_no in 0..message_count {
		match with_timeout(io_timeout, write_data(stream, &mut frame, message_no, payload)).await {
			Ok(sent) => stats.record_sent(sent),
			Err(e) if e.is_connection_lost() => {
				stats.mark_end();
				return Err(e);
			}
			Err(e) => {
				log::warn!("Failed to send data message {}: {}", message_no, e);
				continue;
			}
		}

		match read_acknowledge_within(stream, io_timeout).await {
			Ok(ack) if ack.message_no == message_no => log::trace!("Acknowledge received for {}", message_no),
			Ok(ack) => log::warn!("Expected acknowledge for {}, got {}", message_no, ack.message_no),
			Err(e) if e.is_connection_lost() => {
				stats.mark_end();
				return Err(e);
			}
			Err(e) => log::warn!("No acknowledge for data message {}: {}", message_no, e),
		}
	}

	stats.mark_end();
	Ok(())
}

async fn drive_streaming<S>(
	stream: &mut S,
	payload: &[u8],
	message_count: u32,
	io_timeout: Option<Duration>,
	stats: &mut ClientStats,
) -> Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let mut frame = Vec::with_capacity(DATA_HEADER_SIZE + payload.len());
	stats.mark_start();

	for message_no in 0..message_count {
		match with_timeout(io_timeout, write_data(stream, &mut frame, message_no, payload)).await {
			Ok(sent) => stats.record_sent(sent),
			Err(e) if e.is_connection_lost() => {
				stats.mark_end();
				return Err(e);
			}
			Err(e) => log::warn!("Failed to send data message {}: {}", message_no, e),
		}
	}
	stats.mark_end();

	// Half-close so the server sees the end of the stream, then wait for its tally.
	stream.shutdown().await?;
	match read_acknowledge_within(stream, io_timeout).await {
		Ok(ack) if u64::from(ack.message_no) == stats.no_of_sent_messages => {
			log::debug!("Server received all {} messages", ack.message_no)
		}
		Ok(ack) => log::warn!(
			"Server received {} messages, {} were sent",
			ack.message_no,
			stats.no_of_sent_messages
		),
		Err(e) => log::warn!("No final acknowledge from server: {}", e),
	}
	Ok(())
}

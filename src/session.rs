//! Control channel of one client.
//!
//! ```text
//! AwaitingHello --Hello--> ActiveTransfer --Goodbye or read error--> AwaitingGoodbye --> Closed
//!       |                                                                                ^
//!       +------------------------- decode / transport error ------------------------------+
//! ```

use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::communicator::{Communicator, RunningCommunicator};
use crate::error::{Error, Result};
use crate::mechanism::{Transfer, TransferSettings};
use crate::messages::{Acknowledge, Hello};
use crate::stats::ServerStats;
use crate::transport::{read_goodbye, read_hello, with_timeout, write_frame};
use crate::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	AwaitingHello,
	ActiveTransfer,
	AwaitingGoodbye,
	Closed,
}

/// Server-wide settings every session runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
	/// Address the data channels are bound to.
	pub data_ip: IpAddr,
	/// Limit for single reads and writes. The wait for `Goodbye` spans the whole transfer
	/// and is never limited.
	pub io_timeout: Option<Duration>,
	pub max_message_size: u32,
}

/// Final statistics of a closed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionReport {
	pub client_id: ClientId,
	pub stats: ServerStats,
}

pub struct Session<S> {
	client_id: ClientId,
	control: S,
	settings: SessionSettings,
	state: SessionState,
}

impl<S> Session<S>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	pub fn new(client_id: ClientId, control: S, settings: SessionSettings) -> Self {
		Session { client_id, control, settings, state: SessionState::AwaitingHello }
	}

	pub fn client_id(&self) -> ClientId {
		self.client_id
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	/// Runs the session to completion. A communicator that was started is always stopped
	/// and its statistics logged before this returns.
	pub async fn run(mut self) -> Result<SessionReport> {
		log::info!("Session {} started", self.client_id);

		let result = self.serve().await;
		if let Err(e) = &result {
			log::warn!("Session {} failed: {}", self.client_id, e);
		}

		if let Err(e) = self.control.shutdown().await {
			log::debug!("Session {} control shutdown: {}", self.client_id, e);
		}
		self.state = SessionState::Closed;
		result
	}

	async fn serve(&mut self) -> Result<SessionReport> {
		let running = self.handle_hello().await?;
		self.state = SessionState::ActiveTransfer;

		self.handle_goodbye().await;
		self.state = SessionState::AwaitingGoodbye;

		let stats = self.finish(running).await?;
		Ok(SessionReport { client_id: self.client_id, stats })
	}

	async fn handle_hello(&mut self) -> Result<RunningCommunicator> {
		let hello: Hello = with_timeout(self.settings.io_timeout, read_hello(&mut self.control)).await?;
		log::info!(
			"Session {} hello: {} {} with {} byte messages",
			self.client_id,
			hello.protocol,
			hello.mechanism,
			hello.message_size
		);

		if hello.message_size > self.settings.max_message_size {
			return Err(Error::MessageTooLarge { requested: hello.message_size, limit: self.settings.max_message_size });
		}
		let transfer = Transfer::select(hello.protocol, hello.mechanism)?;

		let settings = TransferSettings {
			protocol: hello.protocol,
			mechanism: hello.mechanism,
			message_size: hello.message_size,
			io_timeout: self.settings.io_timeout,
		};
		let (mut communicator, stop) = Communicator::new(self.client_id, transfer, settings);
		let data_addr = communicator.listen(self.settings.data_ip).await?;
		let running = communicator.spawn(stop);

		// The data port equals the client id unless the id is 0 and the OS picked one.
		let response = Acknowledge { message_no: u32::from(data_addr.port()) };
		if let Err(e) = with_timeout(self.settings.io_timeout, write_frame(&mut self.control, &response.encode())).await {
			self.finish(running).await?;
			return Err(e);
		}
		log::debug!("Session {} assigned data port {}", self.client_id, data_addr.port());
		Ok(running)
	}

	/// Waits for the client to say goodbye. A failed read ends the session just the same.
	async fn handle_goodbye(&mut self) {
		match read_goodbye(&mut self.control).await {
			Ok(_) => log::debug!("Session {} received goodbye", self.client_id),
			Err(e) => log::warn!("Session {} ended without goodbye: {}", self.client_id, e),
		}
	}

	/// Stops the communicator and reports what it read.
	async fn finish(&self, running: RunningCommunicator) -> Result<ServerStats> {
		let communicator = running.stop().await?;
		let stats = communicator.stats();
		log::info!("Session {} finished: {}", self.client_id, stats);
		Ok(stats)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::messages::{Goodbye, Mechanism, Protocol};
	use crate::transport::{read_acknowledge, write_data};
	use std::net::Ipv4Addr;
	use tokio::io::{duplex, DuplexStream};
	use tokio::net::TcpStream;

	fn settings() -> SessionSettings {
		SessionSettings {
			data_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
			io_timeout: Some(Duration::from_secs(5)),
			max_message_size: 65535,
		}
	}

	fn session() -> (DuplexStream, tokio::task::JoinHandle<Result<SessionReport>>) {
		let (client, server) = duplex(256);
		let session = Session::new(0, server, settings());
		assert_eq!(session.state(), SessionState::AwaitingHello);
		(client, tokio::spawn(session.run()))
	}

	#[tokio::test]
	async fn full_stop_and_go_session() {
		let (mut control, session) = session();

		let hello = Hello { protocol: Protocol::Tcp, mechanism: Mechanism::StopAndGo, message_size: 4 };
		write_frame(&mut control, &hello.encode()).await.unwrap();
		let port = read_acknowledge(&mut control).await.unwrap().message_no as u16;

		let mut data = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
		let mut frame = Vec::new();
		for message_no in 0..3 {
			write_data(&mut data, &mut frame, message_no, &[0; 4]).await.unwrap();
			read_acknowledge(&mut data).await.unwrap();
		}
		drop(data);
		write_frame(&mut control, &Goodbye.encode()).await.unwrap();

		let report = session.await.unwrap().unwrap();
		assert_eq!(report.stats.to_string(), "protocol=TCP, mechanism=StopAndGo, read_messages=3, read_bytes=27");
	}

	#[tokio::test]
	async fn unsupported_configuration_gets_no_acknowledge() {
		let (mut control, session) = session();

		let hello = Hello { protocol: Protocol::Udp, mechanism: Mechanism::Streaming, message_size: 4 };
		write_frame(&mut control, &hello.encode()).await.unwrap();

		let result = session.await.unwrap();
		assert!(matches!(result, Err(Error::UnsupportedConfiguration { protocol: Protocol::Udp, mechanism: Mechanism::Streaming })));
		assert!(matches!(read_acknowledge(&mut control).await, Err(Error::ConnectionClosed)));
	}

	#[tokio::test]
	async fn malformed_hello_closes_the_session() {
		let (mut control, session) = session();
		write_frame(&mut control, &[1, 0, 1, 0, 0, 0, 4]).await.unwrap();
		assert!(matches!(session.await.unwrap(), Err(Error::MalformedMessage { found: 1, .. })));
	}

	#[tokio::test]
	async fn oversized_messages_are_refused() {
		let (mut control, session) = session();
		let hello = Hello { protocol: Protocol::Tcp, mechanism: Mechanism::StopAndGo, message_size: 70000 };
		write_frame(&mut control, &hello.encode()).await.unwrap();
		assert!(matches!(session.await.unwrap(), Err(Error::MessageTooLarge { requested: 70000, .. })));
	}

	#[tokio::test]
	async fn lost_control_channel_still_stops_the_communicator() {
		let (mut control, session) = session();
		let hello = Hello { protocol: Protocol::Tcp, mechanism: Mechanism::Streaming, message_size: 16 };
		write_frame(&mut control, &hello.encode()).await.unwrap();
		read_acknowledge(&mut control).await.unwrap();
		drop(control);

		let report = tokio::time::timeout(Duration::from_secs(5), session).await.unwrap().unwrap().unwrap();
		assert_eq!(report.stats.mechanism, Mechanism::Streaming);
		assert_eq!(report.stats.no_of_read_messages, 0);
	}
}

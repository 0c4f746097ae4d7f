//! Client side of a measurement run.
//!
//! The client is strictly sequential: handshake on the control channel, transfer on the
//! assigned data channel, goodbye on the control channel. Its statistics stay readable
//! whatever step failed.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::{Error, HandshakeStage, Result};
use crate::mechanism::{Transfer, TransferSettings};
use crate::messages::{Goodbye, Hello, Mechanism, Protocol};
use crate::server::MAX_MESSAGE_SIZE;
use crate::stats::ClientStats;
use crate::transport::{read_acknowledge, with_timeout, write_frame};
use crate::CONTROL_PORT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	Idle,
	HandshakeSent,
	PortAssigned,
	Transferring,
	Closing,
	Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
	pub host: String,
	pub control_port: u16,
	pub protocol: Protocol,
	pub mechanism: Mechanism,
	pub message_size: u32,
	pub message_count: u32,
	pub io_timeout: Option<Duration>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		ClientConfig {
			host: "localhost".to_string(),
			control_port: CONTROL_PORT,
			protocol: Protocol::Tcp,
			mechanism: Mechanism::StopAndGo,
			message_size: 1024,
			message_count: 1000,
			io_timeout: None,
		}
	}
}

pub struct Client {
	config: ClientConfig,
	state: ClientState,
	data_port: Option<u16>,
	stats: ClientStats,
}

impl Client {
	pub fn new(config: ClientConfig) -> Self {
		Client { config, state: ClientState::Idle, data_port: None, stats: ClientStats::default() }
	}

	pub fn state(&self) -> ClientState {
		self.state
	}

	/// Port assigned by the server, once the handshake got that far.
	pub fn data_port(&self) -> Option<u16> {
		self.data_port
	}

	pub fn stats(&self) -> &ClientStats {
		&self.stats
	}

	pub async fn run(&mut self) -> Result<()> {
		// The payload buffer is allocated up front.
		if self.config.message_size > MAX_MESSAGE_SIZE {
			return Err(Error::MessageTooLarge { requested: self.config.message_size, limit: MAX_MESSAGE_SIZE });
		}

		let timeout = self.config.io_timeout;
		let control_addr = (self.config.host.as_str(), self.config.control_port);

		log::debug!("Connecting to control channel {}:{}", self.config.host, self.config.control_port);
		let mut control = with_timeout(timeout, async { TcpStream::connect(control_addr).await.map_err(Error::from) })
			.await
			.map_err(|e| Error::handshake(HandshakeStage::Connect, e))?;

		let hello = Hello {
			protocol: self.config.protocol,
			mechanism: self.config.mechanism,
			message_size: self.config.message_size,
		};
		with_timeout(timeout, write_frame(&mut control, &hello.encode()))
			.await
			.map_err(|e| Error::handshake(HandshakeStage::SendHello, e))?;
		self.state = ClientState::HandshakeSent;
		log::info!("Hello sent: {} {} with {} byte messages", hello.protocol, hello.mechanism, hello.message_size);

		// The acknowledge of a hello carries the data port rather than a message number.
		let response = with_timeout(timeout, read_acknowledge(&mut control))
			.await
			.map_err(|e| Error::handshake(HandshakeStage::ReadResponse, e))?;
		let data_port = u16::try_from(response.message_no).map_err(|_| {
			Error::handshake(HandshakeStage::ReadResponse, Error::InvalidDataPort(response.message_no))
		})?;
		self.data_port = Some(data_port);
		self.state = ClientState::PortAssigned;
		log::info!("Assigned data port {}", data_port);

		let transferred = self.transfer(data_port).await;
		if let Err(e) = &transferred {
			log::error!("Data transfer failed: {}", e);
		}

		self.state = ClientState::Closing;
		with_timeout(timeout, write_frame(&mut control, &Goodbye.encode()))
			.await
			.map_err(|e| Error::Goodbye(Box::new(e)))?;
		log::debug!("Goodbye sent");
		if let Err(e) = control.shutdown().await {
			log::debug!("Control shutdown: {}", e);
		}
		self.state = ClientState::Done;

		transferred.map_err(|e| Error::Transfer(Box::new(e)))
	}

	async fn transfer(&mut self, data_port: u16) -> Result<()> {
		let transfer = Transfer::select(self.config.protocol, self.config.mechanism)?;
		let settings = TransferSettings {
			protocol: self.config.protocol,
			mechanism: self.config.mechanism,
			message_size: self.config.message_size,
			io_timeout: self.config.io_timeout,
		};

		let data_addr = (self.config.host.as_str(), data_port);
		let mut data =
			with_timeout(settings.io_timeout, async { TcpStream::connect(data_addr).await.map_err(Error::from) }).await?;
		self.state = ClientState::Transferring;

		let result = transfer.drive(&mut data, &settings, self.config.message_count, &mut self.stats).await;
		log::info!("Transfer finished: {}", self.stats.report());
		result
	}
}

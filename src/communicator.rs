//! Server side of a data channel.
//!
//! A communicator binds its own port, accepts exactly one data connection and runs the
//! server half of a transfer mechanism on it. Its statistics are only handed out once the
//! task running it has finished: [`RunningCommunicator::stop`] joins the task and returns
//! the communicator by value.

use std::net::{IpAddr, SocketAddr};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::mechanism::{Transfer, TransferSettings};
use crate::stats::ServerStats;
use crate::transport::with_timeout;
use crate::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicatorState {
	Created,
	Listening,
	Connected,
	Stopped,
}

/// Asks a communicator to stop. Stopping twice is harmless.
#[derive(Debug)]
pub struct StopHandle(watch::Sender<bool>);

/// Receiving side of a [`StopHandle`]. A dropped handle counts as a stop request.
#[derive(Debug)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopHandle {
	pub fn pair() -> (StopHandle, StopSignal) {
		let (sender, receiver) = watch::channel(false);
		(StopHandle(sender), StopSignal(receiver))
	}

	pub fn stop(&self) {
		// Fails only when the communicator is already gone.
		let _ = self.0.send(true);
	}
}

impl StopSignal {
	/// Resolves once a stop has been requested.
	pub async fn stopped(&mut self) {
		loop {
			if *self.0.borrow_and_update() {
				return;
			}
			if self.0.changed().await.is_err() {
				return;
			}
		}
	}
}

pub struct Communicator {
	client_id: ClientId,
	transfer: Transfer,
	settings: TransferSettings,
	listener: Option<TcpListener>,
	state: CommunicatorState,
	stats: ServerStats,
	stop: StopSignal,
}

impl Communicator {
	pub fn new(client_id: ClientId, transfer: Transfer, settings: TransferSettings) -> (Self, StopHandle) {
		let (handle, stop) = StopHandle::pair();
		let communicator = Communicator {
			client_id,
			transfer,
			settings,
			listener: None,
			state: CommunicatorState::Created,
			stats: ServerStats::new(transfer.protocol(), transfer.mechanism()),
			stop,
		};
		(communicator, handle)
	}

	/// Binds the data port, which is the client id.
	pub async fn listen(&mut self, ip: IpAddr) -> Result<SocketAddr> {
		let listener = TcpListener::bind(SocketAddr::new(ip, self.client_id)).await?;
		let local_addr = listener.local_addr()?;
		log::debug!("Communicator {} listening on {}", self.client_id, local_addr);
		self.listener = Some(listener);
		self.state = CommunicatorState::Listening;
		Ok(local_addr)
	}

	/// Accepts one data connection and serves it until the peer is done or a stop is
	/// requested. Returns itself in the `Stopped` state.
	pub async fn start(mut self) -> Self {
		let listener = match self.listener.take() {
			Some(listener) => listener,
			None => {
				log::error!("Communicator {} started without a listener", self.client_id);
				self.state = CommunicatorState::Stopped;
				return self;
			}
		};

		let accepted = tokio::select! {
			_ = self.stop.stopped() => None,
			accepted = with_timeout(self.settings.io_timeout, async { listener.accept().await.map_err(Error::from) }) => Some(accepted),
		};
		drop(listener);

		match accepted {
			None => log::debug!("Communicator {} stopped before a data connection arrived", self.client_id),
			Some(Err(e)) => log::warn!("Communicator {} failed to accept a data connection: {}", self.client_id, e),
			Some(Ok((mut stream, peer))) => {
				self.state = CommunicatorState::Connected;
				log::info!(
					"Communicator {} connected to {} ({} {}, {} byte messages)",
					self.client_id,
					peer,
					self.settings.protocol,
					self.settings.mechanism,
					self.settings.message_size
				);
				let transfer = self.transfer;
				match transfer.serve(&mut stream, &self.settings, &mut self.stats, &mut self.stop).await {
					Ok(()) => log::debug!("Communicator {} finished", self.client_id),
					Err(e) => log::warn!("Communicator {} lost its data connection: {}", self.client_id, e),
				}
			}
		}

		self.state = CommunicatorState::Stopped;
		self
	}

	/// Runs [`Communicator::start`] on its own task.
	pub fn spawn(self, stop: StopHandle) -> RunningCommunicator {
		RunningCommunicator { stop, task: tokio::spawn(self.start()) }
	}

	pub fn client_id(&self) -> ClientId {
		self.client_id
	}

	pub fn state(&self) -> CommunicatorState {
		self.state
	}

	pub fn stats(&self) -> ServerStats {
		self.stats
	}
}

/// A communicator running on its own task.
pub struct RunningCommunicator {
	stop: StopHandle,
	task: JoinHandle<Communicator>,
}

impl RunningCommunicator {
	/// Requests a stop and waits for the task to exit.
	pub async fn stop(self) -> Result<Communicator> {
		self.stop.stop();
		Ok(self.task.await?)
	}
}

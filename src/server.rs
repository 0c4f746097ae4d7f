//! Control channel listener.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::session::{Session, SessionReport, SessionSettings};
use crate::{ClientId, CONTROL_PORT, FIRST_CLIENT_ID};

/// Largest payload a client may ask for.
pub const MAX_MESSAGE_SIZE: u32 = 65535;

/// Hands out client ids, and with them data ports, in strictly increasing order.
#[derive(Debug)]
pub struct ClientIds {
	next: AtomicU32,
}

impl ClientIds {
	pub fn starting_at(first: ClientId) -> Self {
		ClientIds { next: AtomicU32::new(u32::from(first)) }
	}

	pub fn next(&self) -> Result<ClientId> {
		let id = self.next.fetch_add(1, Ordering::Relaxed);
		ClientId::try_from(id).map_err(|_| Error::ClientIdsExhausted)
	}
}

impl Default for ClientIds {
	fn default() -> Self {
		Self::starting_at(FIRST_CLIENT_ID)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
	pub control_addr: SocketAddr,
	pub data_ip: IpAddr,
	pub first_client_id: ClientId,
	pub io_timeout: Option<Duration>,
	pub max_message_size: u32,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			control_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), CONTROL_PORT),
			data_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
			first_client_id: FIRST_CLIENT_ID,
			io_timeout: None,
			max_message_size: MAX_MESSAGE_SIZE,
		}
	}
}

pub struct Server {
	listener: TcpListener,
	client_ids: Arc<ClientIds>,
	session_settings: SessionSettings,
	reports: Option<mpsc::UnboundedSender<SessionReport>>,
}

impl Server {
	pub async fn bind(config: ServerConfig) -> Result<Self> {
		let listener = TcpListener::bind(config.control_addr).await?;
		log::info!("Listening on control channel {}", listener.local_addr()?);
		Ok(Server {
			listener,
			client_ids: Arc::new(ClientIds::starting_at(config.first_client_id)),
			session_settings: SessionSettings {
				data_ip: config.data_ip,
				io_timeout: config.io_timeout,
				max_message_size: config.max_message_size,
			},
			reports: None,
		})
	}

	/// Replaces the client id counter.
	pub fn with_client_ids(mut self, client_ids: Arc<ClientIds>) -> Self {
		self.client_ids = client_ids;
		self
	}

	/// Every successfully closed session sends its report here.
	pub fn with_reports(mut self, reports: mpsc::UnboundedSender<SessionReport>) -> Self {
		self.reports = Some(reports);
		self
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	/// Accepts control connections forever, one session task per connection.
	pub async fn run(self) -> Result<()> {
		loop {
			let (control, peer) = match self.listener.accept().await {
				Ok(accepted) => accepted,
				Err(e) => {
					log::error!("Failed to accept control connection: {}", e);
					continue;
				}
			};

			let client_id = match self.client_ids.next() {
				Ok(client_id) => client_id,
				Err(e) => {
					log::error!("Refusing control connection from {}: {}", peer, e);
					continue;
				}
			};
			log::info!("Client {} connected from {}", client_id, peer);

			let session = Session::new(client_id, control, self.session_settings);
			let reports = self.reports.clone();
			tokio::spawn(async move {
				if let Ok(report) = session.run().await {
					if let Some(reports) = reports {
						let _ = reports.send(report);
					}
				}
			});
		}
	}
}

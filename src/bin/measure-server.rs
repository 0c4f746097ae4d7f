//! Accepts measurement clients on the control channel and serves their data channels

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use measure_transfer::server::{Server, ServerConfig, MAX_MESSAGE_SIZE};
use measure_transfer::{CONTROL_PORT, FIRST_CLIENT_ID};
use tokio::sync::mpsc;

#[derive(clap::Parser, Debug, Clone)]
struct Cli {
	/// Address of the control channel, e.g. `0.0.0.0:4991`.
	#[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], CONTROL_PORT)))]
	control_addr: SocketAddr,
	/// Address the data channels are bound to.
	#[arg(long, default_value = "0.0.0.0")]
	data_ip: IpAddr,
	/// Data port of the first client. Every further client gets the next port.
	#[arg(long, default_value_t = FIRST_CLIENT_ID)]
	first_port: u16,
	/// Largest message size a client may request.
	#[arg(long, default_value_t = MAX_MESSAGE_SIZE)]
	max_message_size: u32,
	/// Give up on a single read or write after this many milliseconds.
	#[arg(long)]
	timeout_ms: Option<u64>,
	/// Print a JSON line per finished session on stdout.
	#[arg(long)]
	json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::init();
	let cli_args = Cli::parse();

	let config = ServerConfig {
		control_addr: cli_args.control_addr,
		data_ip: cli_args.data_ip,
		first_client_id: cli_args.first_port,
		io_timeout: cli_args.timeout_ms.map(Duration::from_millis),
		max_message_size: cli_args.max_message_size,
	};
	let server = Server::bind(config).await.context(format!("Listening on control channel {}", cli_args.control_addr))?;

	let (send_reports, mut recv_reports) = mpsc::unbounded_channel();
	let server = server.with_reports(send_reports);

	let json = cli_args.json;
	tokio::spawn(async move {
		while let Some(report) = recv_reports.recv().await {
			if json {
				match serde_json::to_string(&report) {
					Ok(line) => println!("{}", line),
					Err(e) => log::error!("Serializing report of session {}: {}", report.client_id, e),
				}
			} else {
				println!("session {}: {}", report.client_id, report.stats);
			}
		}
	});

	server.run().await.context("Accepting clients")
}

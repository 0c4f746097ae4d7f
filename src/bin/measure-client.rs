//! Measures the transfer time of a number of messages to a measure-server

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use measure_transfer::client::{Client, ClientConfig};
use measure_transfer::error::{Error, HandshakeStage};
use measure_transfer::messages::{Mechanism, Protocol};
use measure_transfer::CONTROL_PORT;

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum ProtocolArg {
	Tcp,
	Udp,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum MechanismArg {
	StopAndGo,
	Streaming,
}

#[derive(clap::Parser, Debug, Clone)]
struct Cli {
	/// Host running the measure-server.
	#[arg(default_value = "localhost")]
	host: String,
	/// Port of the server's control channel.
	#[arg(long, default_value_t = CONTROL_PORT)]
	port: u16,
	#[arg(long, value_enum, default_value = "tcp")]
	protocol: ProtocolArg,
	#[arg(long, value_enum, default_value = "stop-and-go")]
	mechanism: MechanismArg,
	/// Payload bytes per data message.
	#[arg(long, default_value_t = 1024)]
	message_size: u32,
	/// Number of data messages to send.
	#[arg(long, default_value_t = 1000)]
	message_count: u32,
	/// Give up on a single read or write after this many milliseconds.
	#[arg(long)]
	timeout_ms: Option<u64>,
	/// Print the statistics as JSON.
	#[arg(long)]
	json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::init();
	let cli_args = Cli::parse();

	let config = ClientConfig {
		host: cli_args.host.clone(),
		control_port: cli_args.port,
		protocol: match cli_args.protocol {
			ProtocolArg::Tcp => Protocol::Tcp,
			ProtocolArg::Udp => Protocol::Udp,
		},
		mechanism: match cli_args.mechanism {
			MechanismArg::StopAndGo => Mechanism::StopAndGo,
			MechanismArg::Streaming => Mechanism::Streaming,
		},
		message_size: cli_args.message_size,
		message_count: cli_args.message_count,
		io_timeout: cli_args.timeout_ms.map(Duration::from_millis),
	};

	let mut client = Client::new(config);
	let result = client.run().await;

	// Whatever was accumulated is printed, even after a failure.
	let report = client.stats().report();
	if cli_args.json {
		println!("{}", serde_json::to_string(&report).context("Serializing statistics")?);
	} else {
		println!("Elapsed time: {:.3} ms", report.elapsed_ms);
		println!("# sent messages: {}", report.sent_messages);
		println!("# sent bytes: {}", report.sent_bytes);
		println!("Throughput: {:.0} B/s", report.bytes_per_second);
	}

	result.map_err(|e| {
		let step = match &e {
			Error::HandshakeFailed { stage: HandshakeStage::Connect, .. } => "Connecting to server",
			Error::HandshakeFailed { stage: HandshakeStage::SendHello, .. } => "Sending hello",
			Error::HandshakeFailed { stage: HandshakeStage::ReadResponse, .. } => "Receiving hello response",
			Error::Transfer(_) => "Transferring data",
			Error::Goodbye(_) => "Sending goodbye",
			Error::MessageTooLarge { .. } => "Checking message size",
			_ => "Measuring",
		};
		anyhow::Error::new(e).context(format!("{} ({}:{})", step, cli_args.host, cli_args.port))
	})
}

//! End-to-end runs of a real server and real clients on loopback.
//!
//! Each test uses its own range of data ports so the tests can run in parallel.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use measure_transfer::client::{Client, ClientConfig, ClientState};
use measure_transfer::error::{Error, HandshakeStage};
use measure_transfer::messages::{Acknowledge, Goodbye, Hello, Mechanism, Protocol};
use measure_transfer::server::{Server, ServerConfig};
use measure_transfer::session::SessionReport;
use measure_transfer::transport::{read_acknowledge, write_data, write_frame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const LIMIT: Duration = Duration::from_secs(10);

/// Starts a server on an OS-chosen control port whose first data port is `first_port`.
async fn start_server(first_port: u16) -> (SocketAddr, mpsc::UnboundedReceiver<SessionReport>) {
	let config = ServerConfig {
		control_addr: "127.0.0.1:0".parse().unwrap(),
		data_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
		first_client_id: first_port,
		io_timeout: Some(Duration::from_secs(5)),
		..ServerConfig::default()
	};
	let (send_reports, recv_reports) = mpsc::unbounded_channel();
	let server = Server::bind(config).await.expect("bind server").with_reports(send_reports);
	let addr = server.local_addr().unwrap();
	tokio::spawn(server.run());
	(addr, recv_reports)
}

fn client_config(control: SocketAddr, mechanism: Mechanism, message_size: u32, message_count: u32) -> ClientConfig {
	ClientConfig {
		host: "127.0.0.1".to_string(),
		control_port: control.port(),
		protocol: Protocol::Tcp,
		mechanism,
		message_size,
		message_count,
		io_timeout: Some(Duration::from_secs(5)),
	}
}

async fn next_report(reports: &mut mpsc::UnboundedReceiver<SessionReport>) -> SessionReport {
	tokio::time::timeout(LIMIT, reports.recv())
		.await
		.expect("session report timed out")
		.expect("report channel closed")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Hello{TCP, StopAndGo, 4}, three data messages, Goodbye.
#[tokio::test]
async fn stop_and_go_session_reports_matching_stats() {
	let (control, mut reports) = start_server(47100).await;

	let mut client = Client::new(client_config(control, Mechanism::StopAndGo, 4, 3));
	tokio::time::timeout(LIMIT, client.run()).await.expect("client timed out").expect("client failed");

	assert_eq!(client.state(), ClientState::Done);
	assert_eq!(client.data_port(), Some(47100));
	assert_eq!(client.stats().no_of_sent_messages, 3);
	assert_eq!(client.stats().no_of_sent_bytes, 27);
	assert!(client.stats().end_time >= client.stats().start_time);

	let report = next_report(&mut reports).await;
	assert_eq!(report.client_id, 47100);
	assert_eq!(report.stats.no_of_read_messages, 3);
	assert_eq!(report.stats.no_of_read_bytes, 3 * (5 + 4));
	assert_eq!(report.stats.to_string(), "protocol=TCP, mechanism=StopAndGo, read_messages=3, read_bytes=27");
}

#[tokio::test]
async fn streaming_session_counts_every_message() {
	let (control, mut reports) = start_server(47200).await;

	let mut client = Client::new(client_config(control, Mechanism::Streaming, 512, 500));
	tokio::time::timeout(LIMIT, client.run()).await.expect("client timed out").expect("client failed");
	assert_eq!(client.stats().no_of_sent_messages, 500);

	let report = next_report(&mut reports).await;
	assert_eq!(report.stats.mechanism, Mechanism::Streaming);
	assert_eq!(report.stats.no_of_read_messages, 500);
	assert_eq!(report.stats.no_of_read_bytes, 500 * (5 + 512));
}

/// The server never acknowledges an unsupported configuration; the client sees the
/// control channel close while waiting for its port.
#[tokio::test]
async fn unsupported_configuration_fails_the_handshake() {
	let (control, mut reports) = start_server(47300).await;

	let config = ClientConfig { protocol: Protocol::Udp, ..client_config(control, Mechanism::Streaming, 4, 3) };
	let mut client = Client::new(config);
	let error = tokio::time::timeout(LIMIT, client.run()).await.expect("client timed out").unwrap_err();

	match error {
		Error::HandshakeFailed { stage: HandshakeStage::ReadResponse, source } => {
			assert!(matches!(*source, Error::ConnectionClosed | Error::ShortRead { .. } | Error::Transport(_)));
		}
		other => panic!("unexpected error: {}", other),
	}
	assert_eq!(client.data_port(), None);
	assert_eq!(client.stats().no_of_sent_messages, 0);
	assert!(tokio::time::timeout(Duration::from_millis(200), reports.recv()).await.is_err());
}

/// Sequential clients are assigned consecutive data ports.
#[tokio::test]
async fn sequential_clients_get_consecutive_ports() {
	let (control, _reports) = start_server(47400).await;

	for expected in 47400..47403 {
		let mut client = Client::new(client_config(control, Mechanism::StopAndGo, 8, 2));
		tokio::time::timeout(LIMIT, client.run()).await.expect("client timed out").expect("client failed");
		assert_eq!(client.data_port(), Some(expected));
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_get_distinct_ports() {
	let (control, mut reports) = start_server(47500).await;

	let clients: Vec<_> = (0..6)
		.map(|_| {
			tokio::spawn(async move {
				let mut client = Client::new(client_config(control, Mechanism::StopAndGo, 64, 20));
				client.run().await.expect("client failed");
				client.data_port().unwrap()
			})
		})
		.collect();

	let mut ports = HashSet::new();
	for client in clients {
		let port = tokio::time::timeout(LIMIT, client).await.expect("client timed out").unwrap();
		assert!(ports.insert(port));
	}
	assert_eq!(ports, (47500..47506).collect::<HashSet<u16>>());

	for _ in 0..6 {
		let report = next_report(&mut reports).await;
		assert_eq!(report.stats.no_of_read_messages, 20);
	}
}

/// Drives the protocol byte by byte, without the client module.
#[tokio::test]
async fn raw_protocol_exchange() {
	let (control_addr, mut reports) = start_server(47600).await;
	let mut control = TcpStream::connect(control_addr).await.unwrap();

	let hello = Hello { protocol: Protocol::Tcp, mechanism: Mechanism::StopAndGo, message_size: 4 };
	write_frame(&mut control, &hello.encode()).await.unwrap();
	let response = read_acknowledge(&mut control).await.unwrap();
	assert_eq!(response, Acknowledge { message_no: 47600 });

	let mut data = TcpStream::connect((Ipv4Addr::LOCALHOST, 47600)).await.unwrap();
	let mut frame = Vec::new();
	for message_no in 0..3 {
		write_data(&mut data, &mut frame, message_no, b"abcd").await.unwrap();
		assert_eq!(read_acknowledge(&mut data).await.unwrap().message_no, message_no);
	}
	drop(data);
	write_frame(&mut control, &Goodbye.encode()).await.unwrap();

	let report = next_report(&mut reports).await;
	assert_eq!(report.stats.no_of_read_bytes, 27);
}

/// A client that vanishes after the handshake still ends its session.
#[tokio::test]
async fn vanished_client_ends_its_session() {
	let (control_addr, mut reports) = start_server(47700).await;
	let mut control = TcpStream::connect(control_addr).await.unwrap();

	let hello = Hello { protocol: Protocol::Tcp, mechanism: Mechanism::StopAndGo, message_size: 4 };
	write_frame(&mut control, &hello.encode()).await.unwrap();
	read_acknowledge(&mut control).await.unwrap();
	drop(control);

	let report = next_report(&mut reports).await;
	assert_eq!(report.client_id, 47700);
	assert_eq!(report.stats.no_of_read_messages, 0);
}

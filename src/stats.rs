use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::messages::{Mechanism, Protocol};

/// What a communicator has read from its data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStats {
	pub protocol: Protocol,
	pub mechanism: Mechanism,
	pub no_of_read_messages: u64,
	pub no_of_read_bytes: u64,
}

impl ServerStats {
	pub fn new(protocol: Protocol, mechanism: Mechanism) -> Self {
		ServerStats { protocol, mechanism, no_of_read_messages: 0, no_of_read_bytes: 0 }
	}

	pub(crate) fn record_read(&mut self, bytes: usize) {
		self.no_of_read_messages += 1;
		self.no_of_read_bytes += bytes as u64;
	}
}

impl fmt::Display for ServerStats {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"protocol={}, mechanism={}, read_messages={}, read_bytes={}",
			self.protocol, self.mechanism, self.no_of_read_messages, self.no_of_read_bytes
		)
	}
}

/// What a client has sent over its data channel, and when.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
	pub start_time: Option<Instant>,
	pub end_time: Option<Instant>,
	pub no_of_sent_messages: u64,
	pub no_of_sent_bytes: u64,
}

impl ClientStats {
	pub(crate) fn record_sent(&mut self, bytes: usize) {
		self.no_of_sent_messages += 1;
		self.no_of_sent_bytes += bytes as u64;
	}

	pub(crate) fn mark_start(&mut self) {
		self.start_time = Some(Instant::now());
	}

	pub(crate) fn mark_end(&mut self) {
		self.end_time = Some(Instant::now());
	}

	/// Duration of the transfer phase. Zero until both timestamps are taken.
	pub fn elapsed(&self) -> Duration {
		match (self.start_time, self.end_time) {
			(Some(start), Some(end)) => end.saturating_duration_since(start),
			_ => Duration::ZERO,
		}
	}

	pub fn report(&self) -> ClientReport {
		let elapsed = self.elapsed();
		let seconds = elapsed.as_secs_f64();
		let bytes_per_second = if seconds > 0.0 { self.no_of_sent_bytes as f64 / seconds } else { 0.0 };
		ClientReport {
			elapsed_ms: elapsed.as_secs_f64() * 1000.0,
			sent_messages: self.no_of_sent_messages,
			sent_bytes: self.no_of_sent_bytes,
			bytes_per_second,
		}
	}
}

/// Serializable summary of a client run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClientReport {
	pub elapsed_ms: f64,
	pub sent_messages: u64,
	pub sent_bytes: u64,
	pub bytes_per_second: f64,
}

impl fmt::Display for ClientReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"elapsed={:.3}ms, sent_messages={}, sent_bytes={}, throughput={:.0}B/s",
			self.elapsed_ms, self.sent_messages, self.sent_bytes, self.bytes_per_second
		)
	}
}

//! Reading and writing whole frames on a byte stream.
//!
//! Reads accumulate until the expected number of bytes has arrived, so a frame split over
//! several TCP segments is still read as one frame. End of stream before the first byte of
//! a frame is [`Error::ConnectionClosed`]; end of stream inside a frame is [`Error::ShortRead`].

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::messages::{
	Acknowledge, Data, Goodbye, Hello, ACKNOWLEDGE_SIZE, DATA_HEADER_SIZE, GOODBYE_SIZE, HELLO_SIZE,
};

/// Runs `operation`, giving up after `limit`. Without a limit the operation may block forever.
pub async fn with_timeout<T, F>(limit: Option<Duration>, operation: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match limit {
		Some(limit) => tokio::time::timeout(limit, operation).await.map_err(|_| Error::Timeout(limit))?,
		None => operation.await,
	}
}

/// Fills `buffer`. `frame_start` tells whether `buffer` begins a new frame.
async fn read_full<R>(reader: &mut R, buffer: &mut [u8], frame_start: bool) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	fill_from(reader, buffer, 0, frame_start).await
}

/// Fills `buffer[filled..]`, where the first `filled` bytes have already been read.
async fn fill_from<R>(reader: &mut R, buffer: &mut [u8], mut filled: usize, frame_start: bool) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	while filled < buffer.len() {
		let n = reader.read(&mut buffer[filled..]).await?;
		if n == 0 {
			if filled == 0 && frame_start {
				return Err(Error::ConnectionClosed);
			}
			return Err(Error::ShortRead { expected: buffer.len(), actual: filled });
		}
		filled += n;
	}
	Ok(())
}

pub async fn read_frame<R, const N: usize>(reader: &mut R) -> Result<[u8; N]>
where
	R: AsyncRead + Unpin,
{
	let mut buffer = [0u8; N];
	read_full(reader, &mut buffer, true).await?;
	Ok(buffer)
}

/// Like [`read_frame`], but gives up after `limit` if the frame has not started yet.
///
/// The limit only covers the wait for the first byte. Once a frame has begun it is read to
/// the end, so a timeout never leaves the stream in the middle of a frame.
pub async fn read_frame_within<R, const N: usize>(reader: &mut R, limit: Option<Duration>) -> Result<[u8; N]>
where
	R: AsyncRead + Unpin,
{
	let mut buffer = [0u8; N];
	let n = with_timeout(limit, async { reader.read(&mut buffer).await.map_err(Error::from) }).await?;
	if n == 0 {
		return Err(Error::ConnectionClosed);
	}
	fill_from(reader, &mut buffer, n, true).await?;
	Ok(buffer)
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let mut written = 0;
	while written < frame.len() {
		let n = writer.write(&frame[written..]).await?;
		if n == 0 {
			return Err(Error::ShortWrite { expected: frame.len(), actual: written });
		}
		written += n;
	}
	writer.flush().await?;
	Ok(())
}

pub async fn read_hello<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Hello> {
	Hello::decode(&read_frame::<_, HELLO_SIZE>(reader).await?)
}

pub async fn read_goodbye<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Goodbye> {
	Goodbye::decode(&read_frame::<_, GOODBYE_SIZE>(reader).await?)
}

pub async fn read_acknowledge<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Acknowledge> {
	Acknowledge::decode(&read_frame::<_, ACKNOWLEDGE_SIZE>(reader).await?)
}

pub async fn read_acknowledge_within<R>(reader: &mut R, limit: Option<Duration>) -> Result<Acknowledge>
where
	R: AsyncRead + Unpin,
{
	Acknowledge::decode(&read_frame_within::<_, ACKNOWLEDGE_SIZE>(reader, limit).await?)
}

/// Reads one data message into `payload` and returns its number.
///
/// `payload.len()` is the negotiated message size. `limit` bounds the wait for the message
/// to start (see [`read_frame_within`]). A header with a foreign tag is reported after its
/// payload has been skipped, so the next read starts at the next message.
pub async fn read_data<R>(reader: &mut R, payload: &mut [u8], limit: Option<Duration>) -> Result<u32>
where
	R: AsyncRead + Unpin,
{
	let header = read_frame_within::<_, DATA_HEADER_SIZE>(reader, limit).await?;
	let decoded = Data::decode_header(&header);
	read_full(reader, payload, false).await?;
	decoded
}

/// Writes a data message. `frame` is scratch space reused between calls.
pub async fn write_data<W>(writer: &mut W, frame: &mut Vec<u8>, message_no: u32, payload: &[u8]) -> Result<usize>
where
	W: AsyncWrite + Unpin,
{
	frame.clear();
	frame.extend_from_slice(&Data::header(message_no));
	frame.extend_from_slice(payload);
	write_frame(writer, frame).await?;
	Ok(frame.len())
}

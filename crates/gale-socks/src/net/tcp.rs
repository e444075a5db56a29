use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use gale_core::Metrics;
use snafu::ensure;
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::TcpStream,
};
use tokio_util::{codec::Decoder, sync::CancellationToken};

use crate::{
	EofSnafu, Error, Result,
	net::timed,
	proto::ProtoError,
};

/// A TCP stream owned by one session.
///
/// Wraps the socket with the shared byte counters, an optional per-operation
/// timeout and at most one cancellation token (bound to the session's
/// watchdog so in-flight I/O collapses when the session goes idle). The peer
/// address string is memoized for logging.
#[derive(Debug)]
pub struct TcpConn {
	io:      TcpStream,
	metrics: Arc<Metrics>,
	timeout: Option<Duration>,
	token:   CancellationToken,
	peer:    String,
}

impl TcpConn {
	pub fn new(io: TcpStream, metrics: Arc<Metrics>) -> Self {
		let peer = io
			.peer_addr()
			.map(|ep| ep.to_string())
			.unwrap_or_else(|_| String::from("unknown"));
		Self {
			io,
			metrics,
			timeout: None,
			token: CancellationToken::new(),
			peer,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Binds every following operation to `token`. A cancelled token makes
	/// pending and future I/O return [`Error::Cancelled`].
	pub fn bind_token(&mut self, token: CancellationToken) {
		self.token = token;
	}

	pub fn peer(&self) -> &str {
		&self.peer
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.io.local_addr()?)
	}

	pub fn peer_addr(&self) -> Result<SocketAddr> {
		Ok(self.io.peer_addr()?)
	}

	/// Reads exactly `buf.len()` bytes.
	pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
		let token = self.token.clone();
		timed(self.timeout, &token, self.io.read_exact(buf)).await?;
		self.metrics.add_recv_bytes(buf.len() as u64);
		Ok(())
	}

	/// Reads whatever is available, at least one byte. EOF surfaces as
	/// [`Error::Eof`].
	pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
		let token = self.token.clone();
		let n = timed(self.timeout, &token, self.io.read(buf)).await?;
		self.metrics.add_recv_bytes(n as u64);
		ensure!(n > 0, EofSnafu);
		Ok(n)
	}

	/// Appends available bytes to `buf` for incremental decoding.
	pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
		let token = self.token.clone();
		let n = timed(self.timeout, &token, self.io.read_buf(buf)).await?;
		self.metrics.add_recv_bytes(n as u64);
		ensure!(n > 0, EofSnafu);
		Ok(n)
	}

	/// Reads one protocol message, feeding `codec` until it yields a frame.
	pub async fn recv_message<C>(&mut self, mut codec: C, buf: &mut BytesMut) -> Result<C::Item>
	where
		C: Decoder<Error = ProtoError>,
	{
		loop {
			if let Some(item) = codec.decode(buf).map_err(Error::from)? {
				return Ok(item);
			}
			self.read_buf(buf).await?;
		}
	}

	/// Writes all of `data`.
	pub async fn send(&mut self, data: &[u8]) -> Result<()> {
		let token = self.token.clone();
		timed(self.timeout, &token, self.io.write_all(data)).await?;
		self.metrics.add_sent_bytes(data.len() as u64);
		Ok(())
	}

	/// Best-effort half-duplex shutdown; errors are swallowed.
	pub async fn stop(&mut self) {
		let _ = self.io.shutdown().await;
	}

	pub fn into_inner(self) -> TcpStream {
		self.io
	}
}

use std::{net::SocketAddr, sync::Arc, time::Duration};

use gale_core::Metrics;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{Result, net::timed};

/// A UDP socket owned by one relay session (the proxy-facing socket or one
/// of the per-target sockets).
///
/// Operations take `&self` so the same connection can serve the session's
/// receive loop and a spawned return task through an `Arc`.
#[derive(Debug)]
pub struct UdpConn {
	io:      UdpSocket,
	metrics: Arc<Metrics>,
	timeout: Option<Duration>,
	token:   CancellationToken,
	local:   String,
}

impl UdpConn {
	pub fn new(io: UdpSocket, metrics: Arc<Metrics>) -> Self {
		let local = io
			.local_addr()
			.map(|ep| ep.to_string())
			.unwrap_or_else(|_| String::from("unknown"));
		Self {
			io,
			metrics,
			timeout: None,
			token: CancellationToken::new(),
			local,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Binds every following operation to `token`.
	pub fn bind_token(&mut self, token: CancellationToken) {
		self.token = token;
	}

	pub fn local(&self) -> &str {
		&self.local
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.io.local_addr()?)
	}

	pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
		let (n, sender) = timed(self.timeout, &self.token, self.io.recv_from(buf)).await?;
		self.metrics.add_recv_bytes(n as u64);
		Ok((n, sender))
	}

	pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize> {
		let n = timed(self.timeout, &self.token, self.io.send_to(data, target)).await?;
		self.metrics.add_sent_bytes(n as u64);
		Ok(n)
	}
}

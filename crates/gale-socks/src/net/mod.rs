use std::{
	future::Future,
	io,
	net::{IpAddr, SocketAddr},
	time::Duration,
};

use gale_core::types::Address;
use snafu::{IntoError, OptionExt, ResultExt};
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket, lookup_host};
use tokio_util::sync::CancellationToken;

use crate::{BindSocketSnafu, CancelledSnafu, DomainResolveSnafu, Error, IoSnafu, Result, TimeoutSnafu};

mod tcp;
mod udp;

pub use tcp::TcpConn;
pub use udp::UdpConn;

/// Resolves as the first of (operation, cancellation, timeout).
pub(crate) async fn timed<T>(
	timeout: Option<Duration>,
	token: &CancellationToken,
	fut: impl Future<Output = io::Result<T>>,
) -> Result<T> {
	let guarded = async {
		tokio::select! {
			_ = token.cancelled() => CancelledSnafu.fail(),
			res = fut => res.context(IoSnafu),
		}
	};
	match timeout {
		Some(timeout) => tokio::time::timeout(timeout, guarded)
			.await
			.map_err(|_| TimeoutSnafu.build())?,
		None => guarded.await,
	}
}

/// DNS lookup for a `Domain` address. An empty answer is an error.
pub async fn resolve(domain: &str, port: u16) -> Result<Vec<SocketAddr>> {
	let endpoints: Vec<SocketAddr> = lookup_host((domain, port))
		.await
		.ok()
		.map(|iter| iter.collect())
		.unwrap_or_default();
	snafu::ensure!(!endpoints.is_empty(), DomainResolveSnafu { domain });
	Ok(endpoints)
}

/// Converts `addr` to one native endpoint, resolving domain names.
pub async fn to_endpoint(addr: &Address) -> Result<SocketAddr> {
	match addr {
		Address::Domain(domain, port) => Ok(resolve(domain, *port).await?[0]),
		_ => addr.to_socket_addr().context(crate::InvalidAddressSnafu),
	}
}

/// Dials the CONNECT target, resolving domains and trying each candidate.
pub(crate) async fn connect_target(addr: &Address, nodelay: bool) -> Result<TcpStream> {
	let stream = match addr {
		Address::Domain(domain, port) => {
			let mut last_err: Option<Error> = None;
			let mut connected = None;
			for ep in resolve(domain, *port).await? {
				match TcpStream::connect(ep).await {
					Ok(stream) => {
						connected = Some(stream);
						break;
					}
					Err(err) => last_err = Some(IoSnafu.into_error(err)),
				}
			}
			match connected {
				Some(stream) => stream,
				None => {
					return Err(last_err.unwrap_or_else(|| {
						DomainResolveSnafu { domain: domain.as_str() }.build()
					}));
				}
			}
		}
		_ => {
			let ep = addr.to_socket_addr().context(crate::InvalidAddressSnafu)?;
			TcpStream::connect(ep).await.context(IoSnafu)?
		}
	};
	if nodelay {
		stream.set_nodelay(true).context(IoSnafu)?;
	}
	Ok(stream)
}

/// Binds a UDP socket on `ip` with an ephemeral port.
pub(crate) fn bind_udp(ip: IpAddr) -> Result<UdpSocket> {
	let socket_addr = SocketAddr::new(ip, 0);
	let build = || -> io::Result<UdpSocket> {
		let socket = Socket::new(Domain::for_address(socket_addr), Type::DGRAM, None)?;
		socket.bind(&socket_addr.into())?;
		socket.set_nonblocking(true)?;
		UdpSocket::from_std(socket.into())
	};
	build().context(BindSocketSnafu { socket_addr })
}

/// Binds a TCP listener with `SO_REUSEADDR` and the given backlog.
pub(crate) fn bind_listener(socket_addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
	let build = || -> io::Result<TcpListener> {
		let socket = Socket::new(Domain::for_address(socket_addr), Type::STREAM, None)?;
		socket.set_reuse_address(true)?;
		socket.bind(&socket_addr.into())?;
		socket.listen(backlog)?;
		socket.set_nonblocking(true)?;
		TcpListener::from_std(socket.into())
	};
	build().context(BindSocketSnafu { socket_addr })
}

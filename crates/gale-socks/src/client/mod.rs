//! Client side of SOCKS5: CONNECT, BIND and UDP ASSOCIATE against an
//! upstream proxy, plus the datagram encode/decode helpers for the
//! associated UDP relay.

use std::{future::Future, net::SocketAddr, time::Duration};

use bytes::BytesMut;
use gale_core::types::Address;
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::{
	InvalidAddressSnafu, Result, TimeoutSnafu,
	net,
	proto::Cmd,
};

mod auth;
mod handshake;
mod udp;

pub use auth::AuthOptions;
pub use udp::{UdpAssociate, recv_from, send_to};

use handshake::{authenticate, recv_reply, reply_endpoint, send_request};

/// Runs `fut` under the caller's whole-operation timeout budget.
pub(crate) async fn within<T>(timeout: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
	match timeout {
		Some(timeout) => tokio::time::timeout(timeout, fut)
			.await
			.map_err(|_| TimeoutSnafu.build())?,
		None => fut.await,
	}
}

fn validate_target(addr: &Address) -> Result<()> {
	if let Address::Domain(domain, _) = addr {
		snafu::ensure!(!domain.is_empty() && domain.len() <= 255, InvalidAddressSnafu);
	}
	Ok(())
}

/// Establishes a TCP connection to `target` through the proxy at `proxy_ep`.
///
/// On success the returned stream is joined to the target; bytes written to
/// it are relayed verbatim.
pub async fn connect(
	proxy_ep: SocketAddr,
	target: Address,
	auth_options: &AuthOptions,
	timeout: Option<Duration>,
) -> Result<TcpStream> {
	validate_target(&target)?;
	within(timeout, async {
		let mut stream = TcpStream::connect(proxy_ep).await?;
		let mut buf = BytesMut::new();
		authenticate(&mut stream, auth_options, &mut buf).await?;
		send_request(&mut stream, Cmd::Connect, target).await?;
		recv_reply(&mut stream, &mut buf).await?;
		Ok(stream)
	})
	.await
}

/// First half of the two-reply BIND flow: authenticates, announces the
/// expected inbound endpoint and returns the proxy-side endpoint that will
/// accept the inbound connection, together with the control stream.
pub async fn first_bind_step(
	proxy_ep: SocketAddr,
	inbound_ep: SocketAddr,
	auth_options: &AuthOptions,
	timeout: Option<Duration>,
) -> Result<(TcpStream, SocketAddr)> {
	within(timeout, async {
		let mut stream = TcpStream::connect(proxy_ep).await?;
		let mut buf = BytesMut::new();
		authenticate(&mut stream, auth_options, &mut buf).await?;
		send_request(&mut stream, Cmd::Bind, Address::from(inbound_ep)).await?;
		let reply = recv_reply(&mut stream, &mut buf).await?;
		// An all-zero BND_ADDR means "same IP as the proxy, port from the
		// reply". Domains resolve; each ATYP is handled on its own.
		let bind_ep = if reply.addr.is_ip() && reply.addr.is_unspecified() {
			SocketAddr::new(stream.peer_addr()?.ip(), reply.addr.port())
		} else {
			reply_endpoint(&reply).await?
		};
		debug!(%bind_ep, "first BIND reply processed");
		Ok((stream, bind_ep))
	})
	.await
}

/// Second half of the BIND flow: awaits the reply announcing the accepted
/// peer and returns its endpoint.
pub async fn second_bind_step(stream: &mut TcpStream, timeout: Option<Duration>) -> Result<SocketAddr> {
	within(timeout, async {
		let mut buf = BytesMut::new();
		let reply = recv_reply(stream, &mut buf).await?;
		reply_endpoint(&reply).await
	})
	.await
}

/// Sets up a UDP association. The returned control stream must stay open
/// for the association's lifetime.
pub async fn udp_associate(
	proxy_ep: SocketAddr,
	auth_options: &AuthOptions,
	timeout: Option<Duration>,
) -> Result<UdpAssociate> {
	within(timeout, async {
		let mut stream = TcpStream::connect(proxy_ep).await?;
		let mut buf = BytesMut::new();
		authenticate(&mut stream, auth_options, &mut buf).await?;
		let local_ip: std::net::IpAddr = if proxy_ep.is_ipv4() {
			std::net::Ipv4Addr::UNSPECIFIED.into()
		} else {
			std::net::Ipv6Addr::UNSPECIFIED.into()
		};
		let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
		let local_ep = socket.local_addr()?;
		send_request(&mut stream, Cmd::UdpAssociate, Address::from(local_ep)).await?;
		let reply = recv_reply(&mut stream, &mut buf).await?;
		let proxy_udp_ep = reply_endpoint(&reply).await?;
		debug!(%proxy_udp_ep, "UDP association established");
		Ok(UdpAssociate {
			control: stream,
			socket,
			proxy_ep: proxy_udp_ep,
		})
	})
	.await
}

/// Converts `addr` to a native endpoint the way reply processing does;
/// exposed for callers that need to dial a domain-form address themselves.
pub async fn resolve_address(addr: &Address) -> Result<SocketAddr> {
	validate_target(addr)?;
	net::to_endpoint(addr).await
}

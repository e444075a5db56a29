use std::{net::SocketAddr, time::Duration};

use bytes::BytesMut;
use gale_core::types::Address;
use snafu::ensure;
use tokio::net::{TcpStream, UdpSocket};

use crate::{
	DatagramTooLargeSnafu, InvalidAddressSnafu, InvalidDatagramSnafu, Result,
	client::within,
	proto::{Datagram, max_payload_len},
};

/// A live UDP association.
///
/// The proxy keeps the association open only while `control` stays
/// connected, so the caller must hold on to all three fields together.
#[derive(Debug)]
pub struct UdpAssociate {
	/// Control TCP connection to the proxy.
	pub control:  TcpStream,
	/// Local socket to exchange SOCKS5-framed datagrams through.
	pub socket:   UdpSocket,
	/// The proxy's UDP endpoint announced in the reply.
	pub proxy_ep: SocketAddr,
}

/// Sends `payload` to `target` through the proxy's UDP relay, wrapping it
/// in a SOCKS5 UDP header. Returns the bytes handed to the socket.
pub async fn send_to(
	socket: &UdpSocket,
	proxy_ep: SocketAddr,
	target: &Address,
	payload: &[u8],
	timeout: Option<Duration>,
) -> Result<usize> {
	if let Address::Domain(domain, _) = target {
		ensure!(!domain.is_empty(), InvalidAddressSnafu);
	}
	ensure!(payload.len() <= max_payload_len(target), DatagramTooLargeSnafu);
	within(timeout, async {
		let mut wire = BytesMut::with_capacity(Datagram::header_len(target) + payload.len());
		Datagram::header_into(target, &mut wire)?;
		wire.extend_from_slice(payload);
		Ok(socket.send_to(&wire, proxy_ep).await?)
	})
	.await
}

/// Receives one relayed datagram, strips the SOCKS5 header and returns the
/// parsed view into `buf` together with the proxy endpoint that sent it.
pub async fn recv_from<'a>(
	socket: &UdpSocket,
	buf: &'a mut [u8],
	timeout: Option<Duration>,
) -> Result<(Datagram<'a>, SocketAddr)> {
	let (n, sender) = within(timeout, async { Ok(socket.recv_from(&mut *buf).await?) }).await?;
	let wire = &buf[..n];
	ensure!(Datagram::validate(wire), InvalidDatagramSnafu);
	let datagram = Datagram::parse(wire).map_err(|_| InvalidDatagramSnafu.build())?;
	Ok((datagram, sender))
}

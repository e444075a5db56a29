//! End-to-end helpers driving the gale client against the gale server.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use gale_socks::{
	Address,
	client::{self, AuthOptions},
	server::{Server, ServerBuilder},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Default whole-operation timeout for the helpers.
pub const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts a proxy on a loopback ephemeral port and returns it with its
/// endpoint. The caller stops it with `server.stop()` + `server.wait()`.
pub async fn start_test_proxy(builder: ServerBuilder) -> eyre::Result<(Arc<Server>, SocketAddr)> {
	let server = Arc::new(builder.build()?);
	server.run().await?;
	let addr = server
		.local_addr()
		.ok_or_else(|| eyre::eyre!("proxy reported no local address"))?;
	Ok((server, addr))
}

pub fn loopback_builder() -> ServerBuilder {
	ServerBuilder::new("127.0.0.1:0".parse().expect("loopback address"))
}

/// Round-trips `payload` to a TCP echo target through the proxy and returns
/// whatever came back.
pub async fn roundtrip_tcp(
	proxy_addr: SocketAddr,
	target: Address,
	auth: &AuthOptions,
	payload: &[u8],
) -> eyre::Result<Vec<u8>> {
	let mut stream = client::connect(proxy_addr, target, auth, Some(OP_TIMEOUT)).await?;
	stream.write_all(payload).await?;
	let mut echoed = vec![0u8; payload.len()];
	tokio::time::timeout(OP_TIMEOUT, stream.read_exact(&mut echoed)).await??;
	Ok(echoed)
}

/// Round-trips `payload` to a UDP echo target through the proxy's UDP
/// relay. Returns the reply payload and the sender address from its header.
pub async fn roundtrip_udp(
	proxy_addr: SocketAddr,
	target: Address,
	auth: &AuthOptions,
	payload: &[u8],
) -> eyre::Result<(Vec<u8>, Address)> {
	let associate = client::udp_associate(proxy_addr, auth, Some(OP_TIMEOUT)).await?;
	client::send_to(&associate.socket, associate.proxy_ep, &target, payload, Some(OP_TIMEOUT)).await?;
	let mut buf = vec![0u8; 65536];
	let (datagram, _proxy_ep) = client::recv_from(&associate.socket, &mut buf, Some(OP_TIMEOUT)).await?;
	Ok((datagram.payload.to_vec(), datagram.addr))
}

use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc};

use bytes::Bytes;
use gale_core::types::Address;

use crate::{
	net::{TcpConn, UdpConn},
	server::Config,
};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Ordered queue a data processor emits into. Every `send` call becomes one
/// write to the peer, flushed in call order after the processor returns; not
/// calling it drops the data.
#[derive(Debug, Default)]
pub struct SendQueue {
	chunks: Vec<Bytes>,
}

impl SendQueue {
	pub fn send(&mut self, data: &[u8]) {
		self.chunks.push(Bytes::copy_from_slice(data));
	}

	pub(crate) fn drain(&mut self) -> impl Iterator<Item = Bytes> + '_ {
		self.chunks.drain(..)
	}
}

/// Per-direction transformer state: payload in, zero or more spans out.
pub type DataProcessFn = dyn FnMut(&[u8], &mut SendQueue) + Send;

/// Like [`DataProcessFn`] for the client→target UDP direction, which also
/// sees the resolved target endpoint of each datagram.
pub type UdpClientProcessFn = dyn FnMut(&[u8], SocketAddr, &mut SendQueue) + Send;

/// Intercepts TCP relay payloads on top of the built-in engine.
///
/// The factory methods run once per relay direction and may capture state
/// for that direction; the returned closure is invoked for every read.
pub trait TcpDataProcessor: Send + Sync {
	fn client_to_server(&self, from_ep: SocketAddr, to_ep: SocketAddr) -> Box<DataProcessFn>;
	fn server_to_client(&self, from_ep: SocketAddr, to_ep: SocketAddr) -> Box<DataProcessFn>;
}

/// Intercepts UDP relay payloads on top of the built-in engine.
pub trait UdpDataProcessor: Send + Sync {
	/// Direction client → target servers; created once per session with the
	/// expected client endpoint.
	fn client_to_server(&self, client_ep: SocketAddr) -> Box<UdpClientProcessFn>;
	/// Direction target → client; created once per target server.
	fn server_to_client(&self, client_ep: SocketAddr, target_ep: SocketAddr) -> Box<DataProcessFn>;
}

/// Replaces the built-in TCP relay entirely. Receives both connections with
/// the session's metrics already attached.
pub trait TcpRelayHandler: Send + Sync {
	fn relay(&self, client: TcpConn, server: TcpConn, config: Arc<Config>) -> BoxFuture<()>;
}

/// Replaces the built-in UDP relay entirely.
pub trait UdpRelayHandler: Send + Sync {
	fn relay(
		&self,
		control: TcpConn,
		proxy: UdpConn,
		client_addr: Address,
		config: Arc<Config>,
	) -> BoxFuture<()>;
}

/// How TCP sessions are relayed after the handshake.
#[derive(Clone, Default)]
pub(crate) enum TcpRelayMode {
	#[default]
	Builtin,
	Handler(Arc<dyn TcpRelayHandler>),
	Processor(Arc<dyn TcpDataProcessor>),
}

/// How UDP sessions are relayed after the handshake.
#[derive(Clone, Default)]
pub(crate) enum UdpRelayMode {
	#[default]
	Builtin,
	Handler(Arc<dyn UdpRelayHandler>),
	Processor(Arc<dyn UdpDataProcessor>),
}

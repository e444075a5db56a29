use std::sync::Arc;

use gale_core::Metrics;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error};

use crate::{
	net::TcpConn,
	server::{
		config::{Config, UserAuthCallback},
		handlers::{TcpRelayMode, UdpRelayMode},
		handshake::{self, HandshakeResult},
		tcp_relay, udp_relay,
	},
};

/// State shared by the accept loop and every session task.
pub(crate) struct ListenerState {
	/// The endpoint the listener actually bound (relevant when the
	/// configured port was 0).
	pub local_ep:     std::net::SocketAddr,
	pub config:       Arc<Config>,
	pub metrics:      Arc<Metrics>,
	pub user_auth_cb: UserAuthCallback,
	pub tcp_mode:     TcpRelayMode,
	pub udp_mode:     UdpRelayMode,
	pub token:        CancellationToken,
	pub tracker:      TaskTracker,
}

/// Accept loop on the control socket. Never blocks on per-session work;
/// each accepted connection becomes its own task. Ends when the server
/// token is cancelled.
pub(crate) async fn run(listener: TcpListener, state: Arc<ListenerState>) {
	loop {
		let accepted = tokio::select! {
			_ = state.token.cancelled() => return,
			accepted = listener.accept() => accepted,
		};
		let (stream, peer_ep) = match accepted {
			Ok(accepted) => accepted,
			Err(err) => {
				debug!(%err, "error accepting new connection");
				continue;
			}
		};
		debug!(client = %peer_ep, "new connection accepted");
		if state.config.tcp_nodelay {
			if let Err(err) = stream.set_nodelay(true) {
				error!(client = %peer_ep, %err, "failed to set TCP_NODELAY");
				continue;
			}
		}
		let state = state.clone();
		state.tracker.clone().spawn(async move {
			tokio::select! {
				_ = state.token.cancelled() => {}
				_ = run_session(stream, &state) => {}
			}
		});
	}
}

/// One client session: handshake, then dispatch to the configured relay.
async fn run_session(stream: TcpStream, state: &ListenerState) {
	let mut client = TcpConn::new(stream, state.metrics.clone());
	let result = handshake::run(&mut client, &state.config, &state.metrics, &state.user_auth_cb).await;
	match result {
		Some(HandshakeResult::Connect(server) | HandshakeResult::Bind(server)) => {
			match &state.tcp_mode {
				TcpRelayMode::Builtin => {
					tcp_relay::run(client, server, &state.config, None).await;
				}
				TcpRelayMode::Processor(processor) => {
					tcp_relay::run(client, server, &state.config, Some(processor.as_ref())).await;
				}
				TcpRelayMode::Handler(handler) => {
					handler.relay(client, server, state.config.clone()).await;
				}
			}
		}
		Some(HandshakeResult::UdpAssociate(proxy, client_addr)) => match &state.udp_mode {
			UdpRelayMode::Builtin => {
				udp_relay::run(
					client,
					proxy,
					client_addr,
					state.config.clone(),
					state.metrics.clone(),
					None,
				)
				.await;
			}
			UdpRelayMode::Processor(processor) => {
				udp_relay::run(
					client,
					proxy,
					client_addr,
					state.config.clone(),
					state.metrics.clone(),
					Some(processor.clone()),
				)
				.await;
			}
			UdpRelayMode::Handler(handler) => {
				handler.relay(client, proxy, client_addr, state.config.clone()).await;
			}
		},
		None => {}
	}
}

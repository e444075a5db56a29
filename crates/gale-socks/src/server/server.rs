use std::sync::{Arc, Mutex};

use gale_core::Metrics;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

use crate::{
	Result,
	net,
	server::{
		config::{Config, UserAuthCallback},
		handlers::{TcpRelayMode, UdpRelayMode},
		listener::{self, ListenerState},
	},
};

const LISTEN_BACKLOG: i32 = 1024;

/// A built SOCKS5 proxy server. Create through
/// [`ServerBuilder`](crate::server::ServerBuilder).
pub struct Server {
	pub(crate) config:       Arc<Config>,
	pub(crate) metrics:      Arc<Metrics>,
	pub(crate) user_auth_cb: UserAuthCallback,
	pub(crate) tcp_mode:     TcpRelayMode,
	pub(crate) udp_mode:     UdpRelayMode,
	running:                 Mutex<Option<Arc<ListenerState>>>,
}

impl std::fmt::Debug for Server {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Server")
			.field("config", &self.config)
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}

impl Server {
	pub(crate) fn new(
		config: Config,
		user_auth_cb: UserAuthCallback,
		tcp_mode: TcpRelayMode,
		udp_mode: UdpRelayMode,
	) -> Self {
		Self {
			config: Arc::new(config),
			metrics: Arc::new(Metrics::default()),
			user_auth_cb,
			tcp_mode,
			udp_mode,
			running: Mutex::new(None),
		}
	}

	/// Binds the listener and starts accepting sessions in the background.
	///
	/// Idempotent: a previous run is stopped waiting for (drained) first, and
	/// the metrics counters start from zero again.
	pub async fn run(&self) -> Result<()> {
		self.wait().await;
		self.metrics.clear();
		let listener = net::bind_listener(self.config.listener_addr, LISTEN_BACKLOG)?;
		let local_ep = listener.local_addr()?;
		info!(listener = %local_ep, "socks5 server started");
		let state = Arc::new(ListenerState {
			local_ep,
			config: self.config.clone(),
			metrics: self.metrics.clone(),
			user_auth_cb: self.user_auth_cb.clone(),
			tcp_mode: self.tcp_mode.clone(),
			udp_mode: self.udp_mode.clone(),
			token: CancellationToken::new(),
			tracker: TaskTracker::new(),
		});
		state.tracker.spawn(listener::run(listener, state.clone()));
		*self.running.lock().expect("server state lock poisoned") = Some(state);
		Ok(())
	}

	/// The endpoint the running listener is bound to. Reports the real port
	/// when the configured one was 0.
	pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
		self.running
			.lock()
			.expect("server state lock poisoned")
			.as_ref()
			.map(|state| state.local_ep)
	}

	/// Waits until the current run fully drains (all sessions finished).
	pub async fn wait(&self) {
		let state = self.running.lock().expect("server state lock poisoned").clone();
		if let Some(state) = state {
			state.tracker.close();
			state.tracker.wait().await;
		}
	}

	/// Cancels the accept loop and every running session.
	pub fn stop(&self) {
		let state = self.running.lock().expect("server state lock poisoned").clone();
		if let Some(state) = state {
			state.token.cancel();
			info!("socks5 server stopped");
		}
	}

	/// True when no run is active or the active run was cancelled.
	pub fn stopped(&self) -> bool {
		self.running
			.lock()
			.expect("server state lock poisoned")
			.as_ref()
			.map(|state| state.token.is_cancelled())
			.unwrap_or(true)
	}

	pub fn recv_bytes_total(&self) -> u64 {
		self.metrics.recv_bytes_total()
	}

	pub fn sent_bytes_total(&self) -> u64 {
		self.metrics.sent_bytes_total()
	}
}

use std::{net::SocketAddr, sync::Arc, time::Duration};

use crate::{
	InvalidListenerSnafu, Result,
	server::{
		Server,
		config::{Config, UserAuthCallback, default_user_auth},
		handlers::{
			TcpDataProcessor, TcpRelayHandler, TcpRelayMode, UdpDataProcessor, UdpRelayHandler,
			UdpRelayMode,
		},
	},
};

/// Configures and builds a [`Server`].
///
/// Relay behavior is selected per transport through one of three explicit
/// entry points: the default built-in relay, `with_*_processor` (intercept
/// payloads on top of the built-in relay) or `with_*_handler` (full control
/// of byte forwarding).
pub struct ServerBuilder {
	config:       Config,
	user_auth_cb: UserAuthCallback,
	tcp_mode:     TcpRelayMode,
	udp_mode:     UdpRelayMode,
}

impl ServerBuilder {
	pub fn new(listener_addr: SocketAddr) -> Self {
		Self {
			config: Config {
				listener_addr,
				..Config::default()
			},
			user_auth_cb: Arc::new(default_user_auth),
			tcp_mode: TcpRelayMode::Builtin,
			udp_mode: UdpRelayMode::Builtin,
		}
	}

	pub fn listener(mut self, listener_addr: SocketAddr) -> Self {
		self.config.listener_addr = listener_addr;
		self
	}

	pub fn threads(mut self, threads: usize) -> Self {
		self.config.threads = threads;
		self
	}

	pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
		self.config.handshake_timeout = timeout;
		self
	}

	pub fn tcp_relay_timeout(mut self, timeout: Duration) -> Self {
		self.config.tcp_relay_timeout = timeout;
		self
	}

	pub fn udp_relay_timeout(mut self, timeout: Duration) -> Self {
		self.config.udp_relay_timeout = timeout;
		self
	}

	pub fn enable_user_auth(mut self, enable: bool) -> Self {
		self.config.enable_user_auth = enable;
		self
	}

	pub fn auth_username(mut self, username: impl Into<String>) -> Self {
		self.config.auth_username = username.into();
		self
	}

	pub fn auth_password(mut self, password: impl Into<String>) -> Self {
		self.config.auth_password = password.into();
		self
	}

	/// Replaces the credential check used by the USER subnegotiation.
	pub fn user_auth_callback(mut self, callback: UserAuthCallback) -> Self {
		self.user_auth_cb = callback;
		self
	}

	pub fn enable_tcp_nodelay(mut self, enable: bool) -> Self {
		self.config.tcp_nodelay = enable;
		self
	}

	/// BIND only hands out the second reply when the accepted peer's IP
	/// belongs to the request's `DST_ADDR`.
	pub fn bind_validate_accepted_conn(mut self, validate: bool) -> Self {
		self.config.bind_validate_accepted_conn = validate;
		self
	}

	pub fn with_tcp_handler(mut self, handler: Arc<dyn TcpRelayHandler>) -> Self {
		self.tcp_mode = TcpRelayMode::Handler(handler);
		self
	}

	pub fn with_tcp_processor(mut self, processor: Arc<dyn TcpDataProcessor>) -> Self {
		self.tcp_mode = TcpRelayMode::Processor(processor);
		self
	}

	pub fn with_udp_handler(mut self, handler: Arc<dyn UdpRelayHandler>) -> Self {
		self.udp_mode = UdpRelayMode::Handler(handler);
		self
	}

	pub fn with_udp_processor(mut self, processor: Arc<dyn UdpDataProcessor>) -> Self {
		self.udp_mode = UdpRelayMode::Processor(processor);
		self
	}

	/// Validates the configuration and builds the server. The wildcard
	/// listener IP is rejected: the relay engines reuse the listener IP for
	/// their own sockets and need a concrete one.
	pub fn build(self) -> Result<Server> {
		if self.config.listener_addr.ip().is_unspecified() {
			return InvalidListenerSnafu {
				addr: self.config.listener_addr,
			}
			.fail();
		}
		Ok(Server::new(self.config, self.user_auth_cb, self.tcp_mode, self.udp_mode))
	}
}

use std::{
	net::{Ipv4Addr, SocketAddr},
	sync::Arc,
	time::Duration,
};

/// Callback deciding RFC 1929 credentials. Receives the username, the
/// password and the server config (for the configured reference values).
pub type UserAuthCallback = Arc<dyn Fn(&str, &str, &Config) -> bool + Send + Sync>;

/// Accepts exactly the configured `auth_username`/`auth_password` pair.
pub fn default_user_auth(username: &str, password: &str, config: &Config) -> bool {
	username == config.auth_username && password == config.auth_password
}

/// Proxy server configuration. The defaults below apply unless overridden
/// through the builder.
#[derive(Debug, Clone)]
pub struct Config {
	/// Budget for the whole SOCKS5 handshake (greeting, choice,
	/// authentication, request, reply).
	pub handshake_timeout: Duration,
	/// Idle timeout for TCP relays (CONNECT, BIND).
	pub tcp_relay_timeout: Duration,
	/// Idle timeout for UDP relays (UDP ASSOCIATE).
	pub udp_relay_timeout: Duration,
	/// Worker threads; consumed by the binary when building the runtime.
	pub threads: usize,
	/// Listener endpoint. The wildcard IP isn't supported.
	pub listener_addr: SocketAddr,
	/// Whether BIND verifies the accepted connection against the request's
	/// `DST_ADDR`.
	pub bind_validate_accepted_conn: bool,
	/// Enable the Username/Password subnegotiation.
	pub enable_user_auth: bool,
	pub auth_username: String,
	pub auth_password: String,
	/// Apply `TCP_NODELAY` to accepted and outbound sockets.
	pub tcp_nodelay: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			handshake_timeout: Duration::from_secs(5),
			tcp_relay_timeout: Duration::from_secs(15),
			udp_relay_timeout: Duration::from_secs(15),
			threads: std::thread::available_parallelism().map(Into::into).unwrap_or(1),
			listener_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 1080)),
			bind_validate_accepted_conn: false,
			enable_user_auth: false,
			auth_username: String::new(),
			auth_password: String::new(),
			tcp_nodelay: false,
		}
	}
}

use std::{net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use gale_core::{Metrics, types::Address};
use tokio_util::codec::Encoder as _;
use tracing::debug;

use crate::{
	Error,
	net::{self, TcpConn, UdpConn},
	proto::{
		AuthMethod, Choice, ChoiceCodec, Cmd, Greeting, GreetingCodec, Reply, ReplyCodec, Rep,
		Request, RequestCodec, UserAuthRequestCodec, UserAuthResponse, UserAuthResponseCodec,
		UserAuthStatus,
	},
	server::config::{Config, UserAuthCallback},
};

/// Outcome of a successful server-side handshake, produced exactly once per
/// session and consumed by the relay dispatch.
pub(crate) enum HandshakeResult {
	/// CONNECT: the joined upstream connection.
	Connect(TcpConn),
	/// BIND: the accepted inbound connection.
	Bind(TcpConn),
	/// UDP ASSOCIATE: the proxy-side UDP socket and the expected client
	/// address (port 0 means "any source port from that IP").
	UdpAssociate(UdpConn, Address),
}

/// Runs the whole state machine under `config.handshake_timeout`. `None`
/// aborts the session; any reply still owed has been sent best-effort.
pub(crate) async fn run(
	client: &mut TcpConn,
	config: &Config,
	metrics: &Arc<Metrics>,
	user_auth_cb: &UserAuthCallback,
) -> Option<HandshakeResult> {
	let handshake = async {
		let mut buf = BytesMut::new();
		if !auth(client, config, user_auth_cb, &mut buf).await? {
			return Ok(None);
		}
		process_request(client, config, metrics, &mut buf).await
	};
	let outcome = tokio::time::timeout(config.handshake_timeout, handshake).await;
	match outcome {
		Ok(Ok(result)) => result,
		Ok(Err(err)) => {
			let err: Error = err;
			debug!(client = client.peer(), %err, "handshake failed");
			None
		}
		Err(_) => {
			debug!(client = client.peer(), "handshake timed out");
			None
		}
	}
}

/// Greeting, method choice and the optional USER subnegotiation.
/// `Ok(false)` means the session ends without a protocol violation (failed
/// credentials).
async fn auth(
	client: &mut TcpConn,
	config: &Config,
	user_auth_cb: &UserAuthCallback,
	buf: &mut BytesMut,
) -> Result<bool, Error> {
	let greeting: Greeting = client.recv_message(GreetingCodec, buf).await?;
	let method = choose_method(config, &greeting);
	send_choice(client, method).await?;
	if method == AuthMethod::User {
		return user_auth(client, config, user_auth_cb, buf).await;
	}
	Ok(true)
}

/// Picks `User` iff it is enabled and offered, `None` otherwise.
fn choose_method(config: &Config, greeting: &Greeting) -> AuthMethod {
	if config.enable_user_auth && greeting.methods.contains(&AuthMethod::User) {
		AuthMethod::User
	} else {
		AuthMethod::None
	}
}

async fn send_choice(client: &mut TcpConn, method: AuthMethod) -> Result<(), Error> {
	let mut out = BytesMut::new();
	ChoiceCodec.encode(Choice { method }, &mut out).map_err(Error::from)?;
	client.send(&out).await
}

/// Server side of RFC 1929: read the credentials, consult the callback,
/// answer with the status byte.
async fn user_auth(
	client: &mut TcpConn,
	config: &Config,
	user_auth_cb: &UserAuthCallback,
	buf: &mut BytesMut,
) -> Result<bool, Error> {
	let request = client.recv_message(UserAuthRequestCodec, buf).await?;
	if !user_auth_cb.as_ref()(&request.username, &request.password, config) {
		debug!(client = client.peer(), "authentication failure");
		// Best-effort failure status, then terminate.
		let _ = send_user_auth_status(client, UserAuthStatus::Failure).await;
		return Ok(false);
	}
	send_user_auth_status(client, UserAuthStatus::Success).await?;
	Ok(true)
}

async fn send_user_auth_status(client: &mut TcpConn, status: UserAuthStatus) -> Result<(), Error> {
	let mut out = BytesMut::new();
	UserAuthResponseCodec
		.encode(UserAuthResponse { status }, &mut out)
		.map_err(Error::from)?;
	client.send(&out).await
}

async fn send_reply(client: &mut TcpConn, reply: &Reply) -> Result<(), Error> {
	let mut out = BytesMut::new();
	ReplyCodec.encode(reply, &mut out).map_err(Error::from)?;
	client.send(&out).await
}

async fn process_request(
	client: &mut TcpConn,
	config: &Config,
	metrics: &Arc<Metrics>,
	buf: &mut BytesMut,
) -> Result<Option<HandshakeResult>, Error> {
	let request: Request = client.recv_message(RequestCodec, buf).await?;
	match request.cmd {
		Cmd::Connect => process_connect(client, config, metrics, &request).await,
		Cmd::UdpAssociate => process_udp_associate(client, config, metrics, &request).await,
		Cmd::Bind => process_bind(client, config, metrics, &request).await,
		Cmd::Other(cmd) => {
			debug!(client = client.peer(), cmd, "unsupported command");
			send_reply(client, &Reply::rejection(Rep::CommandNotSupported, &request.addr)).await?;
			Ok(None)
		}
	}
}

async fn process_connect(
	client: &mut TcpConn,
	config: &Config,
	metrics: &Arc<Metrics>,
	request: &Request,
) -> Result<Option<HandshakeResult>, Error> {
	match net::connect_target(&request.addr, config.tcp_nodelay).await {
		Ok(stream) => {
			let local_ep = stream.local_addr()?;
			send_reply(client, &Reply::success(Address::from(local_ep))).await?;
			Ok(Some(HandshakeResult::Connect(TcpConn::new(stream, metrics.clone()))))
		}
		Err(err) => {
			debug!(
				client = client.peer(),
				server = %request.addr,
				%err,
				"CONNECT failed"
			);
			send_reply(client, &Reply::rejection(rep_for_error(&err), &request.addr)).await?;
			Ok(None)
		}
	}
}

/// Maps an outbound dial failure to the `REP` code of the failure reply.
fn rep_for_error(err: &Error) -> Rep {
	match err {
		Error::Io { source, .. } => match source.kind() {
			std::io::ErrorKind::ConnectionRefused => Rep::ConnectionRefused,
			std::io::ErrorKind::HostUnreachable => Rep::HostUnreachable,
			std::io::ErrorKind::NetworkUnreachable => Rep::NetworkUnreachable,
			_ => Rep::GeneralFailure,
		},
		_ => Rep::GeneralFailure,
	}
}

async fn process_udp_associate(
	client: &mut TcpConn,
	config: &Config,
	metrics: &Arc<Metrics>,
	request: &Request,
) -> Result<Option<HandshakeResult>, Error> {
	let client_addr = match &request.addr {
		// A zeroed IP delegates to the TCP peer's IP; port 0 disables the
		// source-port check during relaying.
		addr @ (Address::IPv4(..) | Address::IPv6(..)) => {
			if addr.is_unspecified() {
				let peer_ip = client.peer_addr()?.ip();
				Address::from(SocketAddr::new(peer_ip, 0))
			} else {
				addr.clone()
			}
		}
		Address::Domain(..) => {
			send_reply(client, &Reply::rejection(Rep::AddressTypeNotSupported, &request.addr)).await?;
			return Ok(None);
		}
	};
	let socket = match net::bind_udp(config.listener_addr.ip()) {
		Ok(socket) => socket,
		Err(err) => {
			debug!(client = client.peer(), %err, "UDP ASSOCIATE socket setup failed");
			send_reply(client, &Reply::rejection(Rep::GeneralFailure, &request.addr)).await?;
			return Ok(None);
		}
	};
	let proxy = UdpConn::new(socket, metrics.clone());
	let proxy_ep = proxy.local_addr()?;
	send_reply(client, &Reply::success(Address::from(proxy_ep))).await?;
	Ok(Some(HandshakeResult::UdpAssociate(proxy, client_addr)))
}

async fn process_bind(
	client: &mut TcpConn,
	config: &Config,
	metrics: &Arc<Metrics>,
	request: &Request,
) -> Result<Option<HandshakeResult>, Error> {
	let local_ip = client.local_addr()?.ip();
	let acceptor = match net::bind_listener(SocketAddr::new(local_ip, 0), 1) {
		Ok(acceptor) => acceptor,
		Err(err) => {
			debug!(client = client.peer(), %err, "BIND acceptor setup failed");
			send_reply(client, &Reply::rejection(Rep::GeneralFailure, &request.addr)).await?;
			return Ok(None);
		}
	};
	let acceptor_ep = acceptor.local_addr()?;
	send_reply(client, &Reply::success(Address::from(acceptor_ep))).await?;
	let (accepted, accepted_ep) = acceptor.accept().await?;
	if config.tcp_nodelay {
		accepted.set_nodelay(true)?;
	}
	if config.bind_validate_accepted_conn && !validate_accepted(accepted_ep, &request.addr).await {
		debug!(
			client = client.peer(),
			expected = %request.addr,
			accepted = %accepted_ep,
			"BIND accepted address validation failed"
		);
		return Ok(None);
	}
	send_reply(client, &Reply::success(Address::from(accepted_ep))).await?;
	Ok(Some(HandshakeResult::Bind(TcpConn::new(accepted, metrics.clone()))))
}

/// The accepted peer's IP must be one of the IPs the request's `DST_ADDR`
/// names (or resolves to).
async fn validate_accepted(accepted_ep: SocketAddr, expected: &Address) -> bool {
	match expected {
		Address::IPv4(..) | Address::IPv6(..) => {
			expected.to_socket_addr().map(|ep| ep.ip()) == Some(accepted_ep.ip())
		}
		Address::Domain(domain, port) => match net::resolve(domain, *port).await {
			Ok(endpoints) => endpoints.iter().any(|ep| ep.ip() == accepted_ep.ip()),
			Err(_) => false,
		},
	}
}

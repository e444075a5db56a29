use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use arc_swap::ArcSwap;
use bytes::{Bytes, BytesMut};
use gale_core::{Metrics, Watchdog, types::Address};
use tokio_util::{codec::Encoder as _, task::TaskTracker};
use tracing::debug;

use crate::{
	Result,
	net::{self, TcpConn, UdpConn},
	proto::{AddressCodec, Datagram, MAX_DATAGRAM_LEN},
	server::{
		config::Config,
		handlers::{SendQueue, UdpDataProcessor},
	},
};

const TCP_BUF_SIZE: usize = 4096;

/// One target server the client exchanges datagrams with.
struct TargetEntry {
	/// Socket for sending to / receiving from this target.
	conn:      Arc<UdpConn>,
	/// Resolved native endpoint of the target.
	ep:        SocketAddr,
	/// The target's serialized SOCKS5 address, reused as the reply header.
	wire_addr: Bytes,
}

/// Shared state of one UDP ASSOCIATE session.
///
/// The receive loop owns the target table; spawned return tasks share the
/// proxy socket, the watchdog and the pinned client endpoint through this
/// struct. The session ends when the control connection closes, the
/// watchdog fires or any target path fails.
struct UdpSession {
	proxy:    Arc<UdpConn>,
	/// Where client datagrams must come from. Starts at the address declared
	/// in the request (port 0 = any port), replaced by the first verified
	/// sender.
	expected: ArcSwap<SocketAddr>,
	pinned:   std::sync::atomic::AtomicBool,
	watchdog: Arc<Watchdog>,
	config:   Arc<Config>,
	metrics:  Arc<Metrics>,
}

impl UdpSession {
	fn expected_ep(&self) -> SocketAddr {
		**self.expected.load()
	}

	/// The pinned client endpoint; only meaningful after the first accepted
	/// datagram.
	fn client_ep(&self) -> SocketAddr {
		self.expected_ep()
	}

	/// IP must match the expected client; the port too once it is known.
	fn verify_sender(&self, sender: SocketAddr) -> bool {
		let expected = self.expected_ep();
		if expected.ip() != sender.ip() {
			debug!(
				proxy = self.proxy.local(),
				expected = %expected,
				sender = %sender,
				"datagram sender doesn't match the associated client, dropped"
			);
			return false;
		}
		if expected.port() != 0 && expected.port() != sender.port() {
			debug!(
				proxy = self.proxy.local(),
				expected = %expected,
				sender = %sender,
				"datagram sender doesn't match the associated client, dropped"
			);
			return false;
		}
		true
	}

	fn pin_client(&self, sender: SocketAddr) {
		use std::sync::atomic::Ordering;
		if !self.pinned.swap(true, Ordering::Relaxed) {
			self.expected.store(Arc::new(sender));
			debug!(proxy = self.proxy.local(), client = %sender, "client address pinned");
		}
	}
}

/// Runs the built-in UDP relay for one session.
pub(crate) async fn run(
	mut control: TcpConn,
	mut proxy: UdpConn,
	client_addr: Address,
	config: Arc<Config>,
	metrics: Arc<Metrics>,
	processor: Option<Arc<dyn UdpDataProcessor>>,
) {
	let Some(expected_ep) = client_addr.to_socket_addr() else {
		// The handshake only admits IP client addresses.
		return;
	};
	let watchdog = Arc::new(Watchdog::new(config.udp_relay_timeout));
	// Collapses the per-target tasks even when this future is dropped by a
	// server-wide stop instead of finishing on its own.
	let _cancel_children = watchdog.token().drop_guard();
	control.bind_token(watchdog.token());
	proxy.bind_token(watchdog.token());
	debug!(
		control = control.peer(),
		proxy = proxy.local(),
		client = %expected_ep,
		"udp relay started"
	);

	let session = Arc::new(UdpSession {
		proxy: Arc::new(proxy),
		expected: ArcSwap::new(Arc::new(expected_ep)),
		pinned: std::sync::atomic::AtomicBool::new(false),
		watchdog: watchdog.clone(),
		config,
		metrics,
	});

	// Return tasks are children of the session: collected here and joined
	// once the session ends, after the token collapsed their I/O.
	let tracker = TaskTracker::new();
	tokio::select! {
		_ = process_tcp(&mut control) => {}
		_ = process_udp(&session, &tracker, processor.as_deref()) => {}
		_ = watchdog.run() => {}
	}
	watchdog.stop();
	tracker.close();
	tracker.wait().await;
	control.stop().await;
	debug!(
		control = control.peer(),
		proxy = session.proxy.local(),
		client = %session.client_ep(),
		"udp relay finished"
	);
}

/// Keeps draining the control connection. It carries no payload; EOF or any
/// error doubles as the liveness signal that ends the association.
async fn process_tcp(control: &mut TcpConn) {
	let mut buf = vec![0u8; TCP_BUF_SIZE];
	loop {
		if let Err(err) = control.read_some(&mut buf).await {
			debug!(peer = control.peer(), %err, "udp relay control connection closed");
			return;
		}
	}
}

/// Receive loop on the proxy socket: verify, pin, validate, demultiplex to
/// the target table, forward.
async fn process_udp(
	session: &Arc<UdpSession>,
	tracker: &TaskTracker,
	processor: Option<&dyn UdpDataProcessor>,
) {
	let mut targets: HashMap<Address, Arc<TargetEntry>> = HashMap::new();
	let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
	let mut client_processor = processor.map(|p| p.client_to_server(session.expected_ep()));
	let mut queue = SendQueue::default();
	loop {
		session.watchdog.update();
		let (n, sender) = match session.proxy.recv_from(&mut buf).await {
			Ok(received) => received,
			Err(err) => {
				debug!(proxy = session.proxy.local(), %err, "udp relay receive failed");
				return;
			}
		};
		if !session.verify_sender(sender) {
			continue;
		}
		session.pin_client(sender);
		let wire = &buf[..n];
		if !Datagram::validate(wire) {
			continue;
		}
		let Ok(datagram) = Datagram::parse(wire) else {
			continue;
		};
		// Fragmentation is unsupported, RFC 1928 §7 allows dropping.
		if datagram.frag != 0 {
			continue;
		}
		let entry = match targets.get(&datagram.addr) {
			Some(entry) => entry.clone(),
			None => {
				let Some(entry) = make_target(session, &datagram.addr).await else {
					return;
				};
				targets.insert(datagram.addr.clone(), entry.clone());
				spawn_target_task(session, tracker, entry.clone(), processor);
				entry
			}
		};
		session.watchdog.update();
		let sent = match client_processor.as_mut() {
			None => entry.conn.send_to(datagram.payload, entry.ep).await.map(|_| ()),
			Some(process) => {
				process(datagram.payload, entry.ep, &mut queue);
				send_queued(&entry, &session.watchdog, &mut queue).await
			}
		};
		if let Err(err) = sent {
			debug!(target = %entry.ep, %err, "udp relay forward failed");
			return;
		}
	}
}

async fn send_queued(entry: &TargetEntry, watchdog: &Watchdog, queue: &mut SendQueue) -> Result<()> {
	for chunk in queue.drain() {
		watchdog.update();
		entry.conn.send_to(&chunk, entry.ep).await?;
	}
	Ok(())
}

/// Opens the per-target socket, resolves the address and serializes it for
/// the return path. `None` terminates the session, matching resolve/bind
/// failure semantics.
async fn make_target(session: &Arc<UdpSession>, addr: &Address) -> Option<Arc<TargetEntry>> {
	let socket = match net::bind_udp(session.config.listener_addr.ip()) {
		Ok(socket) => socket,
		Err(err) => {
			debug!(proxy = session.proxy.local(), %err, "udp relay target socket failed");
			return None;
		}
	};
	let ep = match net::to_endpoint(addr).await {
		Ok(ep) => ep,
		Err(err) => {
			debug!(
				proxy = session.proxy.local(),
				client = %session.client_ep(),
				target = %addr,
				%err,
				"udp relay target endpoint failed"
			);
			return None;
		}
	};
	let mut conn = UdpConn::new(socket, session.metrics.clone());
	conn.bind_token(session.watchdog.token());
	let mut wire_addr = BytesMut::new();
	if AddressCodec.encode(addr, &mut wire_addr).is_err() {
		return None;
	}
	debug!(
		proxy = session.proxy.local(),
		client = %session.client_ep(),
		target = %ep,
		"udp relay added new target server"
	);
	Some(Arc::new(TargetEntry {
		conn: Arc::new(conn),
		ep,
		wire_addr: wire_addr.freeze(),
	}))
}

fn spawn_target_task(
	session: &Arc<UdpSession>,
	tracker: &TaskTracker,
	entry: Arc<TargetEntry>,
	processor: Option<&dyn UdpDataProcessor>,
) {
	// The pin happened before the first target exists, so the client
	// endpoint is final here.
	let server_processor =
		processor.map(|p| p.server_to_client(session.client_ep(), entry.ep));
	let session = session.clone();
	tracker.spawn(async move {
		process_target(session, entry, server_processor).await;
	});
}

/// Return path for one target: receive, screen the sender, wrap in a SOCKS5
/// header and send to the pinned client as a single datagram. Any failure
/// collapses the whole session through the shared token.
async fn process_target(
	session: Arc<UdpSession>,
	entry: Arc<TargetEntry>,
	mut processor: Option<Box<crate::server::handlers::DataProcessFn>>,
) {
	let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
	let mut queue = SendQueue::default();
	loop {
		session.watchdog.update();
		let (n, sender) = match entry.conn.recv_from(&mut buf).await {
			Ok(received) => received,
			Err(err) => {
				debug!(target = %entry.ep, %err, "udp relay target receive failed");
				session.watchdog.stop();
				return;
			}
		};
		if sender != entry.ep {
			continue;
		}
		let delivered = match processor.as_mut() {
			None => reply_to_client(&session, &entry, &buf[..n]).await,
			Some(process) => {
				process(&buf[..n], &mut queue);
				let mut result = Ok(());
				for chunk in queue.drain() {
					result = reply_to_client(&session, &entry, &chunk).await;
					if result.is_err() {
						break;
					}
				}
				result
			}
		};
		if let Err(err) = delivered {
			debug!(proxy = session.proxy.local(), %err, "udp relay reply failed");
			session.watchdog.stop();
			return;
		}
	}
}

/// `[RSV, FRAG=0][target addr][payload]` emitted as one datagram so the
/// client never sees a torn header.
async fn reply_to_client(session: &UdpSession, entry: &TargetEntry, payload: &[u8]) -> Result<()> {
	let mut wire = BytesMut::with_capacity(3 + entry.wire_addr.len() + payload.len());
	wire.extend_from_slice(&[0, 0, 0]);
	wire.extend_from_slice(&entry.wire_addr);
	wire.extend_from_slice(payload);
	session.watchdog.update();
	session.proxy.send_to(&wire, session.client_ep()).await?;
	Ok(())
}

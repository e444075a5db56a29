use gale_core::Watchdog;
use tracing::debug;

use crate::{
	net::TcpConn,
	server::{
		config::Config,
		handlers::{DataProcessFn, SendQueue, TcpDataProcessor},
	},
};

const RELAY_BUF_SIZE: usize = 16384;

/// Built-in bidirectional TCP relay.
///
/// Both copy directions and the watchdog run as cooperating futures; the
/// first to finish (EOF, error or idle cancel) ends the engine and the
/// watchdog token collapses whatever is still in flight.
pub(crate) async fn run(
	mut client: TcpConn,
	mut server: TcpConn,
	config: &Config,
	processor: Option<&dyn TcpDataProcessor>,
) {
	debug!(client = client.peer(), server = server.peer(), "tcp relay started");
	let watchdog = Watchdog::new(config.tcp_relay_timeout);
	client.bind_token(watchdog.token());
	server.bind_token(watchdog.token());

	let mut processors = match processor {
		Some(processor) => match direction_processors(&client, &server, processor) {
			Some(pair) => Some(pair),
			// Endpoints are gone already, nothing to relay.
			None => return,
		},
		None => None,
	};

	tokio::select! {
		_ = relay_loop(&mut client, &mut server, &watchdog, &mut processors) => {}
		_ = watchdog.run() => {}
	}
	watchdog.stop();
	client.stop().await;
	server.stop().await;
	debug!(client = client.peer(), server = server.peer(), "tcp relay finished");
}

/// Creates the per-direction transformer state from the processor factory.
fn direction_processors(
	client: &TcpConn,
	server: &TcpConn,
	processor: &dyn TcpDataProcessor,
) -> Option<(Box<DataProcessFn>, Box<DataProcessFn>)> {
	let client_ep = client.peer_addr().ok()?;
	let server_ep = server.peer_addr().ok()?;
	Some((
		processor.client_to_server(client_ep, server_ep),
		processor.server_to_client(server_ep, client_ep),
	))
}

async fn relay_loop(
	client: &mut TcpConn,
	server: &mut TcpConn,
	watchdog: &Watchdog,
	processors: &mut Option<(Box<DataProcessFn>, Box<DataProcessFn>)>,
) {
	let mut c2s = vec![0u8; RELAY_BUF_SIZE];
	let mut s2c = vec![0u8; RELAY_BUF_SIZE];
	let mut queue = SendQueue::default();
	loop {
		watchdog.update();
		// Read-some on whichever side has data, then write-all to the peer.
		// `read_some` (never exact reads) keeps TCP message boundaries and
		// avoids deadlocks on short writes.
		let forwarded = tokio::select! {
			res = client.read_some(&mut c2s) => match res {
				Ok(n) => {
					watchdog.update();
					let processor = processors.as_mut().map(|(c2s, _)| c2s);
					forward(&c2s[..n], server, watchdog, processor, &mut queue).await
				}
				Err(err) => {
					debug!(peer = client.peer(), %err, "tcp relay read ended");
					break;
				}
			},
			res = server.read_some(&mut s2c) => match res {
				Ok(n) => {
					watchdog.update();
					let processor = processors.as_mut().map(|(_, s2c)| s2c);
					forward(&s2c[..n], client, watchdog, processor, &mut queue).await
				}
				Err(err) => {
					debug!(peer = server.peer(), %err, "tcp relay read ended");
					break;
				}
			},
		};
		if !forwarded {
			break;
		}
	}
}

/// Pushes one read's worth of data to `to`, through the direction's
/// processor when present. Queued spans flush in call order; the first
/// failed write ends the direction.
async fn forward(
	data: &[u8],
	to: &mut TcpConn,
	watchdog: &Watchdog,
	processor: Option<&mut Box<DataProcessFn>>,
	queue: &mut SendQueue,
) -> bool {
	match processor {
		None => {
			if let Err(err) = to.send(data).await {
				debug!(peer = to.peer(), %err, "tcp relay write failed");
				return false;
			}
		}
		Some(processor) => {
			processor(data, queue);
			for chunk in queue.drain() {
				watchdog.update();
				if let Err(err) = to.send(&chunk).await {
					debug!(peer = to.peer(), %err, "tcp relay write failed");
					return false;
				}
			}
		}
	}
	true
}

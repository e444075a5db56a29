//! Server side of SOCKS5: handshake state machine, TCP and UDP relay
//! engines, listener and builder.

mod builder;
mod config;
mod handlers;
mod handshake;
mod listener;
mod server;
mod tcp_relay;
mod udp_relay;

pub use builder::ServerBuilder;
pub use config::{Config, UserAuthCallback, default_user_auth};
pub use handlers::{
	BoxFuture, DataProcessFn, SendQueue, TcpDataProcessor, TcpRelayHandler, UdpClientProcessFn,
	UdpDataProcessor, UdpRelayHandler,
};
pub use server::Server;

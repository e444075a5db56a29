use std::{backtrace::Backtrace, net::SocketAddr};

use snafu::{IntoError, Snafu};

use crate::proto::{ProtoError, Rep};

pub mod net;
pub mod proto;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "server")]
pub mod server;

pub use gale_core::types::Address;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
	Proto {
		source:    ProtoError,
		backtrace: Backtrace,
	},
	Io {
		source:    std::io::Error,
		backtrace: Backtrace,
	},
	#[snafu(display("Operation timed out"))]
	Timeout,
	#[snafu(display("Operation cancelled"))]
	Cancelled,
	#[snafu(display("Connection closed by peer"))]
	Eof,
	#[snafu(display("Authentication failure"))]
	AuthFailure,
	#[snafu(display("General SOCKS5 failure"))]
	GeneralFailure,
	#[snafu(display("Proxy rejected the request: {rep:?}"))]
	Rejected {
		rep:       Rep,
		backtrace: Backtrace,
	},
	#[snafu(display("Empty or invalid address"))]
	InvalidAddress,
	#[snafu(display("Invalid SOCKS5 datagram"))]
	InvalidDatagram,
	#[snafu(display("Datagram payload doesn't fit a single SOCKS5 UDP packet"))]
	DatagramTooLarge,
	#[snafu(display("Unable to resolve domain {domain}"))]
	DomainResolve {
		domain:    String,
		backtrace: Backtrace,
	},
	#[snafu(display("Unable to bind socket on {socket_addr}"))]
	BindSocket {
		socket_addr: SocketAddr,
		source:      std::io::Error,
		backtrace:   Backtrace,
	},
	#[snafu(display("Listener address {addr} isn't usable, the wildcard IP isn't supported"))]
	InvalidListener {
		addr:      SocketAddr,
		backtrace: Backtrace,
	},
}

impl From<ProtoError> for Error {
	#[inline(always)]
	fn from(value: ProtoError) -> Self {
		ProtoSnafu.into_error(value)
	}
}

impl From<std::io::Error> for Error {
	#[inline(always)]
	fn from(value: std::io::Error) -> Self {
		IoSnafu.into_error(value)
	}
}

impl Error {
	/// Error a SOCKS5 client reports for a failure `REP` in a proxy reply.
	pub(crate) fn from_rep(rep: Rep) -> Self {
		match rep {
			Rep::GeneralFailure => GeneralFailureSnafu.build(),
			rep => RejectedSnafu { rep }.build(),
		}
	}
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

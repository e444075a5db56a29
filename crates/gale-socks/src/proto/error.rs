use std::{backtrace::Backtrace, str::Utf8Error};

use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProtoError {
	#[snafu(display("Unexpected version {current}, expected {expect}"))]
	VersionMismatch {
		expect:    u8,
		current:   u8,
		backtrace: Backtrace,
	},
	#[snafu(display("Unable to decode address due to type {value}"))]
	UnknownAddressType {
		value:     u8,
		backtrace: Backtrace,
	},
	FailParseDomain {
		// HEX
		raw:       String,
		source:    Utf8Error,
		backtrace: Backtrace,
	},
	DomainTooLong {
		domain:    String,
		backtrace: Backtrace,
	},
	EmptyDomain {
		backtrace: Backtrace,
	},
	#[snafu(display("Username or password longer than {max} bytes"))]
	CredentialTooLong {
		max:       usize,
		backtrace: Backtrace,
	},
	#[snafu(display("Credentials must be valid UTF-8"))]
	CredentialNotUtf8 {
		source:    Utf8Error,
		backtrace: Backtrace,
	},
	#[snafu(display("A greeting advertises at most 255 methods"))]
	TooManyMethods {
		backtrace: Backtrace,
	},
	#[snafu(display("Datagram too short for its SOCKS5 header"))]
	TruncatedDatagram {
		backtrace: Backtrace,
	},
	#[snafu(display("Datagram reserved field must be zero"))]
	NonZeroReserved {
		backtrace: Backtrace,
	},
	// Caller should yield
	BytesRemaining,
	Io {
		source:    std::io::Error,
		backtrace: Backtrace,
	},
}

impl From<std::io::Error> for ProtoError {
	#[inline(always)]
	fn from(_source: std::io::Error) -> Self {
		#[cfg(debug_assertions)]
		panic!("IO error should not be created by From<io::Error>");
		#[cfg(not(debug_assertions))]
		{
			use snafu::IntoError as _;
			IoSnafu.into_error(_source)
		}
	}
}

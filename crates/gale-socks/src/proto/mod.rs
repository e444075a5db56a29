mod error;
pub use error::*;

mod addr;
pub use addr::*;

mod greeting;
pub use greeting::*;

mod request;
pub use request::*;

mod user_auth;
pub use user_auth::*;

mod datagram;
pub use datagram::*;

use num_enum::{FromPrimitive, IntoPrimitive};

/// SOCKS protocol version, RFC 1928 §3.
pub const VER: u8 = 0x05;

/// Username/Password subnegotiation version, RFC 1929 §2.
pub const USER_AUTH_VER: u8 = 0x01;

/// Largest UDP payload an IPv4 datagram can carry; packets above this are
/// never accepted or emitted.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Authentication method ids, RFC 1928 §3.
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
	None   = 0x00,
	Gssapi = 0x01,
	User   = 0x02,
	Deny   = 0xFF,
	#[num_enum(catch_all)]
	Other(u8) = 0x03,
}

/// Client command ids, RFC 1928 §4.
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
	Connect      = 0x01,
	Bind         = 0x02,
	UdpAssociate = 0x03,
	#[num_enum(catch_all)]
	Other(u8),
}

/// Proxy reply status to a client request, RFC 1928 §6.
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Rep {
	Success                 = 0x00,
	GeneralFailure          = 0x01,
	NotAllowed              = 0x02,
	NetworkUnreachable      = 0x03,
	HostUnreachable         = 0x04,
	ConnectionRefused       = 0x05,
	TtlExpired              = 0x06,
	CommandNotSupported     = 0x07,
	AddressTypeNotSupported = 0x08,
	#[num_enum(catch_all)]
	Other(u8),
}

/// Username/Password subnegotiation status, RFC 1929 §2.
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UserAuthStatus {
	Success = 0x00,
	Failure = 0x01,
	#[num_enum(catch_all)]
	Other(u8),
}

use std::{
	fmt,
	net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
	str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Longest domain name representable in a SOCKS5 address (one length octet).
pub const MAX_DOMAIN_LEN: usize = 255;

/// An IPv4/IPv6 address or a domain name, always paired with a port.
///
/// This is the canonical in-memory form used by requests, replies and the
/// UDP relay's target table. All three variants take part in `Eq`/`Hash` so
/// the type can key a map directly.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
	Domain(String, u16),
	IPv4(Ipv4Addr, u16),
	IPv6(Ipv6Addr, u16),
}

impl Address {
	pub fn port(&self) -> u16 {
		match self {
			Address::Domain(_, port) | Address::IPv4(_, port) | Address::IPv6(_, port) => *port,
		}
	}

	pub fn is_ip(&self) -> bool {
		matches!(self, Address::IPv4(..) | Address::IPv6(..))
	}

	pub fn is_domain(&self) -> bool {
		matches!(self, Address::Domain(..))
	}

	/// Domain name view, `None` for the IP variants.
	pub fn domain(&self) -> Option<&str> {
		match self {
			Address::Domain(domain, _) => Some(domain),
			_ => None,
		}
	}

	/// Native endpoint for the IP variants. Domain names need resolving and
	/// return `None`.
	pub fn to_socket_addr(&self) -> Option<SocketAddr> {
		match self {
			Address::IPv4(ip, port) => Some(SocketAddr::from((*ip, *port))),
			Address::IPv6(ip, port) => Some(SocketAddr::from((*ip, *port))),
			Address::Domain(..) => None,
		}
	}

	/// True when the address is an all-zero IP. Domains are never unspecified.
	pub fn is_unspecified(&self) -> bool {
		match self {
			Address::IPv4(ip, _) => ip.is_unspecified(),
			Address::IPv6(ip, _) => ip.is_unspecified(),
			Address::Domain(..) => false,
		}
	}
}

impl From<SocketAddr> for Address {
	fn from(value: SocketAddr) -> Self {
		match value.ip() {
			IpAddr::V4(ip) => Address::IPv4(ip, value.port()),
			IpAddr::V6(ip) => Address::IPv6(ip, value.port()),
		}
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Address::Domain(domain, port) => write!(f, "{domain}:{port}"),
			Address::IPv4(ip, port) => write!(f, "{ip}:{port}"),
			Address::IPv6(ip, port) => write!(f, "[{ip}]:{port}"),
		}
	}
}

/// Error parsing a `host:port` string into an [`Address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAddressError;

impl fmt::Display for ParseAddressError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("invalid address, expected `host:port` with host of 1..=255 bytes")
	}
}

impl std::error::Error for ParseAddressError {}

impl FromStr for Address {
	type Err = ParseAddressError;

	/// Parses `host:port`. IP literals (including `[v6]:port`) become the IP
	/// variants, anything else becomes a domain name.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Ok(socket_addr) = s.parse::<SocketAddr>() {
			return Ok(socket_addr.into());
		}
		let (host, port) = s.rsplit_once(':').ok_or(ParseAddressError)?;
		let port = port.parse::<u16>().map_err(|_| ParseAddressError)?;
		if host.is_empty() || host.len() > MAX_DOMAIN_LEN {
			return Err(ParseAddressError);
		}
		Ok(Address::Domain(host.to_owned(), port))
	}
}

#[cfg(test)]
mod test {
	use std::net::{Ipv4Addr, Ipv6Addr};

	use super::Address;

	#[test]
	fn parse_roundtrip() {
		let vars = [
			("127.0.0.1:1080", Address::IPv4(Ipv4Addr::LOCALHOST, 1080)),
			("[::1]:443", Address::IPv6(Ipv6Addr::LOCALHOST, 443)),
			("example.com:80", Address::Domain(String::from("example.com"), 80)),
		];
		for (text, addr) in vars {
			assert_eq!(text.parse::<Address>().unwrap(), addr);
			assert_eq!(addr.to_string(), text);
		}
	}

	#[test]
	fn parse_rejects_garbage() {
		assert!("no-port".parse::<Address>().is_err());
		assert!(":80".parse::<Address>().is_err());
		assert!("host:notaport".parse::<Address>().is_err());
		assert!(format!("{}:1", "x".repeat(256)).parse::<Address>().is_err());
	}

	#[test]
	fn unspecified() {
		assert!("0.0.0.0:0".parse::<Address>().unwrap().is_unspecified());
		assert!("[::]:9".parse::<Address>().unwrap().is_unspecified());
		assert!(!"127.0.0.1:9".parse::<Address>().unwrap().is_unspecified());
		assert!(!Address::Domain(String::from("zero.invalid"), 0).is_unspecified());
	}

	#[test]
	fn serde_roundtrip() {
		let vars = [
			Address::IPv4(Ipv4Addr::LOCALHOST, 1080),
			Address::Domain(String::from("example.com"), 80),
		];
		for addr in vars {
			let json = serde_json::to_string(&addr).unwrap();
			let back: Address = serde_json::from_str(&json).unwrap();
			assert_eq!(addr, back);
		}
	}

	#[test]
	fn socket_addr_conversion() {
		let addr = Address::IPv4(Ipv4Addr::new(10, 0, 0, 1), 8080);
		assert_eq!(addr.to_socket_addr().unwrap().port(), 8080);
		assert!(Address::Domain(String::from("a.example"), 1).to_socket_addr().is_none());
	}
}

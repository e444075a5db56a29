use bytes::{BufMut, BytesMut};
use gale_core::types::Address;
use snafu::ensure;
use tokio_util::codec::Encoder;

use crate::proto::{
	AddrType, AddressCodec, MAX_DATAGRAM_LEN, NonZeroReservedSnafu, ProtoError,
	TruncatedDatagramSnafu, addr,
};

// RSV(2) + FRAG(1), the fixed prefix before the address.
const PREFIX_LEN: usize = 3;

/// A parsed SOCKS5 UDP datagram, RFC 1928 §7.
///
/// The payload is a view into the receive buffer, so the hot relay path
/// never copies the data while inspecting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram<'a> {
	pub frag:    u8,
	pub addr:    Address,
	pub payload: &'a [u8],
}

impl<'a> Datagram<'a> {
	/// Cheap length screen run before [`Datagram::parse`]: the buffer must
	/// hold the complete header for its ATYP plus at least one payload byte.
	/// Unknown ATYPs fail the screen.
	pub fn validate(buf: &[u8]) -> bool {
		if buf.len() < PREFIX_LEN + 1 {
			return false;
		}
		let header_len = match AddrType::from(buf[PREFIX_LEN]) {
			AddrType::IPv4 => PREFIX_LEN + 1 + 4 + 2,
			AddrType::IPv6 => PREFIX_LEN + 1 + 16 + 2,
			AddrType::Domain => {
				let Some(&domain_len) = buf.get(PREFIX_LEN + 1) else {
					return false;
				};
				PREFIX_LEN + 1 + 1 + domain_len as usize + 2
			}
			AddrType::Other(..) => return false,
		};
		buf.len() > header_len
	}

	/// Parses the datagram header and returns the payload as a slice view.
	pub fn parse(buf: &'a [u8]) -> Result<Self, ProtoError> {
		ensure!(buf.len() >= PREFIX_LEN + 1, TruncatedDatagramSnafu);
		ensure!(buf[0] == 0 && buf[1] == 0, NonZeroReservedSnafu);
		let frag = buf[2];
		let Some((address, addr_len)) = addr::decode_slice(&buf[PREFIX_LEN..])? else {
			return TruncatedDatagramSnafu.fail();
		};
		Ok(Datagram {
			frag,
			addr: address,
			payload: &buf[PREFIX_LEN + addr_len..],
		})
	}

	/// Appends the `RSV, FRAG=0, ADDR` header for `addr` to `dst`. The relay
	/// appends the payload afterwards and sends header plus payload as one
	/// datagram.
	pub fn header_into(addr: &Address, dst: &mut BytesMut) -> Result<(), ProtoError> {
		dst.reserve(PREFIX_LEN);
		dst.put_slice(&[0, 0, 0]);
		AddressCodec.encode(addr, dst)
	}

	/// Serialized length of the header for `addr`, used to size send buffers
	/// and to cap payload length.
	pub fn header_len(addr: &Address) -> usize {
		let addr_len = match addr {
			Address::IPv4(..) => 1 + 4 + 2,
			Address::IPv6(..) => 1 + 16 + 2,
			Address::Domain(domain, _) => 1 + 1 + domain.len() + 2,
		};
		PREFIX_LEN + addr_len
	}
}

/// Room left for payload in a datagram addressed to `addr`.
pub fn max_payload_len(addr: &Address) -> usize {
	MAX_DATAGRAM_LEN.saturating_sub(Datagram::header_len(addr))
}

#[cfg(test)]
mod test {
	use std::net::{Ipv4Addr, Ipv6Addr};

	use bytes::BytesMut;
	use gale_core::types::Address;

	use super::Datagram;
	use crate::proto::ProtoError;

	fn encode(addr: &Address, payload: &[u8]) -> BytesMut {
		let mut buf = BytesMut::new();
		Datagram::header_into(addr, &mut buf).unwrap();
		buf.extend_from_slice(payload);
		buf
	}

	#[test]
	fn parse_roundtrip_every_atyp() -> eyre::Result<()> {
		let vars = vec![
			Address::IPv4(Ipv4Addr::LOCALHOST, 1080),
			Address::IPv6(Ipv6Addr::LOCALHOST, 53),
			Address::Domain(String::from("example.com"), 4433),
		];
		for addr in vars {
			let wire = encode(&addr, b"payload");
			assert!(Datagram::validate(&wire));
			let datagram = Datagram::parse(&wire)?;
			assert_eq!(datagram.frag, 0);
			assert_eq!(datagram.addr, addr);
			assert_eq!(datagram.payload, b"payload");
			assert_eq!(wire.len(), Datagram::header_len(&addr) + b"payload".len());
		}
		Ok(())
	}

	#[test]
	fn validate_requires_payload() {
		let addr = Address::IPv4(Ipv4Addr::LOCALHOST, 9);
		// Bare header, not a single payload byte.
		let wire = encode(&addr, b"");
		assert!(!Datagram::validate(&wire));
		let wire = encode(&addr, b"x");
		assert!(Datagram::validate(&wire));
	}

	#[test]
	fn validate_boundaries() {
		// Too short for the fixed prefix.
		assert!(!Datagram::validate(&[0, 0, 0]));
		// Unknown ATYP.
		assert!(!Datagram::validate(&[0, 0, 0, 0x7F, 1, 2, 3, 4, 0, 9, b'x']));
		// Domain announces more bytes than present.
		assert!(!Datagram::validate(&[0, 0, 0, 0x03, 10, b'a', b'b', 0, 9, b'x']));
		// IPv6 header cut short.
		let mut short_v6 = vec![0, 0, 0, 0x04];
		short_v6.extend_from_slice(&[0u8; 10]);
		assert!(!Datagram::validate(&short_v6));
	}

	#[test]
	fn parse_rejects_nonzero_reserved() {
		let addr = Address::IPv4(Ipv4Addr::LOCALHOST, 9);
		let mut wire = encode(&addr, b"x");
		wire[1] = 1;
		assert!(matches!(
			Datagram::parse(&wire),
			Err(ProtoError::NonZeroReserved { .. })
		));
	}

	#[test]
	fn parse_keeps_frag_value() -> eyre::Result<()> {
		let addr = Address::IPv4(Ipv4Addr::LOCALHOST, 9);
		let mut wire = encode(&addr, b"x");
		wire[2] = 3;
		assert_eq!(Datagram::parse(&wire)?.frag, 3);
		Ok(())
	}
}

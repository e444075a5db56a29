use std::{
	net::{Ipv4Addr, Ipv6Addr},
	str,
};

use bytes::{Buf, BufMut};
use gale_core::types::{Address, MAX_DOMAIN_LEN};
use num_enum::{FromPrimitive, IntoPrimitive};
use snafu::ResultExt;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	BytesRemainingSnafu, DomainTooLongSnafu, EmptyDomainSnafu, FailParseDomainSnafu, ProtoError,
	UnknownAddressTypeSnafu,
};

/// Codec for the SOCKS5 on-wire address form `ATYP, addr-bytes, port`,
/// shared by requests, replies and the UDP datagram header.
#[derive(Debug, Clone, Copy)]
pub struct AddressCodec;

/// Address type indicators, RFC 1928 §5.
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AddrType {
	IPv4   = 0x01,
	Domain = 0x03,
	IPv6   = 0x04,
	#[num_enum(catch_all)]
	Other(u8),
}

impl From<&Address> for AddrType {
	fn from(value: &Address) -> Self {
		match value {
			Address::IPv4(..) => AddrType::IPv4,
			Address::Domain(..) => AddrType::Domain,
			Address::IPv6(..) => AddrType::IPv6,
		}
	}
}

/// Total wire length of the address starting at `src[0]` (the ATYP byte),
/// or `None` while too few bytes arrived to know.
pub(crate) fn wire_len(src: &[u8]) -> Result<Option<usize>, ProtoError> {
	let Some(&atyp) = src.first() else {
		return Ok(None);
	};
	match AddrType::from(atyp) {
		AddrType::IPv4 => Ok(Some(1 + 4 + 2)),
		AddrType::IPv6 => Ok(Some(1 + 16 + 2)),
		AddrType::Domain => match src.get(1) {
			Some(&len) => Ok(Some(1 + 1 + len as usize + 2)),
			None => Ok(None),
		},
		AddrType::Other(value) => UnknownAddressTypeSnafu { value }.fail(),
	}
}

/// Decodes an address from a plain slice, returning it together with the
/// number of consumed bytes. `Ok(None)` means more bytes are needed.
pub(crate) fn decode_slice(src: &[u8]) -> Result<Option<(Address, usize)>, ProtoError> {
	let Some(len) = wire_len(src)? else {
		return Ok(None);
	};
	if src.len() < len {
		return Ok(None);
	}
	let addr = match AddrType::from(src[0]) {
		AddrType::IPv4 => {
			let mut octets = [0; 4];
			octets.copy_from_slice(&src[1..5]);
			let port = u16::from_be_bytes([src[5], src[6]]);
			Address::IPv4(Ipv4Addr::from(octets), port)
		}
		AddrType::IPv6 => {
			let mut octets = [0; 16];
			octets.copy_from_slice(&src[1..17]);
			let port = u16::from_be_bytes([src[17], src[18]]);
			Address::IPv6(Ipv6Addr::from(octets), port)
		}
		AddrType::Domain => {
			let domain_len = src[1] as usize;
			if domain_len == 0 {
				return EmptyDomainSnafu.fail();
			}
			let domain = &src[2..2 + domain_len];
			let domain = str::from_utf8(domain)
				.context(FailParseDomainSnafu {
					raw: hex::encode(domain),
				})?
				.to_string();
			let port = u16::from_be_bytes([src[2 + domain_len], src[3 + domain_len]]);
			Address::Domain(domain, port)
		}
		// wire_len already rejected unknown types.
		AddrType::Other(..) => unreachable!(),
	};
	Ok(Some((addr, len)))
}

impl Decoder for AddressCodec {
	type Error = ProtoError;
	type Item = Address;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match decode_slice(src)? {
			Some((addr, len)) => {
				src.advance(len);
				Ok(Some(addr))
			}
			None => Ok(None),
		}
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<&Address> for AddressCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: &Address, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		match item {
			Address::IPv4(ip, port) => {
				dst.reserve(1 + 4 + 2);
				dst.put_u8(AddrType::IPv4.into());
				dst.put_slice(&ip.octets());
				dst.put_u16(*port);
			}
			Address::IPv6(ip, port) => {
				dst.reserve(1 + 16 + 2);
				dst.put_u8(AddrType::IPv6.into());
				dst.put_slice(&ip.octets());
				dst.put_u16(*port);
			}
			Address::Domain(domain, port) => {
				if domain.is_empty() {
					return EmptyDomainSnafu.fail();
				}
				if domain.len() > MAX_DOMAIN_LEN {
					return DomainTooLongSnafu { domain: domain.clone() }.fail();
				}
				dst.reserve(1 + 1 + domain.len() + 2);
				dst.put_u8(AddrType::Domain.into());
				dst.put_u8(domain.len() as u8);
				dst.put_slice(domain.as_bytes());
				dst.put_u16(*port);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use std::net::{Ipv4Addr, Ipv6Addr};

	use futures_util::SinkExt as _;
	use gale_core::types::Address;
	use tokio_stream::StreamExt as _;
	use tokio_util::codec::{FramedRead, FramedWrite};

	use super::AddressCodec;
	use crate::proto::ProtoError;

	/// Usual test
	#[tokio::test]
	async fn test_addr_1() -> eyre::Result<()> {
		let buffer = Vec::with_capacity(128);
		let vars = vec![
			Address::IPv4(Ipv4Addr::LOCALHOST, 1080),
			Address::IPv6(Ipv6Addr::UNSPECIFIED, 12),
			Address::Domain(String::from("www.google.com"), 443),
		];

		let mut writer = FramedWrite::new(buffer, AddressCodec);
		let mut expect_len = 0;
		for var in &vars {
			match var {
				Address::Domain(domain, _) => expect_len = expect_len + 1 + 1 + domain.len() + 2,
				Address::IPv4(..) => expect_len = expect_len + 1 + 4 + 2,
				Address::IPv6(..) => expect_len = expect_len + 1 + 16 + 2,
			}
			writer.send(var).await?;
			assert_eq!(writer.get_ref().len(), expect_len);
		}

		let buffer = writer.get_ref();
		let mut reader = FramedRead::new(buffer.as_slice(), AddressCodec);
		for var in vars {
			let frame = reader.next().await.unwrap()?;
			assert_eq!(var, frame);
		}
		Ok(())
	}

	/// Data not fully arrive
	#[tokio::test]
	async fn test_addr_2() -> eyre::Result<()> {
		let vars = vec![
			Address::IPv4(Ipv4Addr::LOCALHOST, 1080),
			Address::IPv6(Ipv6Addr::UNSPECIFIED, 12),
			Address::Domain(String::from("www.google.com"), 443),
		];
		for addr in vars {
			let buffer = Vec::with_capacity(128);
			let mut writer = FramedWrite::new(buffer, AddressCodec);
			writer.send(&addr).await?;
			let mut buffer = writer.into_inner();
			let full_len = buffer.len();
			let mut half_b = buffer.split_off(full_len / 2);
			let mut half_a = buffer;
			{
				let mut reader = FramedRead::new(half_a.as_slice(), AddressCodec);
				assert!(matches!(
					reader.next().await.unwrap().unwrap_err(),
					ProtoError::BytesRemaining
				));
			}
			half_a.append(&mut half_b);
			let mut reader = FramedRead::new(half_a.as_slice(), AddressCodec);
			assert_eq!(reader.next().await.unwrap()?, addr);
		}

		Ok(())
	}

	#[tokio::test]
	async fn rejects_unknown_atyp() {
		let bytes = [0x02u8, 127, 0, 0, 1, 0, 80];
		let mut reader = FramedRead::new(bytes.as_slice(), AddressCodec);
		assert!(matches!(
			reader.next().await.unwrap().unwrap_err(),
			ProtoError::UnknownAddressType { value: 0x02, .. }
		));
	}

	#[tokio::test]
	async fn rejects_empty_domain() {
		let bytes = [0x03u8, 0, 0, 80];
		let mut reader = FramedRead::new(bytes.as_slice(), AddressCodec);
		assert!(matches!(
			reader.next().await.unwrap().unwrap_err(),
			ProtoError::EmptyDomain { .. }
		));
	}

	#[tokio::test]
	async fn rejects_oversize_domain_on_encode() {
		let addr = Address::Domain("x".repeat(256), 80);
		let mut writer = FramedWrite::new(Vec::new(), AddressCodec);
		assert!(matches!(
			writer.send(&addr).await.unwrap_err(),
			ProtoError::DomainTooLong { .. }
		));
	}
}

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut};
use gale_core::types::Address;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	AddressCodec, BytesRemainingSnafu, Cmd, ProtoError, Rep, VER, VersionMismatchSnafu, addr,
};

/// Client request to the proxy, RFC 1928 §4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
	pub cmd:  Cmd,
	pub addr: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestCodec;

/// Proxy reply to a [`Request`], RFC 1928 §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
	pub rep:  Rep,
	pub addr: Address,
}

impl Reply {
	pub fn success(addr: Address) -> Self {
		Self { rep: Rep::Success, addr }
	}

	/// Failure reply echoing the request's address family with a zeroed
	/// `BND_ADDR`. Domain requests answer with a zero IPv4 address since a
	/// domain carries no meaningful "empty" form.
	pub fn rejection(rep: Rep, request_addr: &Address) -> Self {
		let addr = match request_addr {
			Address::IPv6(..) => Address::IPv6(Ipv6Addr::UNSPECIFIED, 0),
			Address::IPv4(..) | Address::Domain(..) => Address::IPv4(Ipv4Addr::UNSPECIFIED, 0),
		};
		Self { rep, addr }
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ReplyCodec;

// VER, code, RSV and then the variable-length address. Request and Reply
// share the frame shape, only the second byte differs in meaning.
fn decode_frame(src: &mut bytes::BytesMut) -> Result<Option<(u8, Address)>, ProtoError> {
	if src.len() < 3 {
		return Ok(None);
	}
	let current = src[0];
	snafu::ensure!(current == VER, VersionMismatchSnafu { expect: VER, current });
	let Some(addr_len) = addr::wire_len(&src[3..])? else {
		return Ok(None);
	};
	if src.len() < 3 + addr_len {
		return Ok(None);
	}
	src.advance(1);
	let code = src.get_u8();
	// RSV, ignored on read.
	src.advance(1);
	match AddressCodec.decode(src)? {
		Some(address) => Ok(Some((code, address))),
		// Length was pre-checked above.
		None => unreachable!(),
	}
}

fn encode_frame(code: u8, address: &Address, dst: &mut bytes::BytesMut) -> Result<(), ProtoError> {
	dst.reserve(3);
	dst.put_u8(VER);
	dst.put_u8(code);
	dst.put_u8(0x00);
	AddressCodec.encode(address, dst)
}

impl Decoder for RequestCodec {
	type Error = ProtoError;
	type Item = Request;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		Ok(decode_frame(src)?.map(|(cmd, addr)| Request {
			cmd: Cmd::from(cmd),
			addr,
		}))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<&Request> for RequestCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: &Request, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		encode_frame(item.cmd.into(), &item.addr, dst)
	}
}

impl Decoder for ReplyCodec {
	type Error = ProtoError;
	type Item = Reply;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		Ok(decode_frame(src)?.map(|(rep, addr)| Reply {
			rep: Rep::from(rep),
			addr,
		}))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<&Reply> for ReplyCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: &Reply, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		encode_frame(item.rep.into(), &item.addr, dst)
	}
}

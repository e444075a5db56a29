use std::str;

use bytes::{Buf, BufMut};
use snafu::ResultExt;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	BytesRemainingSnafu, CredentialNotUtf8Snafu, CredentialTooLongSnafu, ProtoError,
	USER_AUTH_VER, UserAuthStatus, VersionMismatchSnafu,
};

/// Longest username or password the one-octet `ULEN`/`PLEN` fields can carry.
pub const MAX_CREDENTIAL_LEN: usize = 255;

/// Credentials sent by the client during the RFC 1929 subnegotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAuthRequest {
	pub username: String,
	pub password: String,
}

#[derive(Debug, Clone, Copy)]
pub struct UserAuthRequestCodec;

impl Decoder for UserAuthRequestCodec {
	type Error = ProtoError;
	type Item = UserAuthRequest;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 2 {
			return Ok(None);
		}
		let current = src[0];
		snafu::ensure!(
			current == USER_AUTH_VER,
			VersionMismatchSnafu {
				expect: USER_AUTH_VER,
				current
			}
		);
		let ulen = src[1] as usize;
		let Some(&plen) = src.get(2 + ulen) else {
			return Ok(None);
		};
		let plen = plen as usize;
		if src.len() < 2 + ulen + 1 + plen {
			return Ok(None);
		}
		src.advance(2);
		let username = take_credential(src, ulen)?;
		src.advance(1);
		let password = take_credential(src, plen)?;
		Ok(Some(UserAuthRequest { username, password }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

fn take_credential(src: &mut bytes::BytesMut, len: usize) -> Result<String, ProtoError> {
	let raw = src.split_to(len);
	let value = str::from_utf8(&raw).context(CredentialNotUtf8Snafu)?;
	Ok(value.to_string())
}

impl Encoder<&UserAuthRequest> for UserAuthRequestCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: &UserAuthRequest, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		snafu::ensure!(
			item.username.len() <= MAX_CREDENTIAL_LEN && item.password.len() <= MAX_CREDENTIAL_LEN,
			CredentialTooLongSnafu {
				max: MAX_CREDENTIAL_LEN
			}
		);
		dst.reserve(2 + item.username.len() + 1 + item.password.len());
		dst.put_u8(USER_AUTH_VER);
		dst.put_u8(item.username.len() as u8);
		dst.put_slice(item.username.as_bytes());
		dst.put_u8(item.password.len() as u8);
		dst.put_slice(item.password.as_bytes());
		Ok(())
	}
}

/// The proxy's verdict on a [`UserAuthRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAuthResponse {
	pub status: UserAuthStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct UserAuthResponseCodec;

impl Decoder for UserAuthResponseCodec {
	type Error = ProtoError;
	type Item = UserAuthResponse;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 2 {
			return Ok(None);
		}
		let current = src.get_u8();
		snafu::ensure!(
			current == USER_AUTH_VER,
			VersionMismatchSnafu {
				expect: USER_AUTH_VER,
				current
			}
		);
		Ok(Some(UserAuthResponse {
			status: UserAuthStatus::from(src.get_u8()),
		}))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<UserAuthResponse> for UserAuthResponseCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: UserAuthResponse, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		dst.reserve(2);
		dst.put_u8(USER_AUTH_VER);
		dst.put_u8(item.status.into());
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use futures_util::SinkExt as _;
	use tokio_stream::StreamExt as _;
	use tokio_util::codec::{FramedRead, FramedWrite};

	use super::{UserAuthRequest, UserAuthRequestCodec, UserAuthResponse, UserAuthResponseCodec};
	use crate::proto::{ProtoError, UserAuthStatus};

	#[tokio::test]
	async fn request_roundtrip() -> eyre::Result<()> {
		let request = UserAuthRequest {
			username: String::from("user"),
			password: String::from("pass"),
		};
		let mut writer = FramedWrite::new(Vec::new(), UserAuthRequestCodec);
		writer.send(&request).await?;
		assert_eq!(
			writer.get_ref().as_slice(),
			&[0x01, 0x04, b'u', b's', b'e', b'r', 0x04, b'p', b'a', b's', b's']
		);
		let buffer = writer.into_inner();
		let mut reader = FramedRead::new(buffer.as_slice(), UserAuthRequestCodec);
		assert_eq!(reader.next().await.unwrap()?, request);
		Ok(())
	}

	#[tokio::test]
	async fn request_partial_waits() -> eyre::Result<()> {
		let request = UserAuthRequest {
			username: String::from("somebody"),
			password: String::from("secretive"),
		};
		let mut writer = FramedWrite::new(Vec::new(), UserAuthRequestCodec);
		writer.send(&request).await?;
		let mut buffer = writer.into_inner();
		let mut half_b = buffer.split_off(buffer.len() / 2);
		let mut half_a = buffer;
		{
			let mut reader = FramedRead::new(half_a.as_slice(), UserAuthRequestCodec);
			assert!(matches!(
				reader.next().await.unwrap().unwrap_err(),
				ProtoError::BytesRemaining
			));
		}
		half_a.append(&mut half_b);
		let mut reader = FramedRead::new(half_a.as_slice(), UserAuthRequestCodec);
		assert_eq!(reader.next().await.unwrap()?, request);
		Ok(())
	}

	#[tokio::test]
	async fn request_rejects_oversize_credentials() {
		let request = UserAuthRequest {
			username: "u".repeat(256),
			password: String::from("p"),
		};
		let mut writer = FramedWrite::new(Vec::new(), UserAuthRequestCodec);
		assert!(matches!(
			writer.send(&request).await.unwrap_err(),
			ProtoError::CredentialTooLong { .. }
		));
	}

	#[tokio::test]
	async fn response_roundtrip() -> eyre::Result<()> {
		for status in [UserAuthStatus::Success, UserAuthStatus::Failure] {
			let mut writer = FramedWrite::new(Vec::new(), UserAuthResponseCodec);
			writer.send(UserAuthResponse { status }).await?;
			let buffer = writer.into_inner();
			let mut reader = FramedRead::new(buffer.as_slice(), UserAuthResponseCodec);
			assert_eq!(reader.next().await.unwrap()?, UserAuthResponse { status });
		}
		Ok(())
	}

	#[tokio::test]
	async fn response_rejects_wrong_version() {
		let bytes = [0x05u8, 0x00];
		let mut reader = FramedRead::new(bytes.as_slice(), UserAuthResponseCodec);
		assert!(matches!(
			reader.next().await.unwrap().unwrap_err(),
			ProtoError::VersionMismatch { current: 0x05, .. }
		));
	}
}

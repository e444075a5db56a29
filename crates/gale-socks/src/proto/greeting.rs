use bytes::{Buf, BufMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	AuthMethod, BytesRemainingSnafu, ProtoError, TooManyMethodsSnafu, VER, VersionMismatchSnafu,
};

/// The first message of a session: the client advertises its supported
/// authentication methods. RFC 1928 §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
	pub methods: Vec<AuthMethod>,
}

#[derive(Debug, Clone, Copy)]
pub struct GreetingCodec;

impl Decoder for GreetingCodec {
	type Error = ProtoError;
	type Item = Greeting;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 2 {
			return Ok(None);
		}
		let current = src[0];
		snafu::ensure!(current == VER, VersionMismatchSnafu { expect: VER, current });
		let nmethods = src[1] as usize;
		if src.len() < 2 + nmethods {
			return Ok(None);
		}
		src.advance(2);
		let methods = src.split_to(nmethods).iter().map(|&m| AuthMethod::from(m)).collect();
		Ok(Some(Greeting { methods }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<&Greeting> for GreetingCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: &Greeting, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		snafu::ensure!(item.methods.len() <= u8::MAX as usize, TooManyMethodsSnafu);
		dst.reserve(2 + item.methods.len());
		dst.put_u8(VER);
		dst.put_u8(item.methods.len() as u8);
		for method in &item.methods {
			dst.put_u8((*method).into());
		}
		Ok(())
	}
}

/// The proxy's answer to a [`Greeting`]: the single method it selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
	pub method: AuthMethod,
}

#[derive(Debug, Clone, Copy)]
pub struct ChoiceCodec;

impl Decoder for ChoiceCodec {
	type Error = ProtoError;
	type Item = Choice;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 2 {
			return Ok(None);
		}
		let current = src.get_u8();
		snafu::ensure!(current == VER, VersionMismatchSnafu { expect: VER, current });
		Ok(Some(Choice {
			method: AuthMethod::from(src.get_u8()),
		}))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<Choice> for ChoiceCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: Choice, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		dst.reserve(2);
		dst.put_u8(VER);
		dst.put_u8(item.method.into());
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use futures_util::SinkExt as _;
	use tokio_stream::StreamExt as _;
	use tokio_util::codec::{FramedRead, FramedWrite};

	use super::{Choice, ChoiceCodec, Greeting, GreetingCodec};
	use crate::proto::{AuthMethod, ProtoError};

	#[tokio::test]
	async fn greeting_roundtrip() -> eyre::Result<()> {
		let vars = vec![
			Greeting { methods: vec![] },
			Greeting {
				methods: vec![AuthMethod::None],
			},
			Greeting {
				methods: vec![AuthMethod::None, AuthMethod::User],
			},
			Greeting {
				methods: vec![AuthMethod::Gssapi, AuthMethod::Other(0x42)],
			},
		];
		for greeting in vars {
			let mut writer = FramedWrite::new(Vec::new(), GreetingCodec);
			writer.send(&greeting).await?;
			assert_eq!(writer.get_ref().len(), 2 + greeting.methods.len());
			assert_eq!(writer.get_ref()[0], 0x05);
			let buffer = writer.into_inner();
			let mut reader = FramedRead::new(buffer.as_slice(), GreetingCodec);
			assert_eq!(reader.next().await.unwrap()?, greeting);
		}
		Ok(())
	}

	#[tokio::test]
	async fn greeting_rejects_wrong_version() {
		let bytes = [0x04u8, 0x01, 0x00];
		let mut reader = FramedRead::new(bytes.as_slice(), GreetingCodec);
		assert!(matches!(
			reader.next().await.unwrap().unwrap_err(),
			ProtoError::VersionMismatch { current: 0x04, .. }
		));
	}

	#[tokio::test]
	async fn greeting_waits_for_methods() {
		// NMETHODS announces two methods but only one arrived.
		let bytes = [0x05u8, 0x02, 0x00];
		let mut reader = FramedRead::new(bytes.as_slice(), GreetingCodec);
		assert!(matches!(
			reader.next().await.unwrap().unwrap_err(),
			ProtoError::BytesRemaining
		));
	}

	#[tokio::test]
	async fn choice_roundtrip() -> eyre::Result<()> {
		for method in [AuthMethod::None, AuthMethod::User, AuthMethod::Deny] {
			let mut writer = FramedWrite::new(Vec::new(), ChoiceCodec);
			writer.send(Choice { method }).await?;
			assert_eq!(writer.get_ref().len(), 2);
			let buffer = writer.into_inner();
			let mut reader = FramedRead::new(buffer.as_slice(), ChoiceCodec);
			assert_eq!(reader.next().await.unwrap()?, Choice { method });
		}
		Ok(())
	}
}

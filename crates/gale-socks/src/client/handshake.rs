use std::net::SocketAddr;

use bytes::BytesMut;
use gale_core::types::Address;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
	EofSnafu, Error, GeneralFailureSnafu, Result,
	client::auth::{AuthOptions, run_user_auth},
	net,
	proto::{
		AuthMethod, ChoiceCodec, Cmd, Greeting, GreetingCodec, ProtoError, Reply, ReplyCodec,
		Rep, Request, RequestCodec,
	},
};

/// Reads one protocol message from `stream`, feeding `codec` until it
/// yields a frame. Client-side twin of `TcpConn::recv_message`, operating
/// on the caller's plain socket.
pub(crate) async fn recv_message<C>(stream: &mut TcpStream, mut codec: C, buf: &mut BytesMut) -> Result<C::Item>
where
	C: Decoder<Error = ProtoError>,
{
	use tokio::io::AsyncReadExt;
	loop {
		if let Some(item) = codec.decode(buf).map_err(Error::from)? {
			return Ok(item);
		}
		let n = stream.read_buf(buf).await?;
		snafu::ensure!(n > 0, EofSnafu);
	}
}

pub(crate) async fn send_message<C, M>(stream: &mut TcpStream, mut codec: C, message: M) -> Result<()>
where
	C: Encoder<M, Error = ProtoError>,
{
	let mut out = BytesMut::new();
	codec.encode(message, &mut out).map_err(Error::from)?;
	stream.write_all(&out).await?;
	Ok(())
}

/// Greeting/choice exchange plus the selected subnegotiation, RFC 1928 §3.
pub(crate) async fn authenticate(
	stream: &mut TcpStream,
	auth_options: &AuthOptions,
	buf: &mut BytesMut,
) -> Result<()> {
	let greeting = Greeting {
		methods: auth_options.methods(),
	};
	send_message(stream, GreetingCodec, &greeting).await?;
	let choice = recv_message(stream, ChoiceCodec, buf).await?;
	match choice.method {
		AuthMethod::None => Ok(()),
		AuthMethod::User => run_user_auth(stream, auth_options, buf).await,
		// DENY and everything unlisted.
		_ => GeneralFailureSnafu.fail(),
	}
}

pub(crate) async fn send_request(stream: &mut TcpStream, cmd: Cmd, addr: Address) -> Result<()> {
	send_message(stream, RequestCodec, &Request { cmd, addr }).await
}

/// Reads a reply and surfaces failure `REP` values as errors.
pub(crate) async fn recv_reply(stream: &mut TcpStream, buf: &mut BytesMut) -> Result<Reply> {
	let reply = recv_message(stream, ReplyCodec, buf).await?;
	if reply.rep != Rep::Success {
		return Err(Error::from_rep(reply.rep));
	}
	Ok(reply)
}

/// Converts a reply's `BND_ADDR` to a native endpoint, resolving domains.
pub(crate) async fn reply_endpoint(reply: &Reply) -> Result<SocketAddr> {
	net::to_endpoint(&reply.addr).await
}

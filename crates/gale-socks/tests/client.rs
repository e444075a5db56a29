//! Client handshake scenarios against a scripted proxy that speaks raw
//! bytes, so every reply shape the client must handle is exercised exactly.

use std::{future::Future, net::SocketAddr, time::Duration};

use gale_socks::{
	Address, Error,
	client::{self, AuthOptions},
	proto::Rep,
};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream},
	time::timeout,
};

const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds a one-connection proxy that runs `script` on the accepted stream.
async fn scripted_proxy<F, Fut>(script: F) -> eyre::Result<SocketAddr>
where
	F: FnOnce(TcpStream) -> Fut + Send + 'static,
	Fut: Future<Output = eyre::Result<()>> + Send,
{
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let addr = listener.local_addr()?;
	tokio::spawn(async move {
		if let Ok((stream, _)) = listener.accept().await {
			if let Err(err) = script(stream).await {
				eprintln!("scripted proxy failed: {err}");
			}
		}
	});
	Ok(addr)
}

async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) -> eyre::Result<()> {
	let mut received = vec![0u8; expected.len()];
	stream.read_exact(&mut received).await?;
	eyre::ensure!(received == expected, "expected {expected:?}, got {received:?}");
	Ok(())
}

async fn accept_no_auth(stream: &mut TcpStream) -> eyre::Result<()> {
	expect_bytes(stream, &[0x05, 0x01, 0x00]).await?;
	stream.write_all(&[0x05, 0x00]).await?;
	Ok(())
}

#[tokio::test]
async fn connect_succeeds_on_success_reply() -> eyre::Result<()> {
	let proxy = scripted_proxy(|mut stream| async move {
		accept_no_auth(&mut stream).await?;
		expect_bytes(&mut stream, &[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 1, 0x00, 0x50]).await?;
		stream
			.write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
			.await?;
		// Prove the stream is handed back joined: echo one byte.
		let mut one = [0u8; 1];
		stream.read_exact(&mut one).await?;
		stream.write_all(&one).await?;
		Ok(())
	})
	.await?;

	let target = Address::IPv4("10.0.0.1".parse()?, 80);
	let mut stream = client::connect(proxy, target, &AuthOptions::none(), Some(OP_TIMEOUT)).await?;
	stream.write_all(&[0x42]).await?;
	let mut one = [0u8; 1];
	timeout(OP_TIMEOUT, stream.read_exact(&mut one)).await??;
	assert_eq!(one, [0x42]);
	Ok(())
}

#[tokio::test]
async fn connect_surfaces_failure_reps() -> eyre::Result<()> {
	for (rep_byte, expected) in [
		(0x05u8, Some(Rep::ConnectionRefused)),
		(0x04u8, Some(Rep::HostUnreachable)),
		(0x03u8, Some(Rep::NetworkUnreachable)),
		// REP=1 maps to the dedicated general-failure error.
		(0x01u8, None),
	] {
		let proxy = scripted_proxy(move |mut stream| async move {
			accept_no_auth(&mut stream).await?;
			let mut request = [0u8; 10];
			stream.read_exact(&mut request).await?;
			stream
				.write_all(&[0x05, rep_byte, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
				.await?;
			Ok(())
		})
		.await?;

		let target = Address::IPv4("10.0.0.1".parse()?, 80);
		let err = client::connect(proxy, target, &AuthOptions::none(), Some(OP_TIMEOUT))
			.await
			.unwrap_err();
		match expected {
			Some(rep) => {
				assert!(matches!(err, Error::Rejected { rep: got, .. } if got == rep));
			}
			None => assert!(matches!(err, Error::GeneralFailure)),
		}
	}
	Ok(())
}

#[tokio::test]
async fn connect_rejects_wrong_reply_version() -> eyre::Result<()> {
	let proxy = scripted_proxy(|mut stream| async move {
		accept_no_auth(&mut stream).await?;
		let mut request = [0u8; 10];
		stream.read_exact(&mut request).await?;
		stream
			.write_all(&[0x04, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
			.await?;
		Ok(())
	})
	.await?;

	let target = Address::IPv4("10.0.0.1".parse()?, 80);
	let err = client::connect(proxy, target, &AuthOptions::none(), Some(OP_TIMEOUT))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Proto { .. }));
	Ok(())
}

#[tokio::test]
async fn deny_choice_fails_the_handshake() -> eyre::Result<()> {
	let proxy = scripted_proxy(|mut stream| async move {
		expect_bytes(&mut stream, &[0x05, 0x01, 0x00]).await?;
		stream.write_all(&[0x05, 0xFF]).await?;
		Ok(())
	})
	.await?;

	let target = Address::IPv4("10.0.0.1".parse()?, 80);
	let err = client::connect(proxy, target, &AuthOptions::none(), Some(OP_TIMEOUT))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::GeneralFailure));
	Ok(())
}

#[tokio::test]
async fn user_auth_failure_status() -> eyre::Result<()> {
	let proxy = scripted_proxy(|mut stream| async move {
		expect_bytes(&mut stream, &[0x05, 0x02, 0x00, 0x02]).await?;
		stream.write_all(&[0x05, 0x02]).await?;
		expect_bytes(
			&mut stream,
			&[0x01, 0x04, b'u', b's', b'e', b'r', 0x04, b'p', b'a', b's', b's'],
		)
		.await?;
		stream.write_all(&[0x01, 0x01]).await?;
		Ok(())
	})
	.await?;

	let auth = AuthOptions::none().with_user("user", "pass")?;
	let target = Address::IPv4("10.0.0.1".parse()?, 80);
	let err = client::connect(proxy, target, &auth, Some(OP_TIMEOUT)).await.unwrap_err();
	assert!(matches!(err, Error::AuthFailure));
	Ok(())
}

#[tokio::test]
async fn udp_associate_reads_relay_endpoint() -> eyre::Result<()> {
	let proxy = scripted_proxy(|mut stream| async move {
		accept_no_auth(&mut stream).await?;
		// VER CMD RSV ATYP, then the client's (unspecified) IP and its real
		// ephemeral port.
		let mut request = [0u8; 10];
		stream.read_exact(&mut request).await?;
		eyre::ensure!(request[..4] == [0x05, 0x03, 0x00, 0x01], "bad request head");
		eyre::ensure!(request[4..8] == [0, 0, 0, 0], "client IP should be unspecified");
		stream
			.write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x10, 0x92])
			.await?;
		// Keep the control connection open for the association.
		tokio::time::sleep(Duration::from_secs(2)).await;
		Ok(())
	})
	.await?;

	let associate = client::udp_associate(proxy, &AuthOptions::none(), Some(OP_TIMEOUT)).await?;
	assert_eq!(associate.proxy_ep, "127.0.0.1:4242".parse::<SocketAddr>()?);
	assert_ne!(associate.socket.local_addr()?.port(), 0);
	Ok(())
}

#[tokio::test]
async fn bind_zero_ip_first_reply_uses_proxy_ip() -> eyre::Result<()> {
	let proxy = scripted_proxy(|mut stream| async move {
		accept_no_auth(&mut stream).await?;
		let mut request = [0u8; 10];
		stream.read_exact(&mut request).await?;
		eyre::ensure!(request[..4] == [0x05, 0x02, 0x00, 0x01], "bad request head");
		// Zeroed BND_ADDR with a concrete port.
		stream
			.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0x10, 0xE1])
			.await?;
		// Second reply: the accepted peer.
		stream
			.write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x07])
			.await?;
		Ok(())
	})
	.await?;

	let inbound: SocketAddr = "127.0.0.1:9000".parse()?;
	let (mut control, bind_ep) =
		client::first_bind_step(proxy, inbound, &AuthOptions::none(), Some(OP_TIMEOUT)).await?;
	// Zero IP resolves to the proxy's IP with the reply's port.
	assert_eq!(bind_ep, SocketAddr::new(proxy.ip(), 4321));

	let accepted = client::second_bind_step(&mut control, Some(OP_TIMEOUT)).await?;
	assert_eq!(accepted, "127.0.0.1:7".parse::<SocketAddr>()?);
	Ok(())
}

#[tokio::test]
async fn bind_first_reply_with_concrete_ip_is_kept() -> eyre::Result<()> {
	let proxy = scripted_proxy(|mut stream| async move {
		accept_no_auth(&mut stream).await?;
		let mut request = [0u8; 10];
		stream.read_exact(&mut request).await?;
		stream
			.write_all(&[0x05, 0x00, 0x00, 0x01, 10, 1, 2, 3, 0x00, 0x50])
			.await?;
		Ok(())
	})
	.await?;

	let inbound: SocketAddr = "127.0.0.1:9000".parse()?;
	let (_control, bind_ep) =
		client::first_bind_step(proxy, inbound, &AuthOptions::none(), Some(OP_TIMEOUT)).await?;
	assert_eq!(bind_ep, "10.1.2.3:80".parse::<SocketAddr>()?);
	Ok(())
}

#[tokio::test]
async fn stalled_proxy_times_out() -> eyre::Result<()> {
	let proxy = scripted_proxy(|mut stream| async move {
		// Swallow the greeting and go silent.
		let mut greeting = [0u8; 3];
		stream.read_exact(&mut greeting).await?;
		tokio::time::sleep(Duration::from_secs(10)).await;
		Ok(())
	})
	.await?;

	let target = Address::IPv4("10.0.0.1".parse()?, 80);
	let err = client::connect(
		proxy,
		target,
		&AuthOptions::none(),
		Some(Duration::from_millis(300)),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, Error::Timeout));
	Ok(())
}

#[tokio::test]
async fn oversize_udp_payload_is_rejected_locally() -> eyre::Result<()> {
	let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
	let target = Address::IPv4("10.0.0.1".parse()?, 53);
	let payload = vec![0u8; 65_508];
	let err = client::send_to(
		&socket,
		"127.0.0.1:1080".parse()?,
		&target,
		&payload,
		Some(OP_TIMEOUT),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, Error::DatagramTooLarge));
	Ok(())
}

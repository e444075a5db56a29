pub mod socks5;

pub mod echo {
	use std::net::SocketAddr;

	use tokio::{
		io::{AsyncReadExt, AsyncWriteExt},
		net::{TcpListener, UdpSocket},
	};

	/// TCP server echoing every byte back, accepting any number of
	/// connections. Runs until the runtime shuts down.
	pub async fn spawn_tcp() -> eyre::Result<SocketAddr> {
		let listener = TcpListener::bind("127.0.0.1:0").await?;
		let addr = listener.local_addr()?;
		tokio::spawn(async move {
			loop {
				let Ok((mut stream, _)) = listener.accept().await else {
					return;
				};
				tokio::spawn(async move {
					let mut buf = [0u8; 16384];
					while let Ok(n) = stream.read(&mut buf).await {
						if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
							break;
						}
					}
				});
			}
		});
		Ok(addr)
	}

	/// UDP server echoing every datagram back to its sender.
	pub async fn spawn_udp() -> eyre::Result<SocketAddr> {
		let socket = UdpSocket::bind("127.0.0.1:0").await?;
		let addr = socket.local_addr()?;
		tokio::spawn(async move {
			let mut buf = [0u8; 65536];
			while let Ok((n, from)) = socket.recv_from(&mut buf).await {
				if socket.send_to(&buf[..n], from).await.is_err() {
					break;
				}
			}
		});
		Ok(addr)
	}
}

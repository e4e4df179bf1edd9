/**********************************************************************

Copyright (C) 2021 by reddal

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

**********************************************************************/

use crate::prelude::*;
use tokio::net::{TcpListener, UdpSocket};

pub fn init_log() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// Spawn a TCP server that echoes every connection until EOF.
pub async fn spawn_echo_server() -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		loop {
			let (mut stream, peer) = match listener.accept().await {
				Ok(res) => res,
				Err(_) => return,
			};
			tokio::spawn(async move {
				let mut buffer = [0_u8; 4 * 1024];
				loop {
					let len = match stream.read(&mut buffer).await {
						Ok(0) | Err(_) => break,
						Ok(len) => len,
					};
					trace!("echo server received {} bytes from {}", len, peer);
					if stream.write_all(&buffer[..len]).await.is_err() {
						return;
					}
				}
				let _ = stream.shutdown().await;
			});
		}
	});
	addr
}

/// Spawn a UDP server that sends every datagram back to its source.
pub async fn spawn_udp_echo_server() -> SocketAddr {
	let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	let addr = socket.local_addr().unwrap();
	tokio::spawn(async move {
		let mut buffer = vec![0_u8; 64 * 1024];
		while let Ok((len, peer)) = socket.recv_from(&mut buffer).await {
			if socket.send_to(&buffer[..len], peer).await.is_err() {
				return;
			}
		}
	});
	addr
}

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

#![allow(dead_code)]

use dispatcher_lib::{
	frontend::stun::{ATTR_XOR_PEER_ADDRESS, HEADER_LEN, MAGIC_COOKIE},
	CaptureReporter, Dispatcher, Flags, Setup,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream, UdpSocket},
};

pub fn setup_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

pub fn temp_state(name: &str) -> PathBuf {
	std::env::temp_dir().join(format!(
		"dispatcher-it-{}-{}",
		std::process::id(),
		name
	))
}

/// Validate `flags` and build a dispatcher that captures status lines.
pub fn dispatcher(flags: &Flags) -> (Setup, Dispatcher, Arc<CaptureReporter>) {
	let setup = Setup::from_flags(flags).unwrap();
	let reporter = Arc::new(CaptureReporter::new());
	let dispatcher = Dispatcher::new(setup.mode, setup.options.clone(), reporter.clone());
	(setup, dispatcher, reporter)
}

pub async fn spawn_echo_server() -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		while let Ok((mut stream, _)) = listener.accept().await {
			tokio::spawn(async move {
				let (mut r, mut w) = stream.split();
				let _ = tokio::io::copy(&mut r, &mut w).await;
				let _ = w.shutdown().await;
			});
		}
	});
	addr
}

pub async fn spawn_udp_echo_server() -> SocketAddr {
	let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	let addr = socket.local_addr().unwrap();
	tokio::spawn(async move {
		let mut buf = vec![0_u8; 64 * 1024];
		while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
			let _ = socket.send_to(&buf[..n], peer).await;
		}
	});
	addr
}

/// SOCKS5 CONNECT to an IPv4 `target`, returns the stream and the reply code.
pub async fn socks5_connect(
	proxy: SocketAddr,
	target: SocketAddr,
	auth: Option<(&str, &str)>,
) -> (TcpStream, u8) {
	let mut stream = TcpStream::connect(proxy).await.unwrap();
	let method = if auth.is_some() { 2 } else { 0 };
	stream.write_all(&[5, 1, method]).await.unwrap();
	let mut buf = [0_u8; 2];
	stream.read_exact(&mut buf).await.unwrap();
	assert_eq!(buf, [5, method]);

	if let Some((user, pass)) = auth {
		let mut req = vec![1, user.len() as u8];
		req.extend_from_slice(user.as_bytes());
		req.push(pass.len() as u8);
		req.extend_from_slice(pass.as_bytes());
		stream.write_all(&req).await.unwrap();
		stream.read_exact(&mut buf).await.unwrap();
		assert_eq!(buf, [1, 0]);
	}

	let ip = match target {
		SocketAddr::V4(addr) => addr.ip().octets(),
		SocketAddr::V6(_) => panic!("IPv4 only"),
	};
	let mut req = vec![5, 1, 0, 1];
	req.extend_from_slice(&ip);
	req.extend_from_slice(&target.port().to_be_bytes());
	stream.write_all(&req).await.unwrap();
	let mut reply = [0_u8; 10];
	stream.read_exact(&mut reply).await.unwrap();
	(stream, reply[1])
}

/// STUN binding request whose XOR-PEER-ADDRESS is the IPv4 `peer`.
pub fn stun_binding_request(peer: SocketAddr) -> Vec<u8> {
	let ip = match peer {
		SocketAddr::V4(addr) => u32::from(*addr.ip()),
		SocketAddr::V6(_) => panic!("IPv4 only"),
	};
	let mut msg = Vec::with_capacity(HEADER_LEN + 12);
	msg.extend_from_slice(&0x0001_u16.to_be_bytes());
	msg.extend_from_slice(&12_u16.to_be_bytes());
	msg.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
	msg.extend_from_slice(&[0x5a; 12]);
	msg.extend_from_slice(&ATTR_XOR_PEER_ADDRESS.to_be_bytes());
	msg.extend_from_slice(&8_u16.to_be_bytes());
	msg.extend_from_slice(&[0, 0x01]);
	msg.extend_from_slice(&(peer.port() ^ (MAGIC_COOKIE >> 16) as u16).to_be_bytes());
	msg.extend_from_slice(&(ip ^ MAGIC_COOKIE).to_be_bytes());
	msg
}

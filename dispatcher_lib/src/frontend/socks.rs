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

use super::{relay_logged, ClientEndpoint};
use crate::{
	error::{Error, HandshakeError},
	prelude::*,
	socks5::{self, ReplyCode},
};
use tokio::net::TcpStream;

async fn reply(stream: &mut TcpStream, code: ReplyCode) -> Result<(), Error> {
	socks5::write_reply(stream, code)
		.await
		.map_err(|e| HandshakeError::Io(e).into())
}

/// Serve one SOCKS5 CONNECT.
///
/// The success reply is only sent once the transport is connected.
pub(super) async fn handle(
	conn_id: u64,
	mut stream: TcpStream,
	peer: SocketAddr,
	endpoint: &ClientEndpoint,
) -> Result<(), Error> {
	let id = format!("{:x}", conn_id);
	info!(
		"[{}] making {} handshake with '{}'",
		id,
		socks5::PROTOCOL_NAME,
		peer
	);
	let req = socks5::accept(&mut stream).await?;

	let cap = match endpoint.capability(req.args.as_deref()) {
		Ok(cap) => cap,
		Err(e) => {
			reply(&mut stream, ReplyCode::SocksFailure).await?;
			return Err(e);
		}
	};
	info!(
		"[{}] connecting to '{}' with '{}'...",
		id,
		req.target,
		cap.name()
	);
	let remote = match cap.dial(&req.target).await {
		Ok(remote) => remote,
		Err(e) => {
			let code = ReplyCode::from_io_kind(e.io_kind());
			info!("[{}] dial failed ({}), replying '{}'", id, e, code);
			reply(&mut stream, code).await?;
			return Err(e.into());
		}
	};
	reply(&mut stream, ReplyCode::Succeeded).await?;
	relay_logged(&id, stream.into(), remote).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		mode::ProxyMode,
		options::OptionsTable,
		test_utils::{init_log, spawn_echo_server},
	};
	use tokio::net::TcpListener;

	type Task = tokio::task::JoinHandle<Result<(), Error>>;

	async fn serve_one(endpoint: ClientEndpoint) -> (SocketAddr, Task) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let task = tokio::spawn(async move {
			let (stream, peer) = listener.accept().await.unwrap();
			handle(1, stream, peer, &endpoint).await
		});
		(addr, task)
	}

	async fn connect_request(
		addr: SocketAddr,
		target: SocketAddr,
	) -> (TcpStream, [u8; 2], Vec<u8>) {
		let mut client = TcpStream::connect(addr).await.unwrap();
		let mut req = vec![5, 1, 0, 5, 1, 0];
		SocksAddr::from(target).write_to(&mut req);
		client.write_all(&req).await.unwrap();
		let mut method = [0_u8; 2];
		client.read_exact(&mut method).await.unwrap();
		let mut reply = vec![0_u8; 10];
		client.read_exact(&mut reply).await.unwrap();
		(client, method, reply)
	}

	fn plain_endpoint() -> ClientEndpoint {
		ClientEndpoint::new(
			&"plain".into(),
			ProxyMode::SocksAware,
			&OptionsTable::empty(),
			None,
		)
		.unwrap()
	}

	#[test]
	fn test_connect_and_relay() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let echo = spawn_echo_server().await;
			let (addr, task) = serve_one(plain_endpoint()).await;
			let (mut client, method, reply) = connect_request(addr, echo).await;
			assert_eq!(method, [5, 0]);
			assert_eq!(reply[..2], [5, ReplyCode::Succeeded as u8]);

			client.write_all(b"hello").await.unwrap();
			let mut buf = [0_u8; 5];
			client.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"hello");
			client.shutdown().await.unwrap();
			drop(client);
			task.await.unwrap().unwrap();
		});
	}

	#[test]
	fn test_connect_refused_reply() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let closed = {
				let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
				l.local_addr().unwrap()
			};
			let (addr, task) = serve_one(plain_endpoint()).await;
			let (_client, _, reply) = connect_request(addr, closed).await;
			assert_eq!(reply[..2], [5, ReplyCode::ConnectionRefused as u8]);
			assert!(matches!(task.await.unwrap(), Err(Error::Dial(_))));
		});
	}

	#[test]
	fn test_missing_args_reply() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let endpoint = ClientEndpoint::new(
				&"shadow".into(),
				ProxyMode::SocksAware,
				&OptionsTable::empty(),
				None,
			)
			.unwrap();
			let (addr, task) = serve_one(endpoint).await;
			let target = "127.0.0.1:9".parse().unwrap();
			let (_client, _, reply) = connect_request(addr, target).await;
			assert_eq!(reply[..2], [5, ReplyCode::SocksFailure as u8]);
			assert!(matches!(task.await.unwrap(), Err(Error::Configuration(_))));
		});
	}
}

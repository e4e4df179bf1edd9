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

use super::{accept, relay_logged, udp};
use crate::{
	backend::Bridge, error::Error, mode::ProxyMode, prelude::*, protocol::BytesStream,
	transport::TransportListener,
};

/// Accept transport connections and bridge them to the backend.
pub(super) async fn serve(
	listener: TransportListener,
	name: Tag,
	mode: ProxyMode,
	bridge: Arc<Bridge>,
) {
	let tag = name.clone();
	accept::serve(listener, tag, move |stream, peer, conn_id| {
		let bridge = bridge.clone();
		let name = name.clone();
		async move {
			let id = format!("{:x}", conn_id);
			if mode.is_udp() {
				udp::bridge_datagrams(&id, stream, bridge.backend_addr()).await
			} else {
				handle_stream(&id, stream, peer, &name, &bridge).await
			}
		}
	})
	.await;
}

async fn handle_stream(
	id: &str,
	stream: BytesStream,
	peer: SocketAddr,
	name: &str,
	bridge: &Bridge,
) -> Result<(), Error> {
	info!(
		"[{}] '{}' connection from '{}', connecting to backend {}...",
		id,
		name,
		peer,
		bridge.backend_addr()
	);
	let backend = bridge.connect(peer, name).await?;
	relay_logged(id, stream, backend.into()).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		options::{parse_options, OptionsTable},
		test_utils::spawn_echo_server,
		transport::REGISTRY,
	};

	#[test]
	fn test_serve_stream() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let backend = spawn_echo_server().await;
			let bridge = Arc::new(Bridge::new(backend, None, None).unwrap());
			let options = parse_options("password=secret;cipherName=aes-128-gcm").unwrap();
			let server = REGISTRY.resolve_server("shadow", &options).unwrap();
			let listener = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
			let addr = listener.local_addr().unwrap();
			let task = tokio::spawn(serve(
				listener,
				"shadow".into(),
				ProxyMode::SocksAware,
				bridge,
			));

			let client = REGISTRY.resolve_client("shadow", &options, None).unwrap();
			let mut stream = client.dial(&addr.into()).await.unwrap();
			stream.write_all(b"to the backend").await.unwrap();
			stream.flush().await.unwrap();
			let mut buf = [0_u8; 14];
			stream.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"to the backend");
			task.abort();
		});
	}

	#[test]
	fn test_serve_datagrams() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let backend = crate::test_utils::spawn_udp_echo_server().await;
			let bridge = Arc::new(Bridge::new(backend, None, None).unwrap());
			let server = REGISTRY
				.resolve_server("plain", &OptionsTable::empty())
				.unwrap();
			let listener = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
			let addr = listener.local_addr().unwrap();
			let task = tokio::spawn(serve(
				listener,
				"plain".into(),
				ProxyMode::TransparentUdp,
				bridge,
			));

			let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
			udp::write_frame(&mut stream, b"datagram").await.unwrap();
			let reply = udp::read_frame(&mut stream).await.unwrap().unwrap();
			assert_eq!(reply, b"datagram");
			task.abort();
		});
	}
}

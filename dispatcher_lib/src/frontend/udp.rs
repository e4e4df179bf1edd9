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

/*!
Datagram front-ends.

Datagrams travel through stream transports as frames:

```not_rust
+-----------+-----------+
|    LEN    |  PAYLOAD  |
+-----------+-----------+
|     2     |    LEN    |
+-----------+-----------+
```

On the client side every source address gets its own session
and its own transport connection.
*/

use super::{accept::is_transient, stun, ClientEndpoint};
use crate::{
	error::{BackendError, Direction, Error, HandshakeError, RelayError},
	mode::ProxyMode,
	prelude::*,
	protocol::BytesStream,
	transport::ClientCapability,
};
use futures::future::{self, Either};
use std::{collections::HashMap, future::Future, io};
use tokio::{
	net::UdpSocket,
	sync::mpsc::{self, error::TrySendError},
};

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;
/// Datagrams waiting for the transport before new ones are dropped.
const SESSION_QUEUE_LEN: usize = 64;

/// Write `data` as a single frame.
///
/// # Errors
///
/// Returns an error if `data` is longer than `u16::MAX` or writing failed.
pub async fn write_frame<W>(w: &mut W, data: &[u8]) -> io::Result<()>
where
	W: AsyncWrite + Unpin + ?Sized,
{
	let len = u16::try_from(data.len()).map_err(|_| {
		io::Error::new(
			io::ErrorKind::InvalidInput,
			format!("datagram of {} bytes is too large for a frame", data.len()),
		)
	})?;
	let mut buf = Vec::with_capacity(2 + data.len());
	buf.put_u16(len);
	buf.extend_from_slice(data);
	w.write_all(&buf).await?;
	w.flush().await
}

/// Read a single frame.
///
/// Returns `Ok(None)` if the stream ends between two frames.
///
/// # Errors
///
/// Returns an error if the stream ends inside a frame or reading failed.
pub async fn read_frame<R>(r: &mut R) -> io::Result<Option<Vec<u8>>>
where
	R: AsyncRead + Unpin + ?Sized,
{
	let mut len = [0_u8; 2];
	match r.read(&mut len).await? {
		0 => return Ok(None),
		1 => r.read_exact(&mut len[1..]).await.map(|_| ())?,
		_ => {}
	}
	let mut data = vec![0_u8; usize::from(u16::from_be_bytes(len))];
	r.read_exact(&mut data).await?;
	Ok(Some(data))
}

/// Run both directions until one of them finishes.
async fn relay_datagrams<S, R>(id: &str, send: S, recv: R) -> Result<(), Error>
where
	S: Future<Output = io::Result<()>>,
	R: Future<Output = io::Result<()>>,
{
	futures::pin_mut!(send);
	futures::pin_mut!(recv);
	let (direction, res) = match future::select(send, recv).await {
		Either::Left((res, _)) => (Direction::Send, res),
		Either::Right((res, _)) => (Direction::Recv, res),
	};
	debug!("[{}] datagram session closed, {} finished first", id, direction);
	res.map_err(|source| RelayError { direction, source }.into())
}

// -------------------------------------------------------
//                       Client
// -------------------------------------------------------

/// Target of a new session, learned from its first datagram.
fn session_target(
	mode: ProxyMode,
	first: &[u8],
	configured: Option<&SocksAddr>,
) -> Result<SocksAddr, HandshakeError> {
	if mode == ProxyMode::StunAware {
		if let Some(addr) = stun::target_addr(first)? {
			return Ok(addr.into());
		}
	}
	configured
		.cloned()
		.ok_or(HandshakeError::NoTarget("no 'address' option"))
}

/// Receive datagrams on `socket` until it fails.
pub(super) async fn serve_client(
	socket: UdpSocket,
	endpoint: Arc<ClientEndpoint>,
	mode: ProxyMode,
) {
	let socket = Arc::new(socket);
	let mut sessions: HashMap<SocketAddr, mpsc::Sender<Vec<u8>>> = HashMap::new();
	let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];
	loop {
		let (n, peer) = match socket.recv_from(&mut buf).await {
			Ok(res) => res,
			Err(e) if is_transient(&e) => {
				warn!("'{}' temporary UDP error ({}), still receiving", endpoint.name, e);
				continue;
			}
			Err(e) => {
				error!("'{}' UDP receive failed ({}), socket closed", endpoint.name, e);
				return;
			}
		};
		let mut data = buf[..n].to_vec();
		if let Some(tx) = sessions.get(&peer) {
			match tx.try_send(data) {
				Ok(()) => continue,
				Err(TrySendError::Full(_)) => {
					trace!("session of {} is busy, datagram dropped", peer);
					continue;
				}
				Err(TrySendError::Closed(d)) => {
					sessions.remove(&peer);
					data = d;
				}
			}
		}

		let conn_id = rand::thread_rng().next_u64();
		let target = match session_target(mode, &data, endpoint.target.as_ref()) {
			Ok(target) => target,
			Err(e) => {
				warn!("[{:x}] datagram from {} dropped ({})", conn_id, peer, e);
				continue;
			}
		};
		let cap = match endpoint.capability(None) {
			Ok(cap) => cap,
			Err(e) => {
				error!("[{:x}] cannot start session for {} ({})", conn_id, peer, e);
				continue;
			}
		};
		sessions.retain(|_, tx| !tx.is_closed());
		let (tx, rx) = mpsc::channel(SESSION_QUEUE_LEN);
		sessions.insert(peer, tx);
		let socket = socket.clone();
		tokio::spawn(async move {
			let id = format!("{:x}", conn_id);
			let session = ClientSession {
				id: &id,
				socket,
				peer,
				cap,
				target,
			};
			if let Err(e) = session.run(data, rx).await {
				warn!("[{}] UDP session from {} ended ({})", id, peer, e);
			}
		});
	}
}

struct ClientSession<'a> {
	id: &'a str,
	socket: Arc<UdpSocket>,
	peer: SocketAddr,
	cap: ClientCapability,
	target: SocksAddr,
}

impl ClientSession<'_> {
	async fn run(self, first: Vec<u8>, rx: mpsc::Receiver<Vec<u8>>) -> Result<(), Error> {
		info!(
			"[{}] UDP session from '{}' to '{}', connecting with '{}'...",
			self.id,
			self.peer,
			self.target,
			self.cap.name()
		);
		let (mut r, mut w) = self.cap.dial(&self.target).await?.into_split();
		let send = peer_to_stream(&mut w, first, rx);
		let recv = stream_to_peer(&mut r, &self.socket, self.peer);
		relay_datagrams(self.id, send, recv).await
	}
}

async fn peer_to_stream<W>(
	w: &mut W,
	first: Vec<u8>,
	mut rx: mpsc::Receiver<Vec<u8>>,
) -> io::Result<()>
where
	W: AsyncWrite + Unpin + ?Sized,
{
	write_frame(w, &first).await?;
	while let Some(data) = rx.recv().await {
		write_frame(w, &data).await?;
	}
	w.shutdown().await
}

async fn stream_to_peer<R>(r: &mut R, socket: &UdpSocket, peer: SocketAddr) -> io::Result<()>
where
	R: AsyncRead + Unpin + ?Sized,
{
	while let Some(data) = read_frame(r).await? {
		socket.send_to(&data, peer).await?;
	}
	Ok(())
}

// -------------------------------------------------------
//                       Server
// -------------------------------------------------------

/// Forward framed datagrams from `stream` to `backend` and back.
pub(super) async fn bridge_datagrams(
	id: &str,
	stream: BytesStream,
	backend: SocketAddr,
) -> Result<(), Error> {
	let bind_addr = if backend.is_ipv4() {
		SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
	} else {
		SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
	};
	let connect_err = |source| BackendError::Connect {
		addr: backend,
		source,
	};
	let socket = UdpSocket::bind(bind_addr).await.map_err(connect_err)?;
	socket.connect(backend).await.map_err(connect_err)?;
	info!("[{}] bridging datagrams to backend {}", id, backend);

	let (mut r, mut w) = stream.into_split();
	let send = stream_to_backend(&mut r, &socket);
	let recv = backend_to_stream(&socket, &mut w);
	relay_datagrams(id, send, recv).await
}

async fn stream_to_backend<R>(r: &mut R, socket: &UdpSocket) -> io::Result<()>
where
	R: AsyncRead + Unpin + ?Sized,
{
	while let Some(data) = read_frame(r).await? {
		socket.send(&data).await?;
	}
	Ok(())
}

async fn backend_to_stream<W>(socket: &UdpSocket, w: &mut W) -> io::Result<()>
where
	W: AsyncWrite + Unpin + ?Sized,
{
	let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];
	loop {
		let n = socket.recv(&mut buf).await?;
		write_frame(w, &buf[..n]).await?;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		frontend::stun::{tests::message, ATTR_XOR_PEER_ADDRESS},
		options::parse_options,
		test_utils::spawn_udp_echo_server,
	};
	use std::time::Duration;
	use tokio::{io::duplex, net::TcpListener};

	#[test]
	fn test_frames() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let (mut a, mut b) = duplex(1024);
			write_frame(&mut a, b"one").await.unwrap();
			write_frame(&mut a, b"").await.unwrap();
			write_frame(&mut a, &[7_u8; 300]).await.unwrap();
			drop(a);
			assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), b"one");
			assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), b"");
			assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), [7_u8; 300]);
			assert!(read_frame(&mut b).await.unwrap().is_none());

			let (mut a, mut b) = duplex(1024);
			a.write_all(&[0, 5, 1, 2]).await.unwrap();
			drop(a);
			let err = read_frame(&mut b).await.unwrap_err();
			assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

			let (mut a, _b) = duplex(1024);
			let err = write_frame(&mut a, &vec![0_u8; 70000]).await.unwrap_err();
			assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
		});
	}

	#[test]
	fn test_session_target() {
		let configured: SocksAddr = "127.0.0.1:53".parse().unwrap();
		let peer: SocketAddr = "192.0.2.7:3478".parse().unwrap();
		let stun_msg = message(&[(ATTR_XOR_PEER_ADDRESS, peer)]);

		let t = session_target(ProxyMode::StunAware, &stun_msg, Some(&configured)).unwrap();
		assert_eq!(t, peer.into());
		let t = session_target(ProxyMode::StunAware, &message(&[]), Some(&configured)).unwrap();
		assert_eq!(t, configured);
		assert!(matches!(
			session_target(ProxyMode::StunAware, b"not stun", Some(&configured)),
			Err(HandshakeError::NotStun)
		));
		let t = session_target(ProxyMode::TransparentUdp, b"anything", Some(&configured)).unwrap();
		assert_eq!(t, configured);
		assert!(matches!(
			session_target(ProxyMode::TransparentUdp, b"anything", None),
			Err(HandshakeError::NoTarget(_))
		));
	}

	/// Fake server transport that answers every frame with the same frame reversed.
	async fn spawn_frame_reverser() -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			loop {
				let (mut stream, _) = listener.accept().await.unwrap();
				tokio::spawn(async move {
					while let Some(mut data) = read_frame(&mut stream).await.unwrap() {
						data.reverse();
						write_frame(&mut stream, &data).await.unwrap();
					}
				});
			}
		});
		addr
	}

	#[test]
	fn test_client_sessions() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let remote = spawn_frame_reverser().await;
			let options = parse_options(&format!("address={}", remote)).unwrap();
			let endpoint = Arc::new(
				ClientEndpoint::new(&"plain".into(), ProxyMode::TransparentUdp, &options, None)
					.unwrap(),
			);
			let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
			let addr = socket.local_addr().unwrap();
			let task = tokio::spawn(serve_client(socket, endpoint, ProxyMode::TransparentUdp));

			let app1 = UdpSocket::bind("127.0.0.1:0").await.unwrap();
			let app2 = UdpSocket::bind("127.0.0.1:0").await.unwrap();
			let mut buf = [0_u8; 64];
			for _ in 0..2 {
				app1.send_to(b"abc", addr).await.unwrap();
				let n = tokio::time::timeout(Duration::from_secs(5), app1.recv(&mut buf))
					.await
					.unwrap()
					.unwrap();
				assert_eq!(&buf[..n], b"cba");
			}
			app2.send_to(b"xyz", addr).await.unwrap();
			let n = tokio::time::timeout(Duration::from_secs(5), app2.recv(&mut buf))
				.await
				.unwrap()
				.unwrap();
			assert_eq!(&buf[..n], b"zyx");
			task.abort();
		});
	}

	#[test]
	fn test_bridge_datagrams() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let backend = spawn_udp_echo_server().await;
			let (mut client, server) = duplex(4096);
			let (r, w) = tokio::io::split(server);
			let stream = BytesStream::new(Box::new(r), Box::new(w));
			let task =
				tokio::spawn(async move { bridge_datagrams("test", stream, backend).await });

			write_frame(&mut client, b"ping").await.unwrap();
			let reply = read_frame(&mut client).await.unwrap().unwrap();
			assert_eq!(reply, b"ping");
			drop(client);
			task.await.unwrap().unwrap();
		});
	}
}

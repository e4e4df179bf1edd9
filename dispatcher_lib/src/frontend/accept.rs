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

use crate::{error::Error, prelude::*, protocol::BytesStream, transport::TransportListener};
use std::{future::Future, io};
use tokio::net::{TcpListener, TcpStream};

/// Anything that yields incoming connections.
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
	type Stream: Send + 'static;

	async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
	type Stream = TcpStream;

	async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
		TcpListener::accept(self).await
	}
}

#[async_trait]
impl Acceptor for TransportListener {
	type Stream = BytesStream;

	async fn accept(&self) -> io::Result<(BytesStream, SocketAddr)> {
		TransportListener::accept(self).await
	}
}

const EMFILE: i32 = 24;
const ENFILE: i32 = 23;
const ENOBUFS: i32 = 105;
const ENOMEM: i32 = 12;

/// Returns `true` if the listener is still usable after `e`.
#[must_use]
pub fn is_transient(e: &io::Error) -> bool {
	use io::ErrorKind;
	matches!(
		e.kind(),
		ErrorKind::ConnectionAborted
			| ErrorKind::ConnectionReset
			| ErrorKind::Interrupted
			| ErrorKind::WouldBlock
			| ErrorKind::TimedOut
	) || matches!(
		e.raw_os_error(),
		Some(EMFILE) | Some(ENFILE) | Some(ENOBUFS) | Some(ENOMEM)
	)
}

/// Accept connections until a permanent error occurs.
///
/// Every connection is handled in its own task with a random connection ID.
/// Errors from `handler` are logged and never stop the loop.
pub async fn serve<A, F, Fut>(acceptor: A, tag: Tag, handler: F)
where
	A: Acceptor,
	F: Fn(A::Stream, SocketAddr, u64) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
	let handler = Arc::new(handler);
	loop {
		let (stream, peer) = match acceptor.accept().await {
			Ok(res) => res,
			Err(e) if is_transient(&e) => {
				warn!("'{}' temporary accept error ({}), still accepting", tag, e);
				continue;
			}
			Err(e) => {
				error!("'{}' accept failed ({}), listener closed", tag, e);
				return;
			}
		};
		// randomly generated connection ID
		let conn_id = rand::thread_rng().next_u64();
		debug!("[{:x}] '{}' accepted connection from {}", conn_id, tag, peer);
		let handler = handler.clone();
		let tag = tag.clone();
		tokio::spawn(async move {
			match handler(stream, peer, conn_id).await {
				Ok(()) => {}
				Err(Error::Relay(e)) => warn!("[{:x}] '{}' {}", conn_id, tag, e),
				Err(e) => error!(
					"[{:x}] '{}' session from {} failed: {}",
					conn_id, tag, peer, e
				),
			}
		});
	}
}

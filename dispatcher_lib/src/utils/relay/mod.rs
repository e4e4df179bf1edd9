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
Bidirectional relay between two byte streams.

Two copy futures run concurrently, one per direction. When one of them
finishes, the other is given [`DEFAULT_DRAIN_TIMEOUT`] to drain,
after which all halves are dropped. The result of the direction that
finished first is the result of the relay.
*/

mod atomic_values;
mod stream_copier;

pub use atomic_values::Counter;

use crate::{
	error::{Direction, RelayError},
	prelude::*,
	protocol::BytesStream,
};
use atomic_values::Switch;
use futures::future::{self, Either};
use std::{io, time::Duration};
use stream_copier::StreamCopier;
use tokio::io::BufReader;

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(2000);

pub struct Relay<'a> {
	pub conn_id: &'a str,
	pub recv: Option<Counter>,
	pub send: Option<Counter>,
	pub buffer_size: usize,
	pub drain_timeout: Duration,
}

impl<'a> Relay<'a> {
	#[inline]
	#[must_use]
	pub fn new(conn_id: &'a str) -> Self {
		Self {
			conn_id,
			recv: None,
			send: None,
			buffer_size: DEFAULT_BUFFER_SIZE,
			drain_timeout: DEFAULT_DRAIN_TIMEOUT,
		}
	}

	/// Set the counter of bytes copied from the remote side.
	#[inline]
	pub fn set_recv(&mut self, recv: Counter) -> &mut Self {
		self.recv = Some(recv);
		self
	}

	/// Set the counter of bytes copied to the remote side.
	#[inline]
	pub fn set_send(&mut self, send: Counter) -> &mut Self {
		self.send = Some(send);
		self
	}

	/// Set the size of each of the two read buffers.
	#[inline]
	pub fn set_buffer_size(&mut self, size: usize) -> &mut Self {
		self.buffer_size = size;
		self
	}

	/// Set how long the second direction may keep running
	/// after the first one finished.
	#[inline]
	pub fn set_drain_timeout(&mut self, timeout: Duration) -> &mut Self {
		self.drain_timeout = timeout;
		self
	}
}

impl Default for Relay<'static> {
	#[inline]
	fn default() -> Self {
		Self::new("")
	}
}

impl Relay<'_> {
	/// Relay between a local stream and a remote stream.
	///
	/// # Errors
	///
	/// Returns the error of the direction that finished first, if any.
	pub async fn relay(&self, local: BytesStream, remote: BytesStream) -> Result<(), RelayError> {
		let (lr, lw) = local.into_split();
		let (rr, rw) = remote.into_split();
		self.relay_stream(lr, lw, rr, rw).await
	}

	/// Copy `ir` into `ow` and `or` into `iw` until both are done.
	///
	/// # Errors
	///
	/// Returns the error of the direction that finished first, if any.
	pub async fn relay_stream<IR, IW, OR, OW>(
		&self,
		ir: IR,
		iw: IW,
		or: OR,
		ow: OW,
	) -> Result<(), RelayError>
	where
		IR: AsyncRead + Unpin + Send,
		OR: AsyncRead + Unpin + Send,
		IW: AsyncWrite + Unpin + Send,
		OW: AsyncWrite + Unpin + Send,
	{
		let send_stopped = Switch::default();
		let recv_stopped = Switch::default();

		// local ---> remote
		let send_task = StreamCopier {
			r: BufReader::with_capacity(self.buffer_size, ir),
			w: ow,
			count: self.send.clone().unwrap_or_default(),
			tag: Arc::from(format!("[{} send]", self.conn_id)),
			direction: Direction::Send,
			is_other_stopped: recv_stopped.clone(),
			is_self_stopped: send_stopped.clone(),
		}
		.run();
		// local <--- remote
		let recv_task = StreamCopier {
			r: BufReader::with_capacity(self.buffer_size, or),
			w: iw,
			count: self.recv.clone().unwrap_or_default(),
			tag: Arc::from(format!("[{} recv]", self.conn_id)),
			direction: Direction::Recv,
			is_other_stopped: send_stopped,
			is_self_stopped: recv_stopped,
		}
		.run();

		futures::pin_mut!(send_task);
		futures::pin_mut!(recv_task);
		let (first, other) = match future::select(send_task, recv_task).await {
			Either::Left((res, other)) => (res, Either::Right(other)),
			Either::Right((res, other)) => (res, Either::Left(other)),
		};
		trace!("[{}] {} finished first", self.conn_id, first.0);

		match tokio::time::timeout(self.drain_timeout, other).await {
			Ok((direction, Err(e))) => {
				debug!(
					"[{}] {} error ({}), ignored since the other direction is done",
					self.conn_id, direction, e
				);
			}
			Ok((_, Ok(()))) => {}
			Err(_) => {
				debug!(
					"[{}] other direction not finished in {} ms, closing",
					self.conn_id,
					self.drain_timeout.as_millis()
				);
			}
		}

		let (direction, res) = first;
		res.map_err(|source: io::Error| RelayError { direction, source })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::{
		io::Cursor,
		task::{Context, Poll},
	};
	use tokio::io::{duplex, ReadBuf};

	struct FailingReader;

	impl AsyncRead for FailingReader {
		fn poll_read(
			self: Pin<&mut Self>,
			_cx: &mut Context<'_>,
			_buf: &mut ReadBuf<'_>,
		) -> Poll<io::Result<()>> {
			Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
		}
	}

	#[test]
	fn test_relay_stream() {
		let in_data: Vec<u8> = (0..64_u8).collect();
		let out_data: Vec<u8> = (64..192_u8).collect();

		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let mut in_result = Cursor::new(Vec::new());
			let mut out_result = Cursor::new(Vec::new());
			let recv = Counter::new(0);
			let send = Counter::new(0);

			Relay::default()
				.set_recv(recv.clone())
				.set_send(send.clone())
				.relay_stream(
					Cursor::new(in_data.clone()),
					&mut in_result,
					Cursor::new(out_data.clone()),
					&mut out_result,
				)
				.await
				.unwrap();

			assert_eq!(send.get(), in_data.len() as u64);
			assert_eq!(recv.get(), out_data.len() as u64);
			assert_eq!(out_result.into_inner(), in_data);
			assert_eq!(in_result.into_inner(), out_data);
		});
	}

	#[test]
	fn test_relay_ends_when_one_side_closes() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			for swap in [false, true] {
				let (mut app, local) = duplex(1024);
				let (remote, mut peer) = duplex(1024);
				app.write_all(b"hello").await.unwrap();
				drop(app.shutdown().await);

				let (lr, lw) = tokio::io::split(local);
				let (rr, rw) = tokio::io::split(remote);
				let mut relay = Relay::default();
				relay.set_drain_timeout(Duration::from_millis(100));
				let task = if swap {
					relay.relay_stream(rr, rw, lr, lw)
				} else {
					relay.relay_stream(lr, lw, rr, rw)
				};
				// `peer` never writes and never closes.
				let res = tokio::time::timeout(Duration::from_secs(5), task)
					.await
					.expect("relay should not hang");
				assert!(res.is_ok());

				let mut buf = Vec::new();
				peer.read_to_end(&mut buf).await.unwrap();
				assert_eq!(buf, b"hello");
			}
		});
	}

	#[test]
	fn test_relay_returns_first_error() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let mut relay = Relay::default();
			relay.set_drain_timeout(Duration::from_millis(100));

			let (_peer, remote) = duplex(1024);
			let (rr, rw) = tokio::io::split(remote);
			let err = relay
				.relay_stream(FailingReader, tokio::io::sink(), rr, rw)
				.await
				.unwrap_err();
			assert_eq!(err.direction, Direction::Send);
			assert_eq!(err.source.kind(), io::ErrorKind::ConnectionReset);

			let (_peer, local) = duplex(1024);
			let (lr, lw) = tokio::io::split(local);
			let err = relay
				.relay_stream(lr, lw, FailingReader, tokio::io::sink())
				.await
				.unwrap_err();
			assert_eq!(err.direction, Direction::Recv);
			assert_eq!(err.source.kind(), io::ErrorKind::ConnectionReset);
		});
	}
}

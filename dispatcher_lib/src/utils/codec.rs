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
Poll based framing helpers.

[`FrameReader`] reads frames of sizes decided by a [`Decode`] and
exposes the decoded payloads as a plain [`AsyncRead`].
[`FrameWriter`] encodes each write with an [`Encode`] before
passing it to the inner writer.
*/

use super::{poll_read_exact, poll_write_all};
use crate::prelude::*;
use futures::ready;
use std::{
	io,
	task::{Context, Poll},
};
use tokio::io::ReadBuf;

const BUFFER_CAPACITY: usize = 16 * 1024 + 64;

pub trait Decode: Send + Sync + Unpin {
	/// Number of bytes the next call to [`Decode::decode_inplace`] needs.
	fn expected_len(&self) -> usize;

	/// Decode exactly [`Decode::expected_len`] bytes in place.
	///
	/// Returns `true` if `buf` now holds payload for the reader,
	/// or `false` if the bytes were consumed internally.
	///
	/// # Errors
	///
	/// Returns an error if the bytes are invalid.
	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr>;

	/// Returns `true` if the stream may end before the next frame.
	fn can_end(&self) -> bool;
}

pub trait Encode: Send + Sync + Unpin {
	/// Encode `src` and append the result to `buf`.
	///
	/// # Errors
	///
	/// Returns an error if `src` cannot be encoded.
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr>;
}

enum ReadState {
	/// Reading one frame into the buffer.
	Reading { pos: usize },
	/// Buffer holds decoded payload, `pos` is the start of the remaining part.
	Buffering { pos: usize },
	Eof,
	Closed,
}

/// Reader that decodes frames from `r`.
pub struct FrameReader<D: Decode, R: AsyncRead + Unpin> {
	pub r: R,
	decoder: D,
	state: ReadState,
	buf: Vec<u8>,
}

impl<D, R> FrameReader<D, R>
where
	D: Decode,
	R: AsyncRead + Unpin,
{
	pub fn new(decoder: D, r: R) -> Self {
		let mut buf = Vec::with_capacity(BUFFER_CAPACITY);
		buf.resize(decoder.expected_len(), 0);
		Self {
			r,
			decoder,
			state: ReadState::Reading { pos: 0 },
			buf,
		}
	}

	fn next_frame(&mut self) {
		self.buf.clear();
		self.buf.resize(self.decoder.expected_len(), 0);
		self.state = ReadState::Reading { pos: 0 };
	}
}

impl<D, R> AsyncRead for FrameReader<D, R>
where
	D: Decode,
	R: AsyncRead + Unpin,
{
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		dst: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		let me = self.get_mut();
		loop {
			match &mut me.state {
				ReadState::Reading { pos } => {
					let n = match ready!(poll_read_exact(Pin::new(&mut me.r), cx, &mut me.buf, pos)) {
						Ok(n) => n,
						Err(e) => {
							me.state = ReadState::Closed;
							return Err(e).into();
						}
					};
					if n == 0 {
						if me.decoder.can_end() {
							trace!("frame reader reached EOF");
							me.state = ReadState::Eof;
							continue;
						}
						me.state = ReadState::Closed;
						return Err(io::Error::new(
							io::ErrorKind::UnexpectedEof,
							"EOF in the middle of a frame",
						))
						.into();
					}
					match me.decoder.decode_inplace(&mut me.buf) {
						Ok(true) => me.state = ReadState::Buffering { pos: 0 },
						Ok(false) => me.next_frame(),
						Err(e) => {
							me.state = ReadState::Closed;
							return Err(io::Error::new(io::ErrorKind::InvalidData, e)).into();
						}
					}
				}
				ReadState::Buffering { pos } => {
					let len = std::cmp::min(me.buf.len() - *pos, dst.remaining());
					dst.put_slice(&me.buf[*pos..*pos + len]);
					*pos += len;
					if *pos == me.buf.len() {
						me.next_frame();
					}
					return Ok(()).into();
				}
				ReadState::Eof => return Ok(()).into(),
				ReadState::Closed => {
					return Err(io::Error::new(
						io::ErrorKind::BrokenPipe,
						"frame reader already closed",
					))
					.into();
				}
			}
		}
	}
}

#[derive(Debug, PartialEq, Eq)]
enum WriteState {
	Encoding,
	/// Writing the encoded buffer from `pos`, `len` source bytes were encoded.
	Writing { pos: usize, len: usize },
	Closed,
}

/// Writer that encodes everything written into it before writing into `w`.
pub struct FrameWriter<E: Encode, W: AsyncWrite + Unpin> {
	pub w: W,
	encoder: E,
	max_payload_len: usize,
	state: WriteState,
	buf: Vec<u8>,
}

impl<E, W> FrameWriter<E, W>
where
	E: Encode,
	W: AsyncWrite + Unpin,
{
	/// Each write encodes at most `max_payload_len` bytes.
	pub fn new(max_payload_len: usize, encoder: E, w: W) -> Self {
		Self {
			w,
			encoder,
			max_payload_len,
			state: WriteState::Encoding,
			buf: Vec::with_capacity(BUFFER_CAPACITY),
		}
	}
}

impl<E, W> AsyncWrite for FrameWriter<E, W>
where
	E: Encode,
	W: AsyncWrite + Unpin,
{
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		src: &[u8],
	) -> Poll<Result<usize, io::Error>> {
		let me = self.get_mut();
		loop {
			match &mut me.state {
				WriteState::Encoding => {
					if src.is_empty() {
						return Ok(0).into();
					}
					let src = &src[..std::cmp::min(src.len(), me.max_payload_len)];
					me.buf.clear();
					me.encoder
						.encode_into(src, &mut me.buf)
						.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
					me.state = WriteState::Writing {
						pos: 0,
						len: src.len(),
					};
				}
				WriteState::Writing { pos, len } => {
					let len = *len;
					ready!(poll_write_all(Pin::new(&mut me.w), cx, pos, &me.buf))?;
					me.state = WriteState::Encoding;
					return Ok(len).into();
				}
				WriteState::Closed => {
					return Err(io::Error::new(
						io::ErrorKind::BrokenPipe,
						"frame writer already closed",
					))
					.into();
				}
			}
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
		let me = self.get_mut();
		if let WriteState::Writing { pos, .. } = &mut me.state {
			ready!(poll_write_all(Pin::new(&mut me.w), cx, pos, &me.buf))?;
			me.state = WriteState::Encoding;
		}
		Pin::new(&mut me.w).poll_flush(cx)
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
		let me = self.get_mut();
		if let WriteState::Writing { pos, .. } = &mut me.state {
			ready!(poll_write_all(Pin::new(&mut me.w), cx, pos, &me.buf))?;
		}
		me.state = WriteState::Closed;
		Pin::new(&mut me.w).poll_shutdown(cx)
	}
}

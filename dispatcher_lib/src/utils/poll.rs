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
use futures::ready;
use std::{
	io,
	task::{Context, Poll},
};
use tokio::io::ReadBuf;

/// Read until `buf` is full, resuming from `*pos`.
///
/// Returns `Ok(0)` on EOF before any byte is read,
/// `Err(UnexpectedEof)` on EOF after a partial read,
/// and `Ok(buf.len())` once `buf` is full.
pub fn poll_read_exact<R>(
	mut reader: Pin<&mut R>,
	cx: &mut Context<'_>,
	buf: &mut [u8],
	pos: &mut usize,
) -> Poll<io::Result<usize>>
where
	R: AsyncRead + ?Sized,
{
	while *pos < buf.len() {
		let mut read_buf = ReadBuf::new(&mut buf[*pos..]);
		ready!(reader.as_mut().poll_read(cx, &mut read_buf))?;
		let n = read_buf.filled().len();
		if n == 0 {
			return Poll::Ready(if *pos == 0 {
				Ok(0)
			} else {
				Err(io::ErrorKind::UnexpectedEof.into())
			});
		}
		*pos += n;
	}
	Poll::Ready(Ok(buf.len()))
}

/// Write all of `src[*pos..]` into `writer`.
pub fn poll_write_all<W>(
	mut writer: Pin<&mut W>,
	cx: &mut Context<'_>,
	pos: &mut usize,
	src: &[u8],
) -> Poll<io::Result<()>>
where
	W: AsyncWrite + ?Sized,
{
	while *pos < src.len() {
		let n = ready!(writer.as_mut().poll_write(cx, &src[*pos..]))?;
		if n == 0 {
			return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
		}
		*pos += n;
	}
	Poll::Ready(Ok(()))
}

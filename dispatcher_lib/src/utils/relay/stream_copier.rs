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

use super::atomic_values::{Counter, Switch};
use crate::{error::Direction, prelude::*};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Copy bytes from `r` to `w` until `r` reaches EOF,
/// then shut `w` down.
pub(super) struct StreamCopier<R, W>
where
	R: AsyncBufRead + Unpin + Send,
	W: AsyncWrite + Unpin + Send,
{
	pub r: R,
	pub w: W,
	pub count: Counter,
	pub tag: Arc<str>,
	pub direction: Direction,
	pub is_other_stopped: Switch,
	pub is_self_stopped: Switch,
}

impl<R, W> StreamCopier<R, W>
where
	R: AsyncBufRead + Unpin + Send,
	W: AsyncWrite + Unpin + Send,
{
	pub async fn run(mut self) -> (Direction, io::Result<()>) {
		let res = self.copy().await;
		self.is_self_stopped.set();
		(self.direction, res)
	}

	async fn copy(&mut self) -> io::Result<()> {
		loop {
			let data = self.r.fill_buf().await?;
			if data.is_empty() {
				debug!("{} read half reached EOF, shutting down write half", self.tag);
				return self.w.shutdown().await;
			}
			let n = match self.w.write(data).await {
				Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
				Ok(n) => n,
				Err(e) if self.is_other_stopped.get() => {
					debug!(
						"{} cannot write ({}), ignored because the other side is closed",
						self.tag, e
					);
					return Ok(());
				}
				Err(e) => return Err(e),
			};
			trace!("{} {} bytes relayed", self.tag, n);
			self.r.consume(n);
			self.count.add(n as u64);
		}
	}
}

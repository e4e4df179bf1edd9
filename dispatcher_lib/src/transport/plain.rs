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

use super::{Descriptor, Transport};
use crate::{error::DialError, prelude::*, protocol::SocksDestination};
use tokio::net::TcpStream;

pub const NAME: &str = "plain";

pub(super) fn descriptor() -> Descriptor {
	Descriptor {
		name: NAME,
		required: &[],
		build: |_| Ok(Transport::Plain),
	}
}

/// Open a TCP connection to `addr` without any proxy.
///
/// # Errors
///
/// Returns [`DialError::Connect`] if the connection cannot be made.
pub async fn connect_tcp(addr: &SocksAddr) -> Result<TcpStream, DialError> {
	trace!("connecting to {}", addr);
	let res = match &addr.dest {
		SocksDestination::Ip(ip) => TcpStream::connect(SocketAddr::new(*ip, addr.port)).await,
		SocksDestination::Name(name) => TcpStream::connect((name.as_str(), addr.port)).await,
	};
	let stream = res.map_err(|source| DialError::Connect {
		addr: addr.to_string(),
		source,
	})?;
	if let Err(e) = stream.set_nodelay(true) {
		debug!("cannot set TCP_NODELAY for {} ({})", addr, e);
	}
	Ok(stream)
}

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
};
use tokio::net::TcpStream;

/// Where an intercepted connection was headed.
///
/// The `address` option wins, then the local address of the connection
/// if the interception preserved it.
fn original_target(
	configured: Option<&SocksAddr>,
	local: Option<SocketAddr>,
	listener: SocketAddr,
) -> Result<SocksAddr, HandshakeError> {
	if let Some(target) = configured {
		return Ok(target.clone());
	}
	match local {
		Some(local) if !is_listener_addr(local, listener) => Ok(local.into()),
		_ => Err(HandshakeError::NoTarget(
			"no 'address' option and the connection was not redirected",
		)),
	}
}

/// Returns `true` if `local` is an address `listener` itself accepts on.
///
/// A wildcard listener accepts on every IP of its port.
fn is_listener_addr(local: SocketAddr, listener: SocketAddr) -> bool {
	local.port() == listener.port()
		&& (listener.ip().is_unspecified() || local.ip() == listener.ip())
}

pub(super) async fn handle(
	conn_id: u64,
	stream: TcpStream,
	peer: SocketAddr,
	listener: SocketAddr,
	endpoint: &ClientEndpoint,
) -> Result<(), Error> {
	let id = format!("{:x}", conn_id);
	let target = original_target(endpoint.target.as_ref(), stream.local_addr().ok(), listener)?;
	let cap = endpoint.capability(None)?;
	info!(
		"[{}] intercepted connection from '{}' to '{}', connecting with '{}'...",
		id,
		peer,
		target,
		cap.name()
	);
	let remote = cap.dial(&target).await?;
	relay_logged(&id, stream.into(), remote).await
}

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
Connection from the server side to the protected service.
*/

pub mod ext_or;

use crate::{config::ServerConfig, error::BackendError, prelude::*};
use std::path::PathBuf;
use tokio::net::TcpStream;

#[derive(Debug, Clone)]
struct ExtendedPort {
	addr: SocketAddr,
	cookie_path: PathBuf,
}

/// Opens backend connections, plain or announced through the extended ORPort.
#[derive(Debug, Clone)]
pub struct Bridge {
	backend_addr: SocketAddr,
	extended: Option<ExtendedPort>,
}

impl Bridge {
	/// # Errors
	///
	/// Returns [`BackendError::MissingCookie`] if `ext_addr` is given without `cookie_path`.
	pub fn new(
		backend_addr: SocketAddr,
		ext_addr: Option<SocketAddr>,
		cookie_path: Option<PathBuf>,
	) -> Result<Self, BackendError> {
		let extended = match (ext_addr, cookie_path) {
			(Some(addr), Some(cookie_path)) => Some(ExtendedPort { addr, cookie_path }),
			(Some(_), None) => return Err(BackendError::MissingCookie),
			(None, _) => None,
		};
		Ok(Self {
			backend_addr,
			extended,
		})
	}

	/// # Errors
	///
	/// Returns [`BackendError::MissingCookie`] if the extended ORPort has no cookie.
	pub fn from_config(conf: &ServerConfig) -> Result<Self, BackendError> {
		Self::new(
			conf.backend_addr,
			conf.ext_backend_addr,
			conf.auth_cookie_path.clone(),
		)
	}

	#[inline]
	#[must_use]
	pub fn backend_addr(&self) -> SocketAddr {
		self.backend_addr
	}

	#[inline]
	#[must_use]
	pub fn is_extended(&self) -> bool {
		self.extended.is_some()
	}

	/// Connect to the backend on behalf of `peer`, which came through `transport`.
	///
	/// # Errors
	///
	/// Returns a [`BackendError`] if the backend cannot be reached or
	/// the extended ORPort handshake fails.
	pub async fn connect(
		&self,
		peer: SocketAddr,
		transport: &str,
	) -> Result<TcpStream, BackendError> {
		let ext = match &self.extended {
			Some(ext) => ext,
			None => return connect_tcp(self.backend_addr).await,
		};
		let cookie = ext_or::read_cookie(&ext.cookie_path)?;
		let mut stream = connect_tcp(ext.addr).await?;
		ext_or::handshake(&mut stream, &cookie, peer, transport).await?;
		debug!(
			"extended ORPort {} accepted {} from '{}'",
			ext.addr, peer, transport
		);
		Ok(stream)
	}
}

async fn connect_tcp(addr: SocketAddr) -> Result<TcpStream, BackendError> {
	let stream = TcpStream::connect(addr)
		.await
		.map_err(|source| BackendError::Connect { addr, source })?;
	if let Err(e) = stream.set_nodelay(true) {
		debug!("cannot set TCP_NODELAY for backend {} ({})", addr, e);
	}
	Ok(stream)
}

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
Client side of the Extended ORPort protocol.

Authentication uses SAFE_COOKIE:
```not_rust
server -> client | auth types ... | 0 |
client -> server | 1 |
client -> server | client nonce (32) |
server -> client | server hash (32) | server nonce (32) |
client -> server | client hash (32) |
server -> client | status (1 is success) |
```
Then commands of the form `| cmd (u16) | len (u16) | body |`, ended by DONE.
*/

use crate::{error::BackendError, prelude::*};
use hmac::{Hmac, Mac, NewMac};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use sha2::Sha256;
use std::{io, path::Path};

pub const AUTH_COOKIE_HEADER: &[u8; 32] = b"! Extended ORPort Auth Cookie !\x0a";
pub const COOKIE_LEN: usize = 32;
pub const NONCE_LEN: usize = 32;
pub const HASH_LEN: usize = 32;

pub const AUTH_TYPE_SAFE_COOKIE: u8 = 1;
const AUTH_SUCCESS: u8 = 1;

const SERVER_HASH_LABEL: &[u8] = b"ExtORPort authentication server-to-client hash";
const CLIENT_HASH_LABEL: &[u8] = b"ExtORPort authentication client-to-server hash";

pub type Cookie = [u8; COOKIE_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Command {
	Done = 0x0000,
	UserAddr = 0x0001,
	Transport = 0x0002,
	Okay = 0x1000,
	Deny = 0x1001,
}

/// Read and check the 64 byte cookie file.
///
/// # Errors
///
/// Returns [`BackendError::Cookie`] if the file cannot be read or is malformed.
pub fn read_cookie(path: &Path) -> Result<Cookie, BackendError> {
	let data = std::fs::read(path).map_err(|e| BackendError::Cookie {
		path: path.into(),
		reason: e.to_string(),
	})?;
	parse_cookie(&data).map_err(|reason| BackendError::Cookie {
		path: path.into(),
		reason: reason.into(),
	})
}

fn parse_cookie(data: &[u8]) -> Result<Cookie, &'static str> {
	if data.len() != AUTH_COOKIE_HEADER.len() + COOKIE_LEN {
		return Err("wrong file size");
	}
	let (header, cookie) = data.split_at(AUTH_COOKIE_HEADER.len());
	if header != AUTH_COOKIE_HEADER {
		return Err("missing header");
	}
	let mut result = [0_u8; COOKIE_LEN];
	result.copy_from_slice(cookie);
	Ok(result)
}

fn hash(
	label: &[u8],
	cookie: &Cookie,
	client_nonce: &[u8],
	server_nonce: &[u8],
) -> Result<Hmac<Sha256>, BackendError> {
	let mut mac = Hmac::<Sha256>::new_from_slice(cookie)
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
	mac.update(label);
	mac.update(client_nonce);
	mac.update(server_nonce);
	Ok(mac)
}

/// # Errors
///
/// Returns an error if `cookie` is not a valid HMAC key.
pub fn server_hash(
	cookie: &Cookie,
	client_nonce: &[u8],
	server_nonce: &[u8],
) -> Result<[u8; HASH_LEN], BackendError> {
	let mac = hash(SERVER_HASH_LABEL, cookie, client_nonce, server_nonce)?;
	Ok(mac.finalize().into_bytes().into())
}

/// # Errors
///
/// Returns an error if `cookie` is not a valid HMAC key.
pub fn client_hash(
	cookie: &Cookie,
	client_nonce: &[u8],
	server_nonce: &[u8],
) -> Result<[u8; HASH_LEN], BackendError> {
	let mac = hash(CLIENT_HASH_LABEL, cookie, client_nonce, server_nonce)?;
	Ok(mac.finalize().into_bytes().into())
}

async fn authenticate<S>(stream: &mut S, cookie: &Cookie) -> Result<(), BackendError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let mut safe_cookie = false;
	loop {
		match stream.read_u8().await? {
			0 => break,
			AUTH_TYPE_SAFE_COOKIE => safe_cookie = true,
			other => trace!("ignoring extended ORPort auth type {}", other),
		}
	}
	if !safe_cookie {
		return Err(BackendError::NoSafeCookie);
	}

	let mut client_nonce = [0_u8; NONCE_LEN];
	rand::thread_rng().fill_bytes(&mut client_nonce);
	let mut buf = Vec::with_capacity(1 + NONCE_LEN);
	buf.put_u8(AUTH_TYPE_SAFE_COOKIE);
	buf.put_slice(&client_nonce);
	stream.write_all(&buf).await?;

	let mut reply = [0_u8; HASH_LEN + NONCE_LEN];
	stream.read_exact(&mut reply).await?;
	let (their_hash, server_nonce) = reply.split_at(HASH_LEN);
	hash(SERVER_HASH_LABEL, cookie, &client_nonce, server_nonce)?
		.verify(their_hash)
		.map_err(|_| BackendError::ServerHashMismatch)?;

	stream
		.write_all(&client_hash(cookie, &client_nonce, server_nonce)?)
		.await?;
	if stream.read_u8().await? != AUTH_SUCCESS {
		return Err(BackendError::AuthRejected);
	}
	Ok(())
}

fn put_command(
	buf: &mut Vec<u8>,
	cmd: Command,
	body: &[u8],
	what: &'static str,
) -> Result<(), BackendError> {
	let len = u16::try_from(body.len()).map_err(|_| BackendError::CommandTooLong(what))?;
	buf.put_u16(cmd.into());
	buf.put_u16(len);
	buf.put_slice(body);
	Ok(())
}

/// Authenticate with `cookie` and announce `peer` and `transport`.
///
/// # Errors
///
/// Returns a [`BackendError`] if authentication fails or the server denies the connection.
pub async fn handshake<S>(
	stream: &mut S,
	cookie: &Cookie,
	peer: SocketAddr,
	transport: &str,
) -> Result<(), BackendError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	authenticate(stream, cookie).await?;
	trace!("extended ORPort authentication done");

	let mut buf = Vec::with_capacity(128);
	put_command(&mut buf, Command::UserAddr, peer.to_string().as_bytes(), "USERADDR")?;
	put_command(&mut buf, Command::Transport, transport.as_bytes(), "TRANSPORT")?;
	put_command(&mut buf, Command::Done, &[], "DONE")?;
	stream.write_all(&buf).await?;

	let reply = stream.read_u16().await?;
	let len = stream.read_u16().await?;
	let mut body = vec![0_u8; usize::from(len)];
	stream.read_exact(&mut body).await?;
	match Command::try_from(reply) {
		Ok(Command::Okay) => Ok(()),
		Ok(Command::Deny) => Err(BackendError::Denied),
		_ => Err(BackendError::UnexpectedReply(reply)),
	}
}

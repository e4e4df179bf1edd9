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
Server side of the SOCKS5 handshake used by the client front-end.

Only CONNECT is supported. The username and password fields of
RFC 1929 authentication are not credentials but transport arguments.
*/

mod utils;

pub use utils::{write_reply, ReplyCode};

use crate::{error::HandshakeError, prelude::*, protocol::socks_addr::ReadError};
use utils::{
	Authentication, CommandCode, Method, AUTH_SUCCESSFUL, NO_ACCEPTABLE_METHOD, SUB_VERS, VER5,
};

pub const PROTOCOL_NAME: &str = "socks5";

/// A CONNECT request that still waits for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
	pub target: SocksAddr,
	/// Raw transport arguments from the authentication fields.
	pub args: Option<String>,
}

/// Read the method selection, the optional authentication and the request.
///
/// No success reply is sent, call [`write_reply`] after the dial.
///
/// # Errors
///
/// Returns a [`HandshakeError`] on malformed or unsupported requests.
/// A failure reply is sent where the protocol has one.
pub async fn accept<S>(stream: &mut S) -> Result<ConnectRequest, HandshakeError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let ver = stream.read_u8().await?;
	if ver != VER5 {
		return Err(HandshakeError::UnsupportedVersion(ver));
	}
	let mut offered = vec![0_u8; usize::from(stream.read_u8().await?)];
	stream.read_exact(&mut offered).await?;

	let method = if let Some(method) = Method::choose(&offered) {
		method
	} else {
		stream.write_all(&[VER5, NO_ACCEPTABLE_METHOD]).await?;
		return Err(HandshakeError::NoAcceptableMethod);
	};
	stream.write_all(&[VER5, method as u8]).await?;

	let args = if method == Method::UsernamePassword {
		trace!("reading SOCKS5 username/password");
		let auth = Authentication::read(stream).await?;
		stream.write_all(&[SUB_VERS, AUTH_SUCCESSFUL]).await?;
		let args = String::from_utf8(auth.args())
			.map_err(|_| HandshakeError::Args("arguments are not UTF-8".into()))?;
		Some(args).filter(|s| !s.is_empty())
	} else {
		None
	};

	// +----+-----+-------+------+----------+----------+
	// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
	// +----+-----+-------+------+----------+----------+
	let mut head = [0_u8; 3];
	stream.read_exact(&mut head).await?;
	if head[0] != VER5 {
		return Err(HandshakeError::UnsupportedVersion(head[0]));
	}
	let target = match SocksAddr::async_read_from(stream).await {
		Ok(target) => target,
		Err(ReadError::UnknownAddressType(atyp)) => {
			write_reply(stream, ReplyCode::AddressTypeNotSupported).await?;
			return Err(ReadError::UnknownAddressType(atyp).into());
		}
		Err(e) => return Err(e.into()),
	};
	if !matches!(CommandCode::try_from(head[1]), Ok(CommandCode::Connect)) {
		debug!("SOCKS5 command {} to {} not supported", head[1], target);
		write_reply(stream, ReplyCode::CommandNotSupported).await?;
		return Err(HandshakeError::UnsupportedCommand(head[1]));
	}
	debug!("SOCKS5 CONNECT to {}", target);
	Ok(ConnectRequest { target, args })
}

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
use num_enum::TryFromPrimitive;
use std::{fmt::Display, io};

pub const VER5: u8 = 5;
/// Subnegotiation version.
///
/// See more at <https://datatracker.ietf.org/doc/html/rfc1929#section-2>
pub const SUB_VERS: u8 = 1;
pub(super) const AUTH_SUCCESSFUL: u8 = 0;
pub(super) const NO_ACCEPTABLE_METHOD: u8 = 0xff;

#[derive(Debug, TryFromPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum CommandCode {
	Connect = 1,
	Bind = 2,
	Udp = 3,
}

impl Display for CommandCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			CommandCode::Connect => write!(f, "CONNECT"),
			CommandCode::Bind => write!(f, "BIND"),
			CommandCode::Udp => write!(f, "UDP_ASSOCIATE"),
		}?;
		write!(f, "({})", *self as u8)
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Method {
	NoAuthentication = 0,
	UsernamePassword = 2,
}

impl Method {
	/// Username/password is preferred, the fields carry transport arguments.
	#[must_use]
	pub fn choose(offered: &[u8]) -> Option<Self> {
		if offered.contains(&(Method::UsernamePassword as u8)) {
			Some(Method::UsernamePassword)
		} else if offered.contains(&(Method::NoAuthentication as u8)) {
			Some(Method::NoAuthentication)
		} else {
			None
		}
	}
}

/// SOCKS5 reply code.
///
/// See more at <https://datatracker.ietf.org/doc/html/rfc1928#section-6>.
#[derive(Debug, TryFromPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum ReplyCode {
	Succeeded = 0,
	SocksFailure = 1,
	NotAllowedByRuleset = 2,
	NetworkUnreachable = 3,
	HostUnreachable = 4,
	ConnectionRefused = 5,
	TtlExpired = 6,
	CommandNotSupported = 7,
	AddressTypeNotSupported = 8,
}

impl ReplyCode {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			ReplyCode::Succeeded => "succeeded",
			ReplyCode::SocksFailure => "socks failure",
			ReplyCode::NotAllowedByRuleset => "not allowed by ruleset",
			ReplyCode::NetworkUnreachable => "network unreachable",
			ReplyCode::HostUnreachable => "host unreachable",
			ReplyCode::ConnectionRefused => "connection refused",
			ReplyCode::TtlExpired => "ttl expired",
			ReplyCode::CommandNotSupported => "command not supported",
			ReplyCode::AddressTypeNotSupported => "address type not supported",
		}
	}

	/// Reply code for a failed dial.
	#[must_use]
	pub fn from_io_kind(kind: io::ErrorKind) -> Self {
		match kind {
			io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
			io::ErrorKind::TimedOut => ReplyCode::TtlExpired,
			io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
				ReplyCode::HostUnreachable
			}
			_ => ReplyCode::SocksFailure,
		}
	}
}

impl Display for ReplyCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Username/password subnegotiation.
///
/// ```not_rust
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub struct Authentication {
	pub user: Vec<u8>,
	pub pass: Vec<u8>,
}

impl Authentication {
	pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Self> {
		let ver = r.read_u8().await?;
		if ver != SUB_VERS {
			return Err(io::Error::new(
				io::ErrorKind::InvalidData,
				format!("invalid SOCKS5 authentication version {}", ver),
			));
		}
		let mut user = vec![0_u8; usize::from(r.read_u8().await?)];
		r.read_exact(&mut user).await?;
		let mut pass = vec![0_u8; usize::from(r.read_u8().await?)];
		r.read_exact(&mut pass).await?;
		Ok(Self { user, pass })
	}

	/// Transport arguments carried in the two fields.
	///
	/// A password of a single NUL byte is a placeholder and ignored.
	#[must_use]
	pub fn args(&self) -> Vec<u8> {
		let mut args = self.user.clone();
		if self.pass != b"\0" {
			args.extend_from_slice(&self.pass);
		}
		args
	}
}

/// Write a reply with an unspecified bound address.
///
///```not_rust
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   |    4     |    2     |
/// +----+-----+-------+------+----------+----------+
///```
pub async fn write_reply<W: AsyncWrite + Unpin>(w: &mut W, code: ReplyCode) -> io::Result<()> {
	let mut buf = Vec::with_capacity(10);
	buf.put_u8(VER5);
	buf.put_u8(code as u8);
	buf.put_u8(0);
	SocksAddr::from(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)).write_to(&mut buf);
	w.write_all(&buf).await?;
	w.flush().await
}

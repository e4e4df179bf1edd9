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
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smol_str::SmolStr;
use std::{
	fmt::{self, Display},
	io,
};

const EMPTY_STRING: &str = "empty string";

// See more at <https://tools.ietf.org/html/rfc1928>
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AddrType {
	Ipv4 = 1_u8,
	Name = 3_u8,
	Ipv6 = 4_u8,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
	#[error("str is not utf8 ({0})")]
	StrNotUtf8(std::str::Utf8Error),
	#[error("unknown address type {0}")]
	UnknownAddressType(u8),
	#[error("invalid domain ({0})")]
	InvalidDomain(BoxStdErr),
	#[error("invalid port ({0})")]
	InvalidPort(BoxStdErr),
	#[error("invalid address ({0})")]
	InvalidAddress(BoxStdErr),
	#[error("IO error ({0})")]
	Io(#[from] io::Error),
}

impl ReadError {
	#[must_use]
	pub fn into_io_err(self) -> io::Error {
		if let Self::Io(e) = self {
			e
		} else {
			io::Error::new(io::ErrorKind::InvalidData, self)
		}
	}
}

// -------------------------------------------------------
//                     SocksDestination
// -------------------------------------------------------

/// Host part of a target address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SocksDestination {
	/// Must be a valid domain name.
	Name(DomainName),
	Ip(IpAddr),
}

impl SocksDestination {
	#[inline]
	#[must_use]
	pub fn atyp(&self) -> AddrType {
		match self {
			SocksDestination::Name(_) => AddrType::Name,
			SocksDestination::Ip(IpAddr::V4(_)) => AddrType::Ipv4,
			SocksDestination::Ip(IpAddr::V6(_)) => AddrType::Ipv6,
		}
	}

	/// Read a destination of type `atyp` from `r`.
	///
	/// The format for each address type are as following:
	/// - [`AddrType::Ipv4`]: | 4 bytes |
	/// - [`AddrType::Ipv6`]: | 16 bytes |
	/// - [`AddrType::Name`]: | n, 1 byte | n bytes |
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if the bytes cannot be read or are invalid.
	pub async fn async_read_from_atyp(
		r: &mut (impl AsyncRead + Unpin),
		atyp: AddrType,
	) -> Result<Self, ReadError> {
		Ok(match atyp {
			AddrType::Ipv4 => Ipv4Addr::from(r.read_u32().await?).into(),
			AddrType::Ipv6 => Ipv6Addr::from(r.read_u128().await?).into(),
			AddrType::Name => {
				let len = usize::from(r.read_u8().await?);
				if len == 0 {
					return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
				}
				let mut buffer = [0_u8; 256];
				let buffer = &mut buffer[..len];
				r.read_exact(buffer).await?;
				let name = std::str::from_utf8(buffer).map_err(ReadError::StrNotUtf8)?;
				SocksDestination::from_str(name)?
			}
		})
	}

	pub fn write_to_no_atyp(&self, buf: &mut impl BufMut) {
		match self {
			SocksDestination::Name(name) => {
				buf.put_u8(name.len());
				buf.put_slice(name.as_str().as_bytes());
			}
			SocksDestination::Ip(IpAddr::V4(ip)) => buf.put_slice(&ip.octets()),
			SocksDestination::Ip(IpAddr::V6(ip)) => buf.put_slice(&ip.octets()),
		}
	}
}

impl FromStr for SocksDestination {
	type Err = ReadError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
		}
		if let Ok(ip) = IpAddr::from_str(s) {
			return Ok(Self::Ip(ip));
		}
		DomainName::from_str(s).map(Self::Name)
	}
}

impl From<IpAddr> for SocksDestination {
	#[inline]
	fn from(ip: IpAddr) -> Self {
		Self::Ip(ip)
	}
}

impl From<Ipv4Addr> for SocksDestination {
	#[inline]
	fn from(ip: Ipv4Addr) -> Self {
		Self::Ip(ip.into())
	}
}

impl From<Ipv6Addr> for SocksDestination {
	#[inline]
	fn from(ip: Ipv6Addr) -> Self {
		Self::Ip(ip.into())
	}
}

impl Display for SocksDestination {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Ip(ip) => ip.fmt(f),
			Self::Name(name) => name.fmt(f),
		}
	}
}

// -------------------------------------------------------
//                       SocksAddr
// -------------------------------------------------------

/// Target address of a dial: host and port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocksAddr {
	pub dest: SocksDestination,
	pub port: u16,
}

impl SocksAddr {
	#[inline]
	#[must_use]
	pub fn new(dest: SocksDestination, port: u16) -> Self {
		Self { dest, port }
	}

	/// Read an address in SOCKS5 format:
	/// ```not_rust
	/// +------+----------------+----------------+
	/// | ATYP |  Destination   |     Port       |
	/// +------+----------------+----------------+
	/// | u8   | various bytes  | big endian u16 |
	/// +------+----------------+----------------+
	/// ```
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if the bytes cannot be read or are invalid.
	pub async fn async_read_from<R>(r: &mut R) -> Result<Self, ReadError>
	where
		R: AsyncRead + Unpin,
	{
		let atyp_num = r.read_u8().await?;
		let atyp =
			AddrType::try_from(atyp_num).map_err(|_| ReadError::UnknownAddressType(atyp_num))?;
		let dest = SocksDestination::async_read_from_atyp(r, atyp).await?;
		let port = r.read_u16().await?;
		Ok(Self::new(dest, port))
	}

	/// Write the address into `buf` in SOCKS5 format.
	#[inline]
	pub fn write_to<B: BufMut>(&self, buf: &mut B) {
		buf.put_u8(self.dest.atyp().into());
		self.dest.write_to_no_atyp(buf);
		buf.put_u16(self.port);
	}

	/// Returns the socket address if the destination is an IP.
	#[inline]
	#[must_use]
	pub fn as_socket_addr(&self) -> Option<SocketAddr> {
		match &self.dest {
			SocksDestination::Ip(ip) => Some(SocketAddr::new(*ip, self.port)),
			SocksDestination::Name(_) => None,
		}
	}

	/// Parse `host:port`, `[ipv6]:port` or `ip:port`.
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if the port is missing or anything is invalid.
	pub fn parse_str(s: &str) -> Result<Self, ReadError> {
		if let Ok(addr) = s.parse::<SocketAddr>() {
			return Ok(addr.into());
		}
		if s.is_empty() {
			return Err(ReadError::InvalidAddress(EMPTY_STRING.into()));
		}
		let (host, port) = s
			.rsplit_once(':')
			.ok_or_else(|| ReadError::InvalidAddress("missing port".into()))?;
		if port.is_empty() {
			return Err(ReadError::InvalidPort(EMPTY_STRING.into()));
		}
		let port = port
			.parse::<u16>()
			.map_err(|e| ReadError::InvalidPort(e.into()))?;
		let dest = SocksDestination::from_str(host)?;
		Ok(Self { dest, port })
	}
}

impl FromStr for SocksAddr {
	type Err = ReadError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse_str(s)
	}
}

impl Display for SocksAddr {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.dest {
			SocksDestination::Name(name) => write!(f, "{}:{}", name, self.port),
			SocksDestination::Ip(ip) => SocketAddr::new(*ip, self.port).fmt(f),
		}
	}
}

impl From<SocketAddr> for SocksAddr {
	#[inline]
	fn from(addr: SocketAddr) -> Self {
		Self {
			dest: addr.ip().into(),
			port: addr.port(),
		}
	}
}

// -------------------------------------------------------
//                     DomainName
// -------------------------------------------------------

/// A domain string that's guaranteed to be at most 255 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainName(SmolStr);

impl DomainName {
	#[inline]
	#[must_use]
	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}

	#[allow(clippy::cast_possible_truncation)]
	#[inline]
	#[must_use]
	pub fn len(&self) -> u8 {
		// Checked when constructed.
		self.0.len() as u8
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl FromStr for DomainName {
	type Err = ReadError;

	fn from_str(v: &str) -> Result<Self, ReadError> {
		let v = v.strip_suffix('.').unwrap_or(v);
		if v.is_empty() {
			return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
		}
		let name =
			idna::domain_to_ascii_strict(v).map_err(|e| ReadError::InvalidDomain(e.into()))?;
		if name.len() > 255 {
			return Err(ReadError::InvalidDomain("too long".into()));
		}
		Ok(Self(SmolStr::new(&name)))
	}
}

impl Display for DomainName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.0, f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_str() {
		let addr = SocksAddr::parse_str("127.0.0.1:2222").unwrap();
		assert_eq!(addr.as_socket_addr(), Some("127.0.0.1:2222".parse().unwrap()));

		let addr = SocksAddr::parse_str("[::1]:80").unwrap();
		assert_eq!(addr.port, 80);
		assert_eq!(addr.dest, SocksDestination::Ip(Ipv6Addr::LOCALHOST.into()));

		let addr = SocksAddr::parse_str("example.com:443").unwrap();
		assert_eq!(addr.to_string(), "example.com:443");
		assert!(addr.as_socket_addr().is_none());

		assert!(SocksAddr::parse_str("").is_err());
		assert!(SocksAddr::parse_str("example.com").is_err());
		assert!(SocksAddr::parse_str("example.com:").is_err());
		assert!(SocksAddr::parse_str("example.com:70000").is_err());
	}

	#[test]
	fn test_write_and_read() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let inputs = [
				SocksAddr::parse_str("1.2.3.4:80").unwrap(),
				SocksAddr::parse_str("[1:2:3:4:5:6:7:8]:443").unwrap(),
				SocksAddr::parse_str("hello.world:8080").unwrap(),
			];
			let expected: [&[u8]; 3] = [
				&[1, 1, 2, 3, 4, 0, 80],
				&[
					4, 0, 1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0, 7, 0, 8, 1, 187,
				],
				&[
					3, 11, b'h', b'e', b'l', b'l', b'o', b'.', b'w', b'o', b'r', b'l', b'd', 31,
					144,
				],
			];
			for (addr, expected) in inputs.iter().zip(expected.iter()) {
				let mut buf = Vec::new();
				addr.write_to(&mut buf);
				assert_eq!(&buf, expected);
				let read = SocksAddr::async_read_from(&mut buf.as_slice()).await.unwrap();
				assert_eq!(&read, addr);
			}
		});
	}

	#[test]
	fn test_read_unknown_atyp() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let buf = [2_u8, 0, 0, 0, 0, 0, 0];
			let err = SocksAddr::async_read_from(&mut &buf[..]).await.unwrap_err();
			assert!(matches!(err, ReadError::UnknownAddressType(2)));
		});
	}
}

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

use std::fmt::{self, Display};

/// Front-end used to accept local application traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyMode {
	/// SOCKS5 CONNECT proxy.
	SocksAware,
	/// Intercepted TCP connections.
	TransparentTcp,
	/// Intercepted UDP datagrams.
	TransparentUdp,
	/// UDP datagrams whose target is learned from STUN messages.
	StunAware,
}

impl ProxyMode {
	#[inline]
	#[must_use]
	pub fn is_udp(self) -> bool {
		matches!(self, Self::TransparentUdp | Self::StunAware)
	}

	/// Name used in `CMETHOD` lines.
	#[inline]
	#[must_use]
	pub fn method_name(self) -> &'static str {
		match self {
			Self::SocksAware => "socks5",
			Self::TransparentTcp => "transparent-tcp",
			Self::TransparentUdp => "transparent-udp",
			Self::StunAware => "stun-udp",
		}
	}
}

impl Display for ProxyMode {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.method_name())
	}
}

/// Map the `-transparent` and `-udp` flags to a [`ProxyMode`].
#[must_use]
pub fn select(transparent: bool, udp: bool) -> ProxyMode {
	let mode = match (transparent, udp) {
		(false, false) => ProxyMode::SocksAware,
		(true, false) => ProxyMode::TransparentTcp,
		(false, true) => ProxyMode::StunAware,
		(true, true) => ProxyMode::TransparentUdp,
	};
	log::info!("initializing {} proxy", mode);
	mode
}

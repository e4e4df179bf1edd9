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
Just enough STUN (RFC 5389) to learn where a datagram flow is headed.

```not_rust
 0                   1                   2                   3
 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
|0 0|     STUN Message Type     |         Message Length        |
+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
|                         Magic Cookie                          |
+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
|                     Transaction ID (96 bits)                  |
+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
```
*/

use crate::{error::HandshakeError, prelude::*};

pub const MAGIC_COOKIE: u32 = 0x2112_A442;
pub const HEADER_LEN: usize = 20;
pub const ATTR_XOR_PEER_ADDRESS: u16 = 0x0012;
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_V4: u8 = 0x01;
const FAMILY_V6: u8 = 0x02;

/// Returns `true` if `data` has a valid STUN header.
#[must_use]
pub fn is_stun(data: &[u8]) -> bool {
	if data.len() < HEADER_LEN || data[0] & 0xc0 != 0 {
		return false;
	}
	let mut buf = &data[2..8];
	let len = usize::from(buf.get_u16());
	buf.get_u32() == MAGIC_COOKIE && len % 4 == 0 && HEADER_LEN + len <= data.len()
}

/// Find the target of a STUN message.
///
/// XOR-PEER-ADDRESS is preferred over XOR-MAPPED-ADDRESS.
/// Returns `Ok(None)` if the message has neither.
///
/// # Errors
///
/// Returns [`HandshakeError::NotStun`] if `data` is not a STUN message.
pub fn target_addr(data: &[u8]) -> Result<Option<SocketAddr>, HandshakeError> {
	if !is_stun(data) {
		return Err(HandshakeError::NotStun);
	}
	let txn_id = &data[8..HEADER_LEN];
	let len = usize::from(u16::from_be_bytes([data[2], data[3]]));
	let mut attrs = &data[HEADER_LEN..HEADER_LEN + len];

	let mut mapped = None;
	while attrs.len() >= 4 {
		let atype = attrs.get_u16();
		let alen = usize::from(attrs.get_u16());
		if attrs.len() < alen {
			trace!("truncated STUN attribute {:#06x}", atype);
			break;
		}
		let value = &attrs[..alen];
		match atype {
			ATTR_XOR_PEER_ADDRESS => {
				if let Some(addr) = xor_address(value, txn_id) {
					return Ok(Some(addr));
				}
			}
			ATTR_XOR_MAPPED_ADDRESS => {
				mapped = mapped.or_else(|| xor_address(value, txn_id));
			}
			_ => {}
		}
		// Values are padded to 4 bytes.
		let padded = (alen + 3) & !3;
		attrs.advance(padded.min(attrs.len()));
	}
	Ok(mapped)
}

fn xor_address(mut value: &[u8], txn_id: &[u8]) -> Option<SocketAddr> {
	if value.len() < 4 {
		return None;
	}
	let _reserved = value.get_u8();
	let family = value.get_u8();
	#[allow(clippy::cast_possible_truncation)]
	let port = value.get_u16() ^ (MAGIC_COOKIE >> 16) as u16;
	let ip = match family {
		FAMILY_V4 if value.len() >= 4 => {
			IpAddr::from(Ipv4Addr::from(value.get_u32() ^ MAGIC_COOKIE))
		}
		FAMILY_V6 if value.len() >= 16 => {
			let mut mask = [0_u8; 16];
			mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
			mask[4..].copy_from_slice(txn_id);
			let mut octets = [0_u8; 16];
			for (i, b) in octets.iter_mut().enumerate() {
				*b = value[i] ^ mask[i];
			}
			IpAddr::from(Ipv6Addr::from(octets))
		}
		_ => return None,
	};
	Some(SocketAddr::new(ip, port))
}

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
The `shadow` transport, an AEAD encrypted stream.

Each direction starts with a random salt used to derive the session key,
followed by any number of chunks:
```not_rust
+------------------+------------+-------------+----------+
|    encrypted     |   length   |  encrypted  |  payload |
|  payload length  |    tag     |   payload   |    tag   |
+------------------+------------+-------------+----------+
|     2 bytes      |  16 bytes  |  n bytes    | 16 bytes |
+------------------+------------+-------------+----------+
```
The payload length is at most `0x3FFF` and never zero.

The salt of the remote side is read with the first chunk, so wrapping
a freshly accepted stream never waits for the peer.
*/

mod crypto;

pub use crypto::Cipher;

use super::Descriptor;
use crate::{
	error::ConfigurationError,
	options::Args,
	prelude::*,
	protocol::{BoxRead, BoxWrite, BytesStream},
	utils::codec::{Decode, Encode, FrameReader, FrameWriter},
};
use crypto::{evp_bytes_to_key, session_key, Opener, Sealer, TAG_LEN};

pub const NAME: &str = "shadow";
const MAX_PAYLOAD_LEN: usize = 0x3FFF;

pub(super) fn descriptor() -> Descriptor {
	Descriptor {
		name: NAME,
		required: &["password", "cipherName"],
		build: |args| Ok(super::Transport::Shadow(Arc::new(ShadowSettings::from_args(args)?))),
	}
}

#[derive(Clone)]
pub struct ShadowSettings {
	cipher: Cipher,
	master_key: Arc<[u8]>,
}

impl std::fmt::Debug for ShadowSettings {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ShadowSettings")
			.field("cipher", &self.cipher)
			.finish()
	}
}

impl ShadowSettings {
	#[must_use]
	pub fn new(cipher: Cipher, password: &str) -> Self {
		Self {
			cipher,
			master_key: evp_bytes_to_key(password.as_bytes(), cipher.key_len()).into(),
		}
	}

	/// Build from `password` and `cipherName`.
	///
	/// # Errors
	///
	/// Returns a [`ConfigurationError`] if either is missing or the cipher is unknown.
	pub fn from_args(args: &Args) -> Result<Self, ConfigurationError> {
		let password = args.get("password").ok_or(ConfigurationError::MissingParameter {
			transport: NAME.into(),
			missing: "password",
		})?;
		let cipher = args
			.get("cipherName")
			.ok_or(ConfigurationError::MissingParameter {
				transport: NAME.into(),
				missing: "cipherName",
			})?
			.parse::<Cipher>()
			.map_err(|reason| ConfigurationError::InvalidParameter {
				transport: NAME.into(),
				param: "cipherName",
				reason,
			})?;
		Ok(Self::new(cipher, password))
	}

	#[inline]
	#[must_use]
	pub fn cipher(&self) -> Cipher {
		self.cipher
	}

	/// Wrap `stream`. The same for both ends of a connection.
	#[must_use]
	pub fn wrap(&self, stream: BytesStream) -> BytesStream {
		let (r, w) = stream.into_split();
		let mut salt = vec![0_u8; self.cipher.key_len()];
		rand::thread_rng().fill_bytes(&mut salt);
		let r: FrameReader<Decoder, BoxRead> = FrameReader::new(
			Decoder {
				cipher: self.cipher,
				master_key: self.master_key.clone(),
				opener: None,
				state: DecodeState::Salt,
			},
			r,
		);
		let w: FrameWriter<Encoder, BoxWrite> = FrameWriter::new(
			MAX_PAYLOAD_LEN,
			Encoder {
				cipher: self.cipher,
				master_key: self.master_key.clone(),
				salt,
				sealer: None,
			},
			w,
		);
		BytesStream::new(Box::new(r), Box::new(w))
	}
}

enum DecodeState {
	Salt,
	Length,
	Payload(usize),
}

struct Decoder {
	cipher: Cipher,
	master_key: Arc<[u8]>,
	opener: Option<Opener>,
	state: DecodeState,
}

impl Decoder {
	fn open(&mut self, buf: &mut [u8]) -> Result<usize, BoxStdErr> {
		self.opener
			.as_mut()
			.ok_or("salt not read yet")?
			.open(buf)
	}
}

impl Decode for Decoder {
	fn expected_len(&self) -> usize {
		match self.state {
			DecodeState::Salt => self.cipher.key_len(),
			DecodeState::Length => 2 + TAG_LEN,
			DecodeState::Payload(len) => len + TAG_LEN,
		}
	}

	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
		match self.state {
			DecodeState::Salt => {
				trace!("reading shadow salt");
				let key = session_key(self.cipher, &self.master_key, buf)?;
				self.opener = Some(Opener::new(self.cipher, &key)?);
				self.state = DecodeState::Length;
				Ok(false)
			}
			DecodeState::Length => {
				self.open(buf)?;
				let len = usize::from((&buf[..2]).get_u16());
				if len == 0 {
					return Err("zero length shadow chunk".into());
				}
				if len > MAX_PAYLOAD_LEN {
					return Err(format!("shadow chunk too long ({} bytes)", len).into());
				}
				self.state = DecodeState::Payload(len);
				Ok(false)
			}
			DecodeState::Payload(len) => {
				self.open(buf)?;
				buf.truncate(len);
				self.state = DecodeState::Length;
				Ok(true)
			}
		}
	}

	fn can_end(&self) -> bool {
		matches!(self.state, DecodeState::Salt | DecodeState::Length)
	}
}

struct Encoder {
	cipher: Cipher,
	master_key: Arc<[u8]>,
	/// Written before the first chunk.
	salt: Vec<u8>,
	sealer: Option<Sealer>,
}

impl Encode for Encoder {
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		if src.is_empty() || src.len() > MAX_PAYLOAD_LEN {
			return Err(format!("invalid shadow payload length {}", src.len()).into());
		}
		if self.sealer.is_none() {
			let key = session_key(self.cipher, &self.master_key, &self.salt)?;
			self.sealer = Some(Sealer::new(self.cipher, &key)?);
			buf.put_slice(&self.salt);
			self.salt = Vec::new();
		}
		let sealer = self.sealer.as_mut().ok_or("shadow sealer not ready")?;
		buf.reserve(2 + TAG_LEN + src.len() + TAG_LEN);

		let start = buf.len();
		#[allow(clippy::cast_possible_truncation)]
		buf.put_u16(src.len() as u16);
		sealer.seal_append(buf, start)?;

		let start = buf.len();
		buf.put_slice(src);
		sealer.seal_append(buf, start)?;
		Ok(())
	}
}

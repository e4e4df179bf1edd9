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

use crate::prelude::BoxStdErr;
use hkdf::Hkdf;
use md5::{Digest, Md5};
use ring::aead::{
	Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_128_GCM,
	AES_256_GCM, CHACHA20_POLY1305,
};
use sha1::Sha1;
use std::{fmt, str::FromStr};

pub const TAG_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const SUBKEY_INFO: &[u8] = b"ss-subkey";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
	Aes128Gcm,
	Aes256Gcm,
	ChaCha20Poly1305,
}

impl Cipher {
	/// Length of keys and salts.
	#[inline]
	#[must_use]
	pub fn key_len(self) -> usize {
		match self {
			Cipher::Aes128Gcm => 16,
			Cipher::Aes256Gcm | Cipher::ChaCha20Poly1305 => 32,
		}
	}

	fn algorithm(self) -> &'static ring::aead::Algorithm {
		match self {
			Cipher::Aes128Gcm => &AES_128_GCM,
			Cipher::Aes256Gcm => &AES_256_GCM,
			Cipher::ChaCha20Poly1305 => &CHACHA20_POLY1305,
		}
	}
}

impl FromStr for Cipher {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s.to_ascii_lowercase().as_str() {
			"aes-128-gcm" | "aes-128" => Cipher::Aes128Gcm,
			"aes-256-gcm" | "aes-256" => Cipher::Aes256Gcm,
			"chacha20-ietf-poly1305" | "chacha20-poly1305" | "chacha20" => Cipher::ChaCha20Poly1305,
			_ => return Err(format!("unknown cipher '{}'", s)),
		})
	}
}

impl fmt::Display for Cipher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Cipher::Aes128Gcm => "aes-128-gcm",
			Cipher::Aes256Gcm => "aes-256-gcm",
			Cipher::ChaCha20Poly1305 => "chacha20-ietf-poly1305",
		})
	}
}

/// OpenSSL `EVP_BytesToKey` with MD5 and no salt.
#[must_use]
pub fn evp_bytes_to_key(password: &[u8], key_len: usize) -> Vec<u8> {
	let mut result = Vec::with_capacity(key_len + 16);
	let mut prev: Option<Vec<u8>> = None;
	let mut d = Md5::new();
	while result.len() < key_len {
		if let Some(prev) = &prev {
			d.update(prev);
		}
		d.update(password);
		let digest = d.finalize_reset().to_vec();
		result.extend_from_slice(&digest);
		prev = Some(digest);
	}
	result.truncate(key_len);
	result
}

/// Derive the per-direction key from the master key and the salt.
///
/// # Errors
///
/// Returns an error if `cipher.key_len()` is too long for HKDF-SHA1.
pub fn session_key(cipher: Cipher, master: &[u8], salt: &[u8]) -> Result<Vec<u8>, BoxStdErr> {
	let mut okm = vec![0_u8; cipher.key_len()];
	Hkdf::<Sha1>::new(Some(salt), master)
		.expand(SUBKEY_INFO, &mut okm)
		.map_err(|_| "invalid session key length")?;
	Ok(okm)
}

/// Little-endian counter starting from zero.
struct CounterNonce([u8; NONCE_LEN]);

impl NonceSequence for CounterNonce {
	fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
		let nonce = Nonce::assume_unique_for_key(self.0);
		for b in &mut self.0 {
			if *b == u8::MAX {
				*b = 0;
			} else {
				*b += 1;
				break;
			}
		}
		Ok(nonce)
	}
}

fn unbound_key(cipher: Cipher, key: &[u8]) -> Result<UnboundKey, BoxStdErr> {
	UnboundKey::new(cipher.algorithm(), key)
		.map_err(|_| format!("invalid key length {} for {}", key.len(), cipher).into())
}

pub struct Sealer(SealingKey<CounterNonce>);

impl Sealer {
	/// # Errors
	///
	/// Returns an error if `key` does not fit `cipher`.
	pub fn new(cipher: Cipher, key: &[u8]) -> Result<Self, BoxStdErr> {
		Ok(Self(SealingKey::new(
			unbound_key(cipher, key)?,
			CounterNonce([0; NONCE_LEN]),
		)))
	}

	/// Seal `buf[start..]` in place and append the tag.
	///
	/// # Errors
	///
	/// Returns an error if sealing failed.
	pub fn seal_append(&mut self, buf: &mut Vec<u8>, start: usize) -> Result<(), BoxStdErr> {
		let tag = self
			.0
			.seal_in_place_separate_tag(Aad::empty(), &mut buf[start..])
			.map_err(|_| "cannot seal payload")?;
		buf.extend_from_slice(tag.as_ref());
		Ok(())
	}
}

pub struct Opener(OpeningKey<CounterNonce>);

impl Opener {
	/// # Errors
	///
	/// Returns an error if `key` does not fit `cipher`.
	pub fn new(cipher: Cipher, key: &[u8]) -> Result<Self, BoxStdErr> {
		Ok(Self(OpeningKey::new(
			unbound_key(cipher, key)?,
			CounterNonce([0; NONCE_LEN]),
		)))
	}

	/// Open `buf` (payload followed by tag) in place.
	///
	/// Returns the length of the payload.
	///
	/// # Errors
	///
	/// Returns an error if `buf` cannot be authenticated.
	pub fn open(&mut self, buf: &mut [u8]) -> Result<usize, BoxStdErr> {
		self.0
			.open_in_place(Aad::empty(), buf)
			.map(|plain| plain.len())
			.map_err(|_| "cannot authenticate payload".into())
	}
}

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
Transport options.

An options string is either the PT2 `key=value;key=value` grammar or a
JSON object. Keys prefixed with `transport:` only apply to that
transport; bare keys apply to every transport.

```not_rust
shadow:password=p;shadow:cipherName=aes-256
password=p;cipherName=aes-256
{"shadow": {"password": "p", "cipherName": "aes-256"}}
```
*/

mod parse;
mod source;

pub use parse::{parse_args, parse_options};
pub use source::{load, EnvSource, FileSource, InlineSource, OptionsSource};

use crate::prelude::*;
use std::collections::HashMap;

/// Parameters of a single transport, each key may have more than one value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Args(HashMap<String, Vec<String>>);

impl Args {
	#[inline]
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the first value of `key`.
	#[must_use]
	pub fn get(&self, key: &str) -> Option<&str> {
		self.0
			.get(key)
			.and_then(|values| values.first())
			.map(String::as_str)
	}

	#[must_use]
	pub fn get_all(&self, key: &str) -> &[String] {
		self.0.get(key).map_or(&[], Vec::as_slice)
	}

	/// Append `value` to the values of `key`.
	pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.0.entry(key.into()).or_default().push(value.into());
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Append every value of `other`, after the values already present.
	pub fn extend(&mut self, other: &Args) {
		for (key, values) in &other.0 {
			self.0
				.entry(key.clone())
				.or_default()
				.extend(values.iter().cloned());
		}
	}
}

/// Options of every transport, built once and never modified.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OptionsTable {
	transports: HashMap<Tag, Args>,
	common: Args,
	explicit: bool,
}

impl OptionsTable {
	/// Table with no options that was not given by the user.
	#[inline]
	#[must_use]
	pub fn empty() -> Self {
		Self::default()
	}

	/// Table holding `args` for `transport` only.
	#[must_use]
	pub fn with_args(transport: &str, args: Args) -> Self {
		let mut transports = HashMap::new();
		transports.insert(Tag::new(transport), args);
		Self {
			transports,
			common: Args::new(),
			explicit: true,
		}
	}

	/// Returns `true` if this table comes from user supplied options,
	/// even if it has no entry at all.
	#[inline]
	#[must_use]
	pub fn is_explicit(&self) -> bool {
		self.explicit
	}

	/// Arguments of `transport`.
	///
	/// Values scoped to `transport` come before values that apply to all transports,
	/// so they take precedence in [`Args::get`].
	#[must_use]
	pub fn args_for(&self, transport: &str) -> Args {
		let mut args = self.transports.get(transport).cloned().unwrap_or_default();
		args.extend(&self.common);
		args
	}

	pub(crate) fn add_scoped(&mut self, transport: &str, key: &str, value: String) {
		self.transports
			.entry(Tag::new(transport))
			.or_default()
			.add(key, value);
	}

	pub(crate) fn add_common(&mut self, key: &str, value: String) {
		self.common.add(key, value);
	}

	pub(crate) fn mark_explicit(&mut self) {
		self.explicit = true;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_args_for_precedence() {
		let table = parse_options("cipherName=aes-128;shadow:cipherName=aes-256;password=p").unwrap();
		let args = table.args_for("shadow");
		assert_eq!(args.get("cipherName"), Some("aes-256"));
		assert_eq!(args.get_all("cipherName"), ["aes-256", "aes-128"]);
		assert_eq!(args.get("password"), Some("p"));

		let args = table.args_for("plain");
		assert_eq!(args.get("cipherName"), Some("aes-128"));
		assert_eq!(args.get("missing"), None);
	}

	#[test]
	fn test_empty_table() {
		let table = OptionsTable::empty();
		assert!(!table.is_explicit());
		assert!(table.args_for("shadow").is_empty());

		let mut args = Args::new();
		args.add("password", "p");
		let table = OptionsTable::with_args("shadow", args.clone());
		assert!(table.is_explicit());
		assert_eq!(table.args_for("shadow"), args);
		assert!(table.args_for("plain").is_empty());
	}
}

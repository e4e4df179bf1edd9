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

use super::{Args, OptionsTable};
use crate::error::ConfigurationError;
use serde_json::Value;

struct Pair {
	scope: Option<String>,
	key: String,
	value: String,
}

#[derive(Default)]
struct PairBuilder {
	key: String,
	value: String,
	/// Position of the first unescaped ':' in `key`.
	colon: Option<usize>,
	in_value: bool,
}

impl PairBuilder {
	fn push(&mut self, c: char, escaped: bool) {
		if self.in_value {
			self.value.push(c);
			return;
		}
		match c {
			'=' if !escaped => self.in_value = true,
			':' if !escaped && self.colon.is_none() => {
				self.colon = Some(self.key.len());
				self.key.push(c);
			}
			_ => self.key.push(c),
		}
	}

	fn finish(&mut self, pairs: &mut Vec<Pair>) -> Result<(), String> {
		let me = std::mem::take(self);
		if !me.in_value {
			if me.key.is_empty() {
				return Ok(());
			}
			return Err(format!("'{}' doesn't contain '='", me.key));
		}
		let (scope, key) = match me.colon {
			Some(pos) => {
				let scope = &me.key[..pos];
				if scope.is_empty() {
					return Err(format!("'{}' has an empty transport name", me.key));
				}
				(Some(scope.to_owned()), me.key[pos + 1..].to_owned())
			}
			None => (None, me.key),
		};
		if key.is_empty() {
			return Err("empty key".to_owned());
		}
		pairs.push(Pair {
			scope,
			key,
			value: me.value,
		});
		Ok(())
	}
}

/// Split `s` into `key=value` pairs separated by `;`.
///
/// A backslash escapes the next character. The first unescaped `:`
/// in a key separates the transport name from the parameter name.
fn parse_pairs(s: &str) -> Result<Vec<Pair>, String> {
	let mut pairs = Vec::new();
	let mut builder = PairBuilder::default();
	let mut chars = s.chars();
	while let Some(c) = chars.next() {
		if c == '\\' {
			let next = chars
				.next()
				.ok_or_else(|| "trailing backslash".to_owned())?;
			builder.push(next, true);
		} else if c == ';' {
			builder.finish(&mut pairs)?;
		} else {
			builder.push(c, false);
		}
	}
	builder.finish(&mut pairs)?;
	Ok(pairs)
}

/// Parse an options string, PT2 `key=value` pairs or a JSON object.
///
/// # Errors
///
/// Returns [`ConfigurationError::InvalidOptions`] if `s` cannot be parsed.
pub fn parse_options(s: &str) -> Result<OptionsTable, ConfigurationError> {
	let invalid = |reason: String| ConfigurationError::InvalidOptions {
		options: s.to_owned(),
		reason,
	};
	let trimmed = s.trim();
	let mut table = if trimmed.starts_with('{') {
		parse_json(trimmed).map_err(invalid)?
	} else {
		let mut table = OptionsTable::empty();
		for pair in parse_pairs(trimmed).map_err(invalid)? {
			match pair.scope {
				Some(scope) => table.add_scoped(&scope, &pair.key, pair.value),
				None => table.add_common(&pair.key, pair.value),
			}
		}
		table
	};
	table.mark_explicit();
	Ok(table)
}

/// Parse `key=value` pairs without transport scoping.
///
/// Used for arguments carried in the SOCKS5 authentication fields.
///
/// # Errors
///
/// Returns a description of the problem if `s` is malformed.
pub fn parse_args(s: &str) -> Result<Args, String> {
	let mut args = Args::new();
	for pair in parse_pairs(s)? {
		let key = match pair.scope {
			Some(scope) => format!("{}:{}", scope, pair.key),
			None => pair.key,
		};
		args.add(key, pair.value);
	}
	Ok(args)
}

fn json_scalar(v: &Value) -> Option<String> {
	match v {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		Value::Bool(b) => Some(b.to_string()),
		_ => None,
	}
}

fn json_values(key: &str, v: &Value) -> Result<Vec<String>, String> {
	if let Value::Array(items) = v {
		items
			.iter()
			.map(|item| json_scalar(item).ok_or_else(|| format!("invalid value of '{}'", key)))
			.collect()
	} else {
		json_scalar(v)
			.map(|s| vec![s])
			.ok_or_else(|| format!("invalid value of '{}'", key))
	}
}

fn parse_json(s: &str) -> Result<OptionsTable, String> {
	let root: Value = serde_json::from_str(s).map_err(|e| e.to_string())?;
	let root = match root {
		Value::Object(map) => map,
		_ => return Err("JSON options must be an object".to_owned()),
	};
	let mut table = OptionsTable::empty();
	for (name, value) in &root {
		if let Value::Object(params) = value {
			for (key, value) in params {
				for v in json_values(key, value)? {
					table.add_scoped(name, key, v);
				}
			}
		} else {
			for v in json_values(name, value)? {
				table.add_common(name, v);
			}
		}
	}
	Ok(table)
}

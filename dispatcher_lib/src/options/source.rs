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

use super::{parse_options, OptionsTable};
use crate::error::ConfigurationError;
use std::path::PathBuf;

/// A place transport options may come from.
pub trait OptionsSource {
	/// Name used in logs.
	fn name(&self) -> &'static str;

	/// Returns the options string, or `None` if this source has nothing.
	///
	/// # Errors
	///
	/// Returns a [`ConfigurationError`] if the source exists but cannot be read.
	fn load(&self) -> Result<Option<String>, ConfigurationError>;
}

/// Options given inline with `-options`.
pub struct InlineSource(pub Option<String>);

impl OptionsSource for InlineSource {
	fn name(&self) -> &'static str {
		"-options"
	}

	fn load(&self) -> Result<Option<String>, ConfigurationError> {
		Ok(self.0.clone().filter(|s| !s.is_empty()))
	}
}

/// Options read from the file given with `-optionsFile`.
pub struct FileSource(pub Option<PathBuf>);

impl OptionsSource for FileSource {
	fn name(&self) -> &'static str {
		"-optionsFile"
	}

	fn load(&self) -> Result<Option<String>, ConfigurationError> {
		let path = match &self.0 {
			Some(path) => path,
			None => return Ok(None),
		};
		std::fs::read_to_string(path)
			.map(Some)
			.map_err(|source| ConfigurationError::OptionsFile {
				path: path.clone(),
				source,
			})
	}
}

/// Options from `TOR_PT_SERVER_TRANSPORT_OPTIONS`.
///
/// Only filled in when no structured flag was given.
pub struct EnvSource(pub Option<String>);

impl OptionsSource for EnvSource {
	fn name(&self) -> &'static str {
		"TOR_PT_SERVER_TRANSPORT_OPTIONS"
	}

	fn load(&self) -> Result<Option<String>, ConfigurationError> {
		Ok(self.0.clone().filter(|s| !s.is_empty()))
	}
}

/// Build the options table from the first source that has something.
///
/// Returns an empty, non-explicit table if no source has anything.
///
/// # Errors
///
/// Returns [`ConfigurationError::ConflictingOptions`] if both `-options` and
/// `-optionsFile` are present, or any error of the chosen source.
pub fn load(
	inline: &InlineSource,
	file: &FileSource,
	env: &EnvSource,
) -> Result<OptionsTable, ConfigurationError> {
	// An empty -options counts as absent.
	if inline.load()?.is_some() && file.0.is_some() {
		return Err(ConfigurationError::ConflictingOptions);
	}
	let sources: [&dyn OptionsSource; 3] = [inline, file, env];
	for source in sources {
		if let Some(s) = source.load()? {
			log::info!("using transport options from {}", source.name());
			return parse_options(&s);
		}
	}
	Ok(OptionsTable::empty())
}

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

use crate::BoxStdErr;
use fern::colors::{Color, ColoredLevelConfig};
use log::{Level, LevelFilter};
use std::path::Path;

// ------------------- Logging -------------------

/// Stdout carries the PT status lines, so logs never go there.
pub enum LogOutput {
	Stderr,
	/// `dispatcher.log` in the state directory.
	StateFile,
}

impl LogOutput {
	pub fn is_colorful(&self) -> bool {
		matches!(self, Self::Stderr)
	}
}

pub struct Log {
	pub level: LevelFilter,
	pub output: LogOutput,
}

impl Log {
	/// Initialize logger.
	///
	/// DO NOT call this function more than once!
	pub fn init_logger(&self, state: &Path) -> Result<(), BoxStdErr> {
		let time_format =
			time::format_description::parse("[year]-[month]-[day]T[hour]:[minute]:[second]Z")?;
		let is_colorful = self.output.is_colorful();
		let colors = ColoredLevelConfig::new()
			.info(Color::Blue)
			.trace(Color::Magenta);
		let levels: &[String; 5] = {
			let strs = [
				Level::Error,
				Level::Warn,
				Level::Info,
				Level::Debug,
				Level::Trace,
			]
			.map(|level| {
				if is_colorful {
					colors.color(level).to_string()
				} else {
					level.to_string()
				}
			});
			// This function should only be called once,
			// so it is ok to leak.
			Box::leak(Box::new(strs))
		};
		let dispatch = fern::Dispatch::new()
			.level(self.level)
			.format(move |out, message, record| {
				let time = time::OffsetDateTime::now_utc()
					.format(&time_format)
					.unwrap_or_default();
				let level = match record.level() {
					Level::Error => levels[0].as_str(),
					Level::Warn => levels[1].as_str(),
					Level::Info => levels[2].as_str(),
					Level::Debug => levels[3].as_str(),
					Level::Trace => levels[4].as_str(),
				};
				let target = record.target();
				out.finish(format_args!("[{} {} {}] {}", time, level, target, message));
			});
		match &self.output {
			LogOutput::Stderr => dispatch.chain(std::io::stderr()),
			LogOutput::StateFile => {
				dispatch.chain(fern::log_file(state.join(crate::args::LOG_FILE_NAME))?)
			}
		}
		.apply()?;
		Ok(())
	}
}

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

use std::fmt;

/// Number of bytes, displayed as `512B`, `1.50KiB`, `2.00MiB` or `3.10GiB`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BytesCount(pub u64);

impl fmt::Display for BytesCount {
	#[allow(clippy::cast_precision_loss)]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];
		if self.0 < 1024 {
			return write!(f, "{}B", self.0);
		}
		let mut value = self.0 as f64 / 1024.0;
		let mut unit = 0;
		while value >= 1024.0 && unit + 1 < UNITS.len() {
			value /= 1024.0;
			unit += 1;
		}
		write!(f, "{:.2}{}", value, UNITS[unit])
	}
}

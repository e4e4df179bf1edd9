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
Status lines for the parent process.

Every line is written to stdout and flushed immediately,
the parent reads them to learn which methods are available.
*/

use parking_lot::Mutex;
use std::{
	fmt::Display,
	io::{self, Write},
	net::SocketAddr,
};

pub trait Reporter: Send + Sync {
	/// Write a single line. `line` never contains a line break.
	fn line(&self, line: &str);

	fn version(&self, version: &str) {
		self.line(&format!("VERSION {}", version));
	}

	fn cmethod(&self, name: &str, method: &str, addr: SocketAddr) {
		self.line(&format!("CMETHOD {} {} {}", name, method, addr));
	}

	fn cmethod_error(&self, name: &str, msg: &dyn Display) {
		self.line(&format!("CMETHOD-ERROR {} {}", name, one_line(msg)));
	}

	fn cmethods_done(&self) {
		self.line("CMETHODS DONE");
	}

	fn smethod(&self, name: &str, addr: SocketAddr) {
		self.line(&format!("SMETHOD {} {}", name, addr));
	}

	fn smethod_error(&self, name: &str, msg: &dyn Display) {
		self.line(&format!("SMETHOD-ERROR {} {}", name, one_line(msg)));
	}

	fn smethods_done(&self) {
		self.line("SMETHODS DONE");
	}

	fn proxy_done(&self) {
		self.line("PROXY DONE");
	}

	fn proxy_error(&self, msg: &dyn Display) {
		self.line(&format!("PROXY-ERROR {}", one_line(msg)));
	}
}

fn one_line(msg: &dyn Display) -> String {
	msg.to_string().replace(|c: char| c == '\r' || c == '\n', " ")
}

/// Writes status lines to the process stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
	fn line(&self, line: &str) {
		let stdout = io::stdout();
		let mut out = stdout.lock();
		if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
			log::error!("cannot write status line '{}' ({})", line, e);
		}
	}
}

/// Keeps status lines in memory.
#[derive(Debug, Default)]
pub struct CaptureReporter {
	lines: Mutex<Vec<String>>,
}

impl CaptureReporter {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns all lines written so far.
	#[must_use]
	pub fn lines(&self) -> Vec<String> {
		self.lines.lock().clone()
	}
}

impl Reporter for CaptureReporter {
	fn line(&self, line: &str) {
		log::debug!("status: {}", line);
		self.lines.lock().push(line.to_owned());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_lines() {
		let r = CaptureReporter::new();
		let addr: SocketAddr = "127.0.0.1:1080".parse().unwrap();
		r.version("2.1");
		r.cmethod("shadow", "socks5", addr);
		r.cmethod_error("obfs4", &"unknown transport\nreally");
		r.cmethods_done();
		r.smethod("plain", addr);
		r.smethod_error("plain", &"address in use");
		r.smethods_done();
		r.proxy_done();
		r.proxy_error(&"bad scheme");
		assert_eq!(
			r.lines(),
			[
				"VERSION 2.1",
				"CMETHOD shadow socks5 127.0.0.1:1080",
				"CMETHOD-ERROR obfs4 unknown transport really",
				"CMETHODS DONE",
				"SMETHOD plain 127.0.0.1:1080",
				"SMETHOD-ERROR plain address in use",
				"SMETHODS DONE",
				"PROXY DONE",
				"PROXY-ERROR bad scheme",
			]
		);
	}
}

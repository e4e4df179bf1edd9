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

use super::config::{Log, LogOutput};
use clap::Parser;
use dispatcher_lib::{
	config::{DEFAULT_PROXY_LISTEN_ADDR, DEFAULT_PT_VERSION},
	Flags,
};
use std::{ffi::OsString, path::PathBuf};

pub const LOG_FILE_NAME: &str = "dispatcher.log";

#[derive(Parser, Debug)]
#[command(name = "shapeshifter-dispatcher", disable_version_flag = true)]
pub struct AppOptions {
	/// Run as a client (default).
	#[arg(long)]
	client: bool,

	/// Run as a server.
	#[arg(long)]
	server: bool,

	/// Intercept traffic transparently instead of speaking SOCKS5/STUN.
	#[arg(long)]
	transparent: bool,

	/// Proxy UDP instead of TCP.
	#[arg(long)]
	udp: bool,

	/// Comma separated transport names, '*' for all.
	#[arg(long, value_name = "NAMES")]
	transports: Option<String>,

	/// Server bind specs, 'name-host:port[,name-host:port...]'.
	#[arg(long, value_name = "SPECS")]
	bindaddr: Option<String>,

	/// Transport options.
	#[arg(long, value_name = "OPTIONS")]
	options: Option<String>,

	/// Read transport options from a file.
	#[arg(long = "optionsFile", value_name = "FILE")]
	options_file: Option<PathBuf>,

	/// Server backend address.
	#[arg(long, value_name = "ADDR")]
	target: Option<String>,

	/// Extended backend address.
	#[arg(long, value_name = "ADDR")]
	extorport: Option<String>,

	/// Authentication cookie of the extended backend.
	#[arg(long, value_name = "FILE")]
	authcookie: Option<PathBuf>,

	/// Upstream proxy URL (http, socks4a or socks5).
	#[arg(long, value_name = "URL")]
	proxy: Option<String>,

	/// Address of the client listener.
	#[arg(
		long = "proxylistenaddr",
		value_name = "ADDR",
		default_value = DEFAULT_PROXY_LISTEN_ADDR
	)]
	proxy_listen_addr: String,

	/// State directory.
	#[arg(long, value_name = "DIR")]
	state: Option<PathBuf>,

	/// Exit when stdin is closed.
	#[arg(long = "exit-on-stdin-close")]
	exit_on_stdin_close: bool,

	/// Pluggable transport protocol version.
	#[arg(long, value_name = "VERSION", default_value = DEFAULT_PT_VERSION)]
	ptversion: String,

	/// Print version and exit.
	#[arg(long = "showVersion")]
	show_version: bool,

	/// Log level, one of ERROR (default), WARN, INFO, DEBUG or TRACE.
	#[arg(long = "logLevel", value_name = "LEVEL", default_value = "ERROR")]
	log_level: log::LevelFilter,

	/// Log to a file in the state directory instead of stderr.
	#[arg(long = "enableLogging")]
	enable_logging: bool,
}

/// Accept single dash long flags by turning `-flag` into `--flag`.
pub fn normalize<I>(args: I) -> Vec<OsString>
where
	I: IntoIterator<Item = OsString>,
{
	let mut args = args.into_iter();
	let mut result: Vec<OsString> = args.next().into_iter().collect();
	for arg in args {
		match arg.to_str() {
			Some(s) if s.len() > 2 && s.starts_with('-') && !s.starts_with("--") => {
				result.push(format!("-{}", s).into());
			}
			_ => result.push(arg),
		}
	}
	result
}

impl AppOptions {
	/// # Errors
	///
	/// Returns a [`clap::Error`] on unknown or malformed flags,
	/// and also when help is requested.
	pub fn new_from_args() -> Result<Self, clap::Error> {
		Self::try_parse_from(normalize(std::env::args_os()))
	}

	pub fn into_action(self) -> Action {
		if self.show_version {
			return Action::CheckVersion;
		}
		let flags = Flags {
			client: self.client,
			server: self.server,
			transparent: self.transparent,
			udp: self.udp,
			transports: self.transports,
			bindaddr: self.bindaddr,
			options: self.options,
			options_file: self.options_file,
			target: self.target,
			extorport: self.extorport,
			authcookie: self.authcookie,
			proxy: self.proxy,
			proxy_listen_addr: self.proxy_listen_addr,
			state: self.state,
			exit_on_stdin_close: self.exit_on_stdin_close,
			ptversion: self.ptversion,
			env_options: None,
		};
		Action::Serve(ServeAction {
			flags,
			log: Log {
				level: self.log_level,
				output: if self.enable_logging {
					LogOutput::StateFile
				} else {
					LogOutput::Stderr
				},
			},
		})
	}
}

pub enum Action {
	CheckVersion,
	Serve(ServeAction),
}

pub struct ServeAction {
	pub flags: Flags,
	pub log: Log,
}

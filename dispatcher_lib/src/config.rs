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
Normalized configuration.

[`Flags`] is what the command line (or the legacy `TOR_PT_*` environment)
says. [`Setup::from_flags`] validates it once into the values every
other component reads: [`ClientConfig`] or [`ServerConfig`],
the [`OptionsTable`], the [`ProxyMode`] and the [`StateDir`].
*/

use crate::{
	error::ConfigurationError,
	mode::{self, ProxyMode},
	options::{self, EnvSource, FileSource, InlineSource, OptionsTable},
	prelude::*,
	proxy_dialer::ProxyDialer,
	transport::REGISTRY,
};
use std::{
	collections::HashMap,
	fmt::{self, Display},
	net::ToSocketAddrs,
	path::{Path, PathBuf},
};
use url::Url;

pub const DEFAULT_PROXY_LISTEN_ADDR: &str = "127.0.0.1:0";
pub const DEFAULT_STATE_DIR: &str = "state";
pub const DEFAULT_PT_VERSION: &str = "2.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Client,
	Server,
}

impl Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Role::Client => "client",
			Role::Server => "server",
		})
	}
}

// -------------------------------------------------------
//                        Flags
// -------------------------------------------------------

/// Raw settings from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flags {
	pub client: bool,
	pub server: bool,
	pub transparent: bool,
	pub udp: bool,
	pub transports: Option<String>,
	pub bindaddr: Option<String>,
	pub options: Option<String>,
	pub options_file: Option<PathBuf>,
	pub target: Option<String>,
	pub extorport: Option<String>,
	pub authcookie: Option<PathBuf>,
	pub proxy: Option<String>,
	pub proxy_listen_addr: String,
	pub state: Option<PathBuf>,
	pub exit_on_stdin_close: bool,
	pub ptversion: String,
	/// `TOR_PT_SERVER_TRANSPORT_OPTIONS`, only set by [`Flags::with_legacy_env`].
	pub env_options: Option<String>,
}

impl Default for Flags {
	fn default() -> Self {
		Self {
			client: false,
			server: false,
			transparent: false,
			udp: false,
			transports: None,
			bindaddr: None,
			options: None,
			options_file: None,
			target: None,
			extorport: None,
			authcookie: None,
			proxy: None,
			proxy_listen_addr: DEFAULT_PROXY_LISTEN_ADDR.into(),
			state: None,
			exit_on_stdin_close: false,
			ptversion: DEFAULT_PT_VERSION.into(),
			env_options: None,
		}
	}
}

impl Flags {
	/// Returns `true` if any flag that selects role, transports or options is set.
	#[must_use]
	pub fn is_structured(&self) -> bool {
		self.client
			|| self.server
			|| self.transports.is_some()
			|| self.bindaddr.is_some()
			|| self.options.is_some()
			|| self.options_file.is_some()
	}

	/// Fill flags from the legacy `TOR_PT_*` environment.
	///
	/// Does nothing if any structured flag is set.
	#[must_use]
	pub fn with_legacy_env(mut self, env: &LegacyEnv) -> Self {
		if self.is_structured() || env.is_empty() {
			return self;
		}
		info!("no structured flags, falling back to TOR_PT_* environment variables");
		if let Some(ver) = env.get("TOR_PT_MANAGED_TRANSPORT_VER") {
			if let Some(first) = ver.split(',').next() {
				self.ptversion = first.to_owned();
			}
		}
		if let Some(names) = env.get("TOR_PT_CLIENT_TRANSPORTS") {
			self.client = true;
			self.transports = Some(names.to_owned());
		} else if let Some(names) = env.get("TOR_PT_SERVER_TRANSPORTS") {
			self.server = true;
			self.transports = Some(names.to_owned());
		}
		let copy = |key: &str| env.get(key).map(ToOwned::to_owned);
		self.bindaddr = self.bindaddr.or_else(|| copy("TOR_PT_SERVER_BINDADDR"));
		self.env_options = copy("TOR_PT_SERVER_TRANSPORT_OPTIONS");
		self.target = self.target.or_else(|| copy("TOR_PT_ORPORT"));
		self.extorport = self.extorport.or_else(|| copy("TOR_PT_EXTENDED_SERVER_PORT"));
		self.authcookie = self
			.authcookie
			.or_else(|| copy("TOR_PT_AUTH_COOKIE_FILE").map(PathBuf::from));
		self.state = self
			.state
			.or_else(|| copy("TOR_PT_STATE_LOCATION").map(PathBuf::from));
		self.proxy = self.proxy.or_else(|| copy("TOR_PT_PROXY"));
		if env.get("TOR_PT_EXIT_ON_STDIN_CLOSE") == Some("1") {
			self.exit_on_stdin_close = true;
		}
		self
	}
}

/// The `TOR_PT_*` variables of a process environment.
#[derive(Debug, Default, Clone)]
pub struct LegacyEnv(HashMap<String, String>);

impl LegacyEnv {
	#[must_use]
	pub fn from_process() -> Self {
		Self::from_pairs(std::env::vars())
	}

	pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		Self(
			pairs
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.filter(|(k, _)| k.starts_with("TOR_PT_"))
				.collect(),
		)
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

// -------------------------------------------------------
//                       StateDir
// -------------------------------------------------------

/// Directory where transports and logs keep their files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir(PathBuf);

impl StateDir {
	/// Create `path` and its parents if missing, with mode `0700`.
	///
	/// # Errors
	///
	/// Returns [`ConfigurationError::StateDir`] if the directory cannot be created.
	pub fn create(path: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
		let path = path.into();
		let mut builder = std::fs::DirBuilder::new();
		builder.recursive(true);
		#[cfg(unix)]
		{
			use std::os::unix::fs::DirBuilderExt;
			builder.mode(0o700);
		}
		builder
			.create(&path)
			.map_err(|source| ConfigurationError::StateDir {
				path: path.clone(),
				source,
			})?;
		Ok(Self(path))
	}

	#[inline]
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.0
	}
}

// -------------------------------------------------------
//                       BindSpec
// -------------------------------------------------------

/// A server transport listening on an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSpec {
	pub name: Tag,
	pub addr: SocketAddr,
	pub options: options::Args,
}

impl BindSpec {
	/// Parse a single `name-host:port` entry.
	///
	/// # Errors
	///
	/// Returns [`ConfigurationError::MissingSeparator`] if there is no `-`,
	/// or [`ConfigurationError::InvalidBindAddr`] if the address cannot be resolved.
	pub fn parse(spec: &str, options: &OptionsTable) -> Result<Self, ConfigurationError> {
		let (name, addr) = spec
			.split_once('-')
			.ok_or_else(|| ConfigurationError::MissingSeparator { spec: spec.into() })?;
		if name.is_empty() {
			return Err(ConfigurationError::InvalidBindAddr {
				spec: spec.into(),
				reason: "empty transport name".into(),
			});
		}
		let addr = resolve_addr(addr).map_err(|reason| ConfigurationError::InvalidBindAddr {
			spec: spec.into(),
			reason,
		})?;
		Ok(Self {
			name: name.into(),
			addr,
			options: options.args_for(name),
		})
	}

	/// Parse a comma separated list of bind specs.
	///
	/// # Errors
	///
	/// Returns the error of the first malformed entry.
	pub fn parse_list(list: &str, options: &OptionsTable) -> Result<Vec<Self>, ConfigurationError> {
		list.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(|s| Self::parse(s, options))
			.collect()
	}
}

/// Resolve `host:port` into a single socket address.
///
/// # Errors
///
/// Returns a description of the problem if `s` cannot be resolved.
pub fn resolve_addr(s: &str) -> Result<SocketAddr, String> {
	if let Ok(addr) = s.parse::<SocketAddr>() {
		return Ok(addr);
	}
	s.to_socket_addrs()
		.map_err(|e| e.to_string())?
		.next()
		.ok_or_else(|| format!("{} does not resolve to any address", s))
}

/// Split a `-transports` list.
///
/// `*` stands for every name in `all`.
fn split_names(list: &str, all: &[&'static str]) -> Vec<Tag> {
	let mut names: Vec<Tag> = Vec::new();
	for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
		if name == "*" {
			names.extend(all.iter().map(|n| Tag::new(n)));
		} else {
			names.push(name.into());
		}
	}
	let mut seen = std::collections::HashSet::new();
	names.retain(|n| seen.insert(n.clone()));
	names
}

// -------------------------------------------------------
//                  Client/Server config
// -------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub protocol_version: String,
	/// Ordered and without duplicates.
	pub transport_names: Vec<Tag>,
	pub proxy_url: Option<Url>,
	pub listen_addr: SocketAddr,
}

impl ClientConfig {
	/// # Errors
	///
	/// Returns a [`ConfigurationError`] if client flags are missing or invalid.
	pub fn from_flags(flags: &Flags) -> Result<Self, ConfigurationError> {
		if flags.target.is_some() {
			return Err(ConfigurationError::InvalidFlag(
				"cannot use -target in client mode".into(),
			));
		}
		let transport_names = flags
			.transports
			.as_deref()
			.map(|list| split_names(list, &REGISTRY.names(Role::Client)))
			.unwrap_or_default();
		if transport_names.is_empty() {
			return Err(ConfigurationError::InvalidFlag(
				"client mode requires -transports".into(),
			));
		}
		let proxy_url = match flags.proxy.as_deref().filter(|s| !s.is_empty()) {
			Some(s) => {
				let url = Url::parse(s).map_err(|e| ConfigurationError::InvalidProxy {
					url: s.into(),
					reason: e.to_string(),
				})?;
				// Reject unsupported proxies before anything starts.
				ProxyDialer::from_url(&url)?;
				Some(url)
			}
			None => None,
		};
		let listen_addr = resolve_addr(&flags.proxy_listen_addr).map_err(|reason| {
			ConfigurationError::InvalidAddress {
				addr: flags.proxy_listen_addr.clone(),
				reason,
			}
		})?;
		Ok(Self {
			protocol_version: flags.ptversion.clone(),
			transport_names,
			proxy_url,
			listen_addr,
		})
	}
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub bind_specs: Vec<BindSpec>,
	pub backend_addr: SocketAddr,
	/// If present, connections are announced through the extended ORPort protocol.
	pub ext_backend_addr: Option<SocketAddr>,
	pub auth_cookie_path: Option<PathBuf>,
}

impl ServerConfig {
	/// # Errors
	///
	/// Returns a [`ConfigurationError`] if server flags are missing or invalid.
	pub fn from_flags(flags: &Flags, options: &OptionsTable) -> Result<Self, ConfigurationError> {
		let bindaddr = flags
			.bindaddr
			.as_deref()
			.filter(|s| !s.is_empty())
			.ok_or_else(|| ConfigurationError::InvalidFlag("server mode requires -bindaddr".into()))?;
		let mut bind_specs = BindSpec::parse_list(bindaddr, options)?;
		if let Some(list) = flags.transports.as_deref() {
			let enabled = split_names(list, &REGISTRY.names(Role::Server));
			bind_specs.retain(|spec| enabled.contains(&spec.name));
		}
		if bind_specs.is_empty() {
			error!("no valid bindaddrs");
		}

		let parse_addr = |flag: &str, s: &str| {
			resolve_addr(s).map_err(|reason| ConfigurationError::InvalidAddress {
				addr: format!("{} {}", flag, s),
				reason,
			})
		};
		let target = flags
			.target
			.as_deref()
			.filter(|s| !s.is_empty())
			.ok_or_else(|| ConfigurationError::InvalidFlag("server mode requires -target".into()))?;
		let backend_addr = parse_addr("-target", target)?;
		let ext_backend_addr = match flags.extorport.as_deref().filter(|s| !s.is_empty()) {
			Some(s) => Some(parse_addr("-extorport", s)?),
			None => None,
		};
		if ext_backend_addr.is_some() && flags.authcookie.is_none() {
			return Err(ConfigurationError::InvalidFlag(
				"-extorport requires -authcookie".into(),
			));
		}
		Ok(Self {
			bind_specs,
			backend_addr,
			ext_backend_addr,
			auth_cookie_path: flags.authcookie.clone(),
		})
	}
}

// -------------------------------------------------------
//                        Setup
// -------------------------------------------------------

#[derive(Debug, Clone)]
pub enum RoleConfig {
	Client(ClientConfig),
	Server(ServerConfig),
}

/// Everything validated before any listener is started.
#[derive(Debug, Clone)]
pub struct Setup {
	pub mode: ProxyMode,
	pub role: RoleConfig,
	pub options: OptionsTable,
	pub state_dir: StateDir,
	pub exit_on_stdin_close: bool,
}

impl Setup {
	/// Validate `flags`, then create the state directory.
	///
	/// # Errors
	///
	/// Returns a [`ConfigurationError`] on any invalid or conflicting flag.
	pub fn from_flags(flags: &Flags) -> Result<Self, ConfigurationError> {
		if flags.client && flags.server {
			return Err(ConfigurationError::InvalidFlag(
				"cannot use -client and -server at the same time".into(),
			));
		}
		let role = if flags.server {
			Role::Server
		} else {
			Role::Client
		};
		let options = options::load(
			&InlineSource(flags.options.clone()),
			&FileSource(flags.options_file.clone()),
			&EnvSource(flags.env_options.clone()),
		)?;
		let mode = mode::select(flags.transparent, flags.udp);
		let role = match role {
			Role::Client => RoleConfig::Client(ClientConfig::from_flags(flags)?),
			Role::Server => RoleConfig::Server(ServerConfig::from_flags(flags, &options)?),
		};
		if let RoleConfig::Server(ServerConfig {
			ext_backend_addr: Some(_),
			..
		}) = &role
		{
			if mode.is_udp() {
				return Err(ConfigurationError::InvalidFlag(
					"-extorport cannot be used with -udp".into(),
				));
			}
		}
		// Only touch the filesystem once every flag is known to be valid.
		let state_dir = StateDir::create(
			flags
				.state
				.clone()
				.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
		)?;
		Ok(Self {
			mode,
			role,
			options,
			state_dir,
			exit_on_stdin_close: flags.exit_on_stdin_close,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn temp_state(name: &str) -> PathBuf {
		std::env::temp_dir().join(format!("dispatcher-state-{}-{}", std::process::id(), name))
	}

	#[test]
	fn test_bind_spec_parse() {
		let options = options::parse_options("password=p;cipherName=aes-256").unwrap();
		let spec = BindSpec::parse("shadow-127.0.0.1:2222", &options).unwrap();
		assert_eq!(spec.name, "shadow");
		assert_eq!(spec.addr, "127.0.0.1:2222".parse().unwrap());
		assert_eq!(spec.options.get("password"), Some("p"));

		// Only the first '-' separates the name.
		let spec = BindSpec::parse("plain-[::1]:80", &options).unwrap();
		assert_eq!(spec.name, "plain");
		assert_eq!(spec.addr, "[::1]:80".parse().unwrap());
	}

	#[test]
	fn test_bind_spec_missing_separator() {
		let options = OptionsTable::empty();
		let err = BindSpec::parse_list("plain-127.0.0.1:1,shadow127.0.0.1:2", &options).unwrap_err();
		match err {
			ConfigurationError::MissingSeparator { spec } => assert_eq!(spec, "shadow127.0.0.1:2"),
			e => panic!("unexpected error {}", e),
		}
		assert!(err_is_invalid(BindSpec::parse("plain-127.0.0.1", &options)));
		assert!(err_is_invalid(BindSpec::parse("-127.0.0.1:1", &options)));
	}

	fn err_is_invalid(res: Result<BindSpec, ConfigurationError>) -> bool {
		matches!(res, Err(ConfigurationError::InvalidBindAddr { .. }))
	}

	#[test]
	fn test_split_names() {
		assert_eq!(split_names("a,b,a, ,c", &[]), ["a", "b", "c"]);
		assert_eq!(split_names("*,plain", &["plain", "shadow"]), ["plain", "shadow"]);
	}

	#[test]
	fn test_legacy_env() {
		let env = LegacyEnv::from_pairs(vec![
			("TOR_PT_MANAGED_TRANSPORT_VER", "1,2"),
			("TOR_PT_SERVER_TRANSPORTS", "shadow"),
			("TOR_PT_SERVER_BINDADDR", "shadow-127.0.0.1:2222"),
			("TOR_PT_SERVER_TRANSPORT_OPTIONS", "shadow:password=p"),
			("TOR_PT_ORPORT", "127.0.0.1:3333"),
			("TOR_PT_EXIT_ON_STDIN_CLOSE", "1"),
			("HOME", "/root"),
		]);
		assert!(env.get("HOME").is_none());
		let flags = Flags::default().with_legacy_env(&env);
		assert!(flags.server);
		assert_eq!(flags.ptversion, "1");
		assert_eq!(flags.transports.as_deref(), Some("shadow"));
		assert_eq!(flags.bindaddr.as_deref(), Some("shadow-127.0.0.1:2222"));
		assert_eq!(flags.env_options.as_deref(), Some("shadow:password=p"));
		assert_eq!(flags.target.as_deref(), Some("127.0.0.1:3333"));
		assert!(flags.exit_on_stdin_close);

		// Ignored when a structured flag is present.
		let flags = Flags {
			client: true,
			..Flags::default()
		}
		.with_legacy_env(&env);
		assert!(!flags.server);
		assert!(flags.bindaddr.is_none());
	}

	#[test]
	fn test_setup_conflicting_options() {
		let flags = Flags {
			server: true,
			options: Some("password=p".into()),
			options_file: Some("options.txt".into()),
			bindaddr: Some("plain-127.0.0.1:0".into()),
			target: Some("127.0.0.1:3333".into()),
			state: Some(temp_state("conflict")),
			..Flags::default()
		};
		let err = Setup::from_flags(&flags).unwrap_err();
		assert!(matches!(err, ConfigurationError::ConflictingOptions));
	}

	#[test]
	fn test_setup_invalid_flags_leave_no_state_dir() {
		let state = temp_state("never-created");
		let _ = std::fs::remove_dir_all(&state);
		let flags = Flags {
			client: true,
			server: true,
			state: Some(state.clone()),
			..Flags::default()
		};
		assert!(Setup::from_flags(&flags).is_err());
		let flags = Flags {
			client: true,
			target: Some("127.0.0.1:1".into()),
			transports: Some("plain".into()),
			state: Some(state.clone()),
			..Flags::default()
		};
		assert!(Setup::from_flags(&flags).is_err());
		assert!(!state.exists());
	}

	#[test]
	fn test_setup_client() {
		let flags = Flags {
			transports: Some("plain,shadow".into()),
			proxy_listen_addr: "127.0.0.1:1080".into(),
			state: Some(temp_state("client")),
			..Flags::default()
		};
		let setup = Setup::from_flags(&flags).unwrap();
		assert_eq!(setup.mode, ProxyMode::SocksAware);
		assert!(setup.state_dir.path().is_dir());
		match setup.role {
			RoleConfig::Client(c) => {
				assert_eq!(c.transport_names, ["plain", "shadow"]);
				assert_eq!(c.listen_addr, "127.0.0.1:1080".parse().unwrap());
				assert!(c.proxy_url.is_none());
			}
			RoleConfig::Server(_) => panic!("should be client"),
		}

		let flags = Flags {
			target: Some("127.0.0.1:1".into()),
			..flags
		};
		assert!(matches!(
			Setup::from_flags(&flags),
			Err(ConfigurationError::InvalidFlag(_))
		));
	}

	#[test]
	fn test_setup_server() {
		let flags = Flags {
			server: true,
			udp: true,
			transparent: true,
			transports: Some("shadow".into()),
			bindaddr: Some("shadow-127.0.0.1:2222,plain-127.0.0.1:2223".into()),
			options: Some("password=p;cipherName=aes-256".into()),
			target: Some("127.0.0.1:3333".into()),
			state: Some(temp_state("server")),
			..Flags::default()
		};
		let setup = Setup::from_flags(&flags).unwrap();
		assert_eq!(setup.mode, ProxyMode::TransparentUdp);
		match setup.role {
			RoleConfig::Server(s) => {
				assert_eq!(s.bind_specs.len(), 1);
				assert_eq!(s.bind_specs[0].name, "shadow");
				assert_eq!(s.backend_addr, "127.0.0.1:3333".parse().unwrap());
				assert!(s.ext_backend_addr.is_none());
			}
			RoleConfig::Client(_) => panic!("should be server"),
		}

		let flags = Flags {
			extorport: Some("127.0.0.1:4444".into()),
			..flags
		};
		assert!(matches!(
			Setup::from_flags(&flags),
			Err(ConfigurationError::InvalidFlag(_))
		));
	}

	#[test]
	fn test_setup_extended_backend_needs_stream_mode() {
		let flags = Flags {
			server: true,
			bindaddr: Some("plain-127.0.0.1:2223".into()),
			target: Some("127.0.0.1:3333".into()),
			extorport: Some("127.0.0.1:4444".into()),
			authcookie: Some("cookie".into()),
			state: Some(temp_state("ext-udp")),
			..Flags::default()
		};
		let setup = Setup::from_flags(&flags).unwrap();
		match setup.role {
			RoleConfig::Server(s) => {
				assert_eq!(s.ext_backend_addr, Some("127.0.0.1:4444".parse().unwrap()));
			}
			RoleConfig::Client(_) => panic!("should be server"),
		}

		for transparent in [false, true] {
			let flags = Flags {
				udp: true,
				transparent,
				..flags.clone()
			};
			match Setup::from_flags(&flags) {
				Err(ConfigurationError::InvalidFlag(msg)) => assert!(msg.contains("-extorport")),
				res => panic!("unexpected result {:?}", res.map(|s| s.mode)),
			}
		}
	}
}

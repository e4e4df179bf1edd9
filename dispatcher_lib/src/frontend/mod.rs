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
Front-ends that accept local traffic and hand it to transports.

[`Dispatcher::client_setup`] opens one local listener per client transport,
[`Dispatcher::server_setup`] one transport listener per bind spec.
How each accepted connection is handled depends on the [`ProxyMode`].
*/

pub mod accept;
pub mod stun;

mod server;
mod socks;
mod transparent_tcp;
mod udp;

pub use udp::{read_frame, write_frame};

use crate::{
	backend::Bridge,
	config::{BindSpec, ClientConfig, Role, ServerConfig, StateDir},
	error::{ConfigurationError, Error, HandshakeError, ListenerBindError},
	mode::ProxyMode,
	options::{parse_args, OptionsTable},
	prelude::*,
	protocol::BytesStream,
	proxy_dialer::ProxyDialer,
	status::Reporter,
	transport::{ClientCapability, REGISTRY},
	utils::{
		relay::{Counter, Relay},
		BytesCount,
	},
};
use std::{io, time::Instant};
use tokio::{
	net::{TcpListener, UdpSocket},
	task::JoinHandle,
};

/// Listeners started by a setup.
#[derive(Debug, Default)]
pub struct Launch {
	/// `true` if at least one listener is running.
	pub launched: bool,
	pub listeners: Vec<SocketAddr>,
	pub handles: Vec<JoinHandle<()>>,
}

impl Launch {
	fn push(&mut self, addr: SocketAddr, handle: JoinHandle<()>) {
		self.launched = true;
		self.listeners.push(addr);
		self.handles.push(handle);
	}
}

pub struct Dispatcher {
	mode: ProxyMode,
	options: Arc<OptionsTable>,
	reporter: Arc<dyn Reporter>,
}

impl Dispatcher {
	#[must_use]
	pub fn new(mode: ProxyMode, options: OptionsTable, reporter: Arc<dyn Reporter>) -> Self {
		Self {
			mode,
			options: Arc::new(options),
			reporter,
		}
	}

	#[inline]
	#[must_use]
	pub fn mode(&self) -> ProxyMode {
		self.mode
	}

	/// Start a local listener for every client transport.
	///
	/// A transport that cannot be resolved or bound is reported and skipped.
	///
	/// # Errors
	///
	/// Returns a [`ConfigurationError`] if the upstream proxy is not supported.
	pub async fn client_setup(&self, conf: &ClientConfig) -> Result<Launch, ConfigurationError> {
		let proxy = match &conf.proxy_url {
			Some(url) => match ProxyDialer::from_url(url) {
				Ok(proxy) => {
					info!("using upstream proxy {}", proxy.addr());
					self.reporter.proxy_done();
					Some(Arc::new(proxy))
				}
				Err(e) => {
					self.reporter.proxy_error(&e);
					return Err(e);
				}
			},
			None => None,
		};

		let mut launch = Launch::default();
		for name in &conf.transport_names {
			match self
				.launch_client(name, conf.listen_addr, proxy.clone())
				.await
			{
				Ok((addr, handle)) => {
					self.reporter.cmethod(name, self.mode.method_name(), addr);
					info!("registered listener for '{}' ({}) on {}", name, self.mode, addr);
					launch.push(addr, handle);
				}
				Err(e) => {
					error!("cannot launch client transport '{}' ({})", name, e);
					self.reporter.cmethod_error(name, &e);
				}
			}
		}
		self.reporter.cmethods_done();
		Ok(launch)
	}

	async fn launch_client(
		&self,
		name: &Tag,
		addr: SocketAddr,
		proxy: Option<Arc<ProxyDialer>>,
	) -> Result<(SocketAddr, JoinHandle<()>), Error> {
		let endpoint = Arc::new(ClientEndpoint::new(name, self.mode, &self.options, proxy)?);
		let bind_err = |source: io::Error| ListenerBindError {
			transport: name.clone(),
			addr,
			source,
		};

		if self.mode.is_udp() {
			let socket = UdpSocket::bind(addr).await.map_err(bind_err)?;
			let local = socket.local_addr().map_err(bind_err)?;
			let handle = tokio::spawn(udp::serve_client(socket, endpoint, self.mode));
			return Ok((local, handle));
		}

		let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
		let local = listener.local_addr().map_err(bind_err)?;
		let mode = self.mode;
		let handle = tokio::spawn(accept::serve(
			listener,
			name.clone(),
			move |stream, peer, conn_id| {
				let endpoint = endpoint.clone();
				async move {
					if mode == ProxyMode::TransparentTcp {
						transparent_tcp::handle(conn_id, stream, peer, local, &endpoint).await
					} else {
						socks::handle(conn_id, stream, peer, &endpoint).await
					}
				}
			},
		));
		Ok((local, handle))
	}

	/// Start a transport listener for every bind spec.
	///
	/// A bind spec that cannot be resolved or bound is reported and skipped.
	///
	/// # Errors
	///
	/// Returns an error if the backend settings are unusable.
	pub async fn server_setup(
		&self,
		conf: &ServerConfig,
		state: &StateDir,
	) -> Result<Launch, Error> {
		let bridge = Arc::new(Bridge::from_config(conf)?);
		if self.mode.is_udp() && bridge.is_extended() {
			// Datagrams go straight to the backend, the extended port would be skipped.
			let e = ConfigurationError::InvalidFlag(format!(
				"-extorport cannot be used with the {} front-end",
				self.mode
			));
			error!("{}", e);
			for spec in &conf.bind_specs {
				self.reporter.smethod_error(&spec.name, &e);
			}
			self.reporter.smethods_done();
			return Err(e.into());
		}
		debug!(
			"server state directory is '{}', backend {} (extended: {})",
			state.path().display(),
			bridge.backend_addr(),
			bridge.is_extended()
		);

		let mut launch = Launch::default();
		for spec in &conf.bind_specs {
			match self.launch_server(spec, &bridge).await {
				Ok((addr, handle)) => {
					self.reporter.smethod(&spec.name, addr);
					info!("registered listener for '{}' ({}) on {}", spec.name, self.mode, addr);
					launch.push(addr, handle);
				}
				Err(e) => {
					error!("cannot launch server transport '{}' ({})", spec.name, e);
					self.reporter.smethod_error(&spec.name, &e);
				}
			}
		}
		self.reporter.smethods_done();
		Ok(launch)
	}

	async fn launch_server(
		&self,
		spec: &BindSpec,
		bridge: &Arc<Bridge>,
	) -> Result<(SocketAddr, JoinHandle<()>), Error> {
		let options = OptionsTable::with_args(&spec.name, spec.options.clone());
		let cap = REGISTRY.resolve_server(&spec.name, &options)?;
		let bind_err = |source: io::Error| ListenerBindError {
			transport: spec.name.clone(),
			addr: spec.addr,
			source,
		};
		let listener = cap.listen(spec.addr).await.map_err(bind_err)?;
		let local = listener.local_addr().map_err(bind_err)?;
		let handle = tokio::spawn(server::serve(
			listener,
			spec.name.clone(),
			self.mode,
			bridge.clone(),
		));
		Ok((local, handle))
	}
}

// -------------------------------------------------------
//                    ClientEndpoint
// -------------------------------------------------------

/// Dial side of a client listener.
struct ClientEndpoint {
	name: Tag,
	/// Capability resolved at setup.
	///
	/// `None` only in SOCKS mode without user options,
	/// where arguments arrive with each connection.
	resolved: Option<ClientCapability>,
	proxy: Option<Arc<ProxyDialer>>,
	/// The `address` option.
	target: Option<SocksAddr>,
}

impl ClientEndpoint {
	fn new(
		name: &Tag,
		mode: ProxyMode,
		options: &OptionsTable,
		proxy: Option<Arc<ProxyDialer>>,
	) -> Result<Self, ConfigurationError> {
		if !REGISTRY.contains(Role::Client, name) {
			return Err(ConfigurationError::UnknownTransport {
				transport: name.clone(),
			});
		}
		let resolved = if options.is_explicit() || mode != ProxyMode::SocksAware {
			Some(REGISTRY.resolve_client(name, options, proxy.clone())?)
		} else {
			None
		};
		let target = match options.args_for(name).get("address") {
			Some(s) => Some(s.parse::<SocksAddr>().map_err(|e| {
				ConfigurationError::InvalidParameter {
					transport: name.clone(),
					param: "address",
					reason: e.to_string(),
				}
			})?),
			None => None,
		};
		Ok(Self {
			name: name.clone(),
			resolved,
			proxy,
			target,
		})
	}

	/// Capability for one connection, `args` are the raw SOCKS arguments.
	fn capability(&self, args: Option<&str>) -> Result<ClientCapability, Error> {
		if let Some(cap) = &self.resolved {
			return Ok(cap.clone());
		}
		let args = parse_args(args.unwrap_or_default()).map_err(HandshakeError::Args)?;
		let options = OptionsTable::with_args(&self.name, args);
		Ok(REGISTRY.resolve_client(&self.name, &options, self.proxy.clone())?)
	}
}

/// Relay between `local` and `remote`, then log the traffic.
async fn relay_logged(id: &str, local: BytesStream, remote: BytesStream) -> Result<(), Error> {
	let start_time = Instant::now();
	let recv = Counter::new(0);
	let send = Counter::new(0);
	info!("[{}] relaying...", id);
	let relay_result = Relay::new(id)
		.set_recv(recv.clone())
		.set_send(send.clone())
		.relay(local, remote)
		.await;

	let msg = format!(
		"[{}] relay finished with {} received, {} sent and lasted {} secs",
		id,
		BytesCount(recv.get()),
		BytesCount(send.get()),
		start_time.elapsed().as_secs()
	);
	if let Err(e) = relay_result {
		info!("{}, but an error occurred during relay: {}.", msg, e);
		return Err(e.into());
	}
	info!("{}.", msg);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{options::parse_options, status::CaptureReporter, test_utils::init_log};

	fn dispatcher(mode: ProxyMode, options: OptionsTable) -> (Dispatcher, Arc<CaptureReporter>) {
		let reporter = Arc::new(CaptureReporter::new());
		(Dispatcher::new(mode, options, reporter.clone()), reporter)
	}

	fn client_config(names: &[&str]) -> ClientConfig {
		ClientConfig {
			protocol_version: "2.1".into(),
			transport_names: names.iter().map(|n| Tag::new(n)).collect(),
			proxy_url: None,
			listen_addr: "127.0.0.1:0".parse().unwrap(),
		}
	}

	#[test]
	fn test_endpoint_per_connection_args() {
		let ep = ClientEndpoint::new(
			&"shadow".into(),
			ProxyMode::SocksAware,
			&OptionsTable::empty(),
			None,
		)
		.unwrap();
		assert!(ep.resolved.is_none());
		assert!(ep.capability(Some("password=p;cipherName=aes-256")).is_ok());
		assert!(matches!(
			ep.capability(None),
			Err(Error::Configuration(ConfigurationError::MissingParameter { .. }))
		));
		assert!(matches!(
			ep.capability(Some("password")),
			Err(Error::Handshake(HandshakeError::Args(_)))
		));
	}

	#[test]
	fn test_endpoint_explicit_options() {
		let options =
			parse_options("shadow:password=p;shadow:cipherName=aes-128;address=example.com:80")
				.unwrap();
		let ep =
			ClientEndpoint::new(&"shadow".into(), ProxyMode::SocksAware, &options, None).unwrap();
		assert!(ep.resolved.is_some());
		assert_eq!(ep.target, Some("example.com:80".parse().unwrap()));
		// Explicit options win over SOCKS arguments.
		assert!(ep.capability(Some("garbage")).is_ok());

		let options = parse_options("address=nope").unwrap();
		assert!(matches!(
			ClientEndpoint::new(&"plain".into(), ProxyMode::TransparentTcp, &options, None),
			Err(ConfigurationError::InvalidParameter {
				param: "address",
				..
			})
		));
		assert!(matches!(
			ClientEndpoint::new(&"obfs4".into(), ProxyMode::SocksAware, &options, None),
			Err(ConfigurationError::UnknownTransport { .. })
		));
	}

	#[test]
	fn test_client_setup_reports() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let (d, reporter) = dispatcher(ProxyMode::SocksAware, OptionsTable::empty());
			let launch = d
				.client_setup(&client_config(&["plain", "obfs4", "shadow"]))
				.await
				.unwrap();
			assert!(launch.launched);
			assert_eq!(launch.listeners.len(), 2);
			let lines = reporter.lines();
			assert_eq!(lines.len(), 4);
			assert_eq!(lines[0], format!("CMETHOD plain socks5 {}", launch.listeners[0]));
			assert!(lines[1].starts_with("CMETHOD-ERROR obfs4 "));
			assert_eq!(lines[2], format!("CMETHOD shadow socks5 {}", launch.listeners[1]));
			assert_eq!(lines[3], "CMETHODS DONE");
			for h in launch.handles {
				h.abort();
			}
		});
	}

	#[test]
	fn test_client_setup_nothing_launched() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			// shadow cannot be resolved for a transparent front-end without options
			let (d, reporter) = dispatcher(ProxyMode::TransparentUdp, OptionsTable::empty());
			let launch = d.client_setup(&client_config(&["shadow"])).await.unwrap();
			assert!(!launch.launched);
			assert!(launch.handles.is_empty());
			let lines = reporter.lines();
			assert!(lines[0].starts_with("CMETHOD-ERROR shadow "));
			assert_eq!(lines[1], "CMETHODS DONE");
		});
	}

	#[test]
	fn test_server_setup_rejects_extended_udp() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let conf = ServerConfig {
				bind_specs: vec![BindSpec {
					name: "plain".into(),
					addr: "127.0.0.1:0".parse().unwrap(),
					options: crate::options::Args::new(),
				}],
				backend_addr: "127.0.0.1:3333".parse().unwrap(),
				ext_backend_addr: Some("127.0.0.1:4444".parse().unwrap()),
				auth_cookie_path: Some("cookie".into()),
			};
			let state = StateDir::create(std::env::temp_dir().join(format!(
				"dispatcher-ext-udp-{}",
				std::process::id()
			)))
			.unwrap();
			for mode in [ProxyMode::TransparentUdp, ProxyMode::StunAware] {
				let (d, reporter) = dispatcher(mode, OptionsTable::empty());
				assert!(matches!(
					d.server_setup(&conf, &state).await,
					Err(Error::Configuration(ConfigurationError::InvalidFlag(_)))
				));
				let lines = reporter.lines();
				assert!(lines[0].starts_with("SMETHOD-ERROR plain "));
				assert_eq!(lines[1], "SMETHODS DONE");
			}

			// The stream front-ends announce through the extended port.
			let (d, reporter) = dispatcher(ProxyMode::SocksAware, OptionsTable::empty());
			let launch = d.server_setup(&conf, &state).await.unwrap();
			assert!(launch.launched);
			assert!(reporter.lines()[0].starts_with("SMETHOD plain "));
			for h in launch.handles {
				h.abort();
			}
		});
	}

	#[test]
	fn test_client_setup_proxy() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let (d, reporter) = dispatcher(ProxyMode::TransparentTcp, OptionsTable::empty());
			let mut conf = client_config(&["plain"]);
			conf.proxy_url = Some("socks5://127.0.0.1:1080".parse().unwrap());
			let launch = d.client_setup(&conf).await.unwrap();
			let lines = reporter.lines();
			assert_eq!(lines[0], "PROXY DONE");
			assert_eq!(
				lines[1],
				format!("CMETHOD plain transparent-tcp {}", launch.listeners[0])
			);
			for h in launch.handles {
				h.abort();
			}

			let (d, reporter) = dispatcher(ProxyMode::SocksAware, OptionsTable::empty());
			conf.proxy_url = Some("ftp://127.0.0.1:21".parse().unwrap());
			assert!(d.client_setup(&conf).await.is_err());
			assert!(reporter.lines()[0].starts_with("PROXY-ERROR "));
		});
	}
}

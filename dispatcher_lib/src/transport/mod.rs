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
Transport registry.

A transport is looked up by name in the [`REGISTRY`] for a role,
its options are validated, and the result is a capability bound to
that name: [`ClientCapability`] dials, [`ServerCapability`] listens.
The set of transports is closed and built once.
*/

pub mod plain;
pub mod shadow;

pub use shadow::{Cipher, ShadowSettings};

use crate::{
	config::Role,
	error::{ConfigurationError, DialError},
	options::{Args, OptionsTable},
	prelude::*,
	protocol::BytesStream,
	proxy_dialer::ProxyDialer,
};
use lazy_static::lazy_static;
use std::{collections::HashMap, io};
use tokio::net::TcpListener;

lazy_static! {
	pub static ref REGISTRY: Registry = Registry::new();
}

/// A transport with validated options.
#[derive(Debug, Clone)]
pub enum Transport {
	Plain,
	Shadow(Arc<ShadowSettings>),
}

impl Transport {
	fn wrap(&self, stream: BytesStream) -> BytesStream {
		match self {
			Transport::Plain => stream,
			Transport::Shadow(s) => s.wrap(stream),
		}
	}
}

pub struct Descriptor {
	pub name: &'static str,
	pub required: &'static [&'static str],
	pub build: fn(&Args) -> Result<Transport, ConfigurationError>,
}

pub struct Registry {
	client: HashMap<&'static str, Descriptor>,
	server: HashMap<&'static str, Descriptor>,
}

impl Registry {
	fn new() -> Self {
		let mut client = HashMap::new();
		let mut server = HashMap::new();
		for make in [plain::descriptor, shadow::descriptor] {
			let d = make();
			client.insert(d.name, d);
			let d = make();
			server.insert(d.name, d);
		}
		Self { client, server }
	}

	fn table(&self, role: Role) -> &HashMap<&'static str, Descriptor> {
		match role {
			Role::Client => &self.client,
			Role::Server => &self.server,
		}
	}

	/// Sorted names of every transport for `role`.
	#[must_use]
	pub fn names(&self, role: Role) -> Vec<&'static str> {
		let mut names: Vec<_> = self.table(role).keys().copied().collect();
		names.sort_unstable();
		names
	}

	#[must_use]
	pub fn contains(&self, role: Role, name: &str) -> bool {
		self.table(role).contains_key(name)
	}

	fn build(
		&self,
		role: Role,
		name: &str,
		options: &OptionsTable,
	) -> Result<Transport, ConfigurationError> {
		let desc = self
			.table(role)
			.get(name)
			.ok_or_else(|| ConfigurationError::UnknownTransport {
				transport: name.into(),
			})?;
		let args = options.args_for(name);
		if let Some(missing) = desc.required.iter().copied().find(|key| args.get(key).is_none()) {
			return Err(ConfigurationError::MissingParameter {
				transport: name.into(),
				missing,
			});
		}
		(desc.build)(&args)
	}

	/// # Errors
	///
	/// Returns a [`ConfigurationError`] if `name` is unknown or its options are invalid.
	pub fn resolve_client(
		&self,
		name: &str,
		options: &OptionsTable,
		proxy: Option<Arc<ProxyDialer>>,
	) -> Result<ClientCapability, ConfigurationError> {
		let transport = self.build(Role::Client, name, options)?;
		Ok(ClientCapability {
			name: name.into(),
			transport,
			proxy,
		})
	}

	/// # Errors
	///
	/// Returns a [`ConfigurationError`] if `name` is unknown or its options are invalid.
	pub fn resolve_server(
		&self,
		name: &str,
		options: &OptionsTable,
	) -> Result<ServerCapability, ConfigurationError> {
		let transport = self.build(Role::Server, name, options)?;
		Ok(ServerCapability {
			name: name.into(),
			transport,
		})
	}
}

// -------------------------------------------------------
//                     Capabilities
// -------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClientCapability {
	name: Tag,
	transport: Transport,
	proxy: Option<Arc<ProxyDialer>>,
}

impl ClientCapability {
	#[inline]
	#[must_use]
	pub fn name(&self) -> &Tag {
		&self.name
	}

	/// Connect to `target`, through the upstream proxy if there is one,
	/// and wrap the connection with the transport.
	///
	/// # Errors
	///
	/// Returns a [`DialError`] if the connection cannot be made.
	pub async fn dial(&self, target: &SocksAddr) -> Result<BytesStream, DialError> {
		let stream = match &self.proxy {
			Some(proxy) => proxy.connect(target).await?,
			None => plain::connect_tcp(target).await?,
		};
		debug!("'{}' connected to {}", self.name, target);
		Ok(self.transport.wrap(stream.into()))
	}
}

#[derive(Debug, Clone)]
pub struct ServerCapability {
	name: Tag,
	transport: Transport,
}

impl ServerCapability {
	#[inline]
	#[must_use]
	pub fn name(&self) -> &Tag {
		&self.name
	}

	/// # Errors
	///
	/// Returns an error if `addr` cannot be bound.
	pub async fn listen(&self, addr: SocketAddr) -> io::Result<TransportListener> {
		let inner = TcpListener::bind(addr).await?;
		Ok(TransportListener {
			inner,
			transport: self.transport.clone(),
		})
	}
}

/// Listener that returns undisguised streams.
pub struct TransportListener {
	inner: TcpListener,
	transport: Transport,
}

impl TransportListener {
	/// # Errors
	///
	/// Returns an error if accepting failed.
	pub async fn accept(&self) -> io::Result<(BytesStream, SocketAddr)> {
		let (stream, peer) = self.inner.accept().await?;
		if let Err(e) = stream.set_nodelay(true) {
			debug!("cannot set TCP_NODELAY for {} ({})", peer, e);
		}
		Ok((self.transport.wrap(stream.into()), peer))
	}

	/// # Errors
	///
	/// Returns an error if the local address cannot be read.
	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.inner.local_addr()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::options::parse_options;

	#[test]
	fn test_names() {
		assert_eq!(REGISTRY.names(Role::Client), ["plain", "shadow"]);
		assert_eq!(REGISTRY.names(Role::Server), ["plain", "shadow"]);
		assert!(REGISTRY.contains(Role::Client, "shadow"));
		assert!(!REGISTRY.contains(Role::Server, "obfs4"));
	}

	#[test]
	fn test_resolve_errors() {
		let options = OptionsTable::empty();
		assert!(matches!(
			REGISTRY.resolve_client("obfs4", &options, None),
			Err(ConfigurationError::UnknownTransport { .. })
		));
		match REGISTRY.resolve_server("shadow", &options) {
			Err(ConfigurationError::MissingParameter { transport, missing }) => {
				assert_eq!(transport, "shadow");
				assert_eq!(missing, "password");
			}
			_ => panic!("shadow without options should be rejected"),
		}
		let options = parse_options("shadow:password=p;shadow:cipherName=blowfish").unwrap();
		assert!(matches!(
			REGISTRY.resolve_server("shadow", &options),
			Err(ConfigurationError::InvalidParameter {
				param: "cipherName",
				..
			})
		));
	}

	#[test]
	fn test_resolve_ok() {
		let options = parse_options("shadow:password=p;shadow:cipherName=aes-128").unwrap();
		let cap = REGISTRY.resolve_client("shadow", &options, None).unwrap();
		assert_eq!(cap.name(), "shadow");
		assert!(matches!(cap.transport, Transport::Shadow(_)));
		let cap = REGISTRY.resolve_server("plain", &OptionsTable::empty()).unwrap();
		assert!(matches!(cap.transport, Transport::Plain));
	}

	#[test]
	fn test_dial_and_accept() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let options = parse_options("password=p;cipherName=chacha20").unwrap();
			let server = REGISTRY.resolve_server("shadow", &options).unwrap();
			let listener = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
			let addr = listener.local_addr().unwrap();

			let accept = tokio::spawn(async move {
				let (mut stream, _peer) = listener.accept().await.unwrap();
				let mut buf = [0_u8; 4];
				stream.read_exact(&mut buf).await.unwrap();
				stream.write_all(&buf).await.unwrap();
				stream.flush().await.unwrap();
			});

			let client = REGISTRY.resolve_client("shadow", &options, None).unwrap();
			let mut stream = client.dial(&SocksAddr::from(addr)).await.unwrap();
			stream.write_all(b"ping").await.unwrap();
			stream.flush().await.unwrap();
			let mut buf = [0_u8; 4];
			stream.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"ping");
			accept.await.unwrap();
		});
	}

	#[test]
	fn test_dial_refused() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let addr = {
				let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
				l.local_addr().unwrap()
			};
			let client = REGISTRY
				.resolve_client("plain", &OptionsTable::empty(), None)
				.unwrap();
			let err = client.dial(&SocksAddr::from(addr)).await.err().unwrap();
			assert_eq!(err.io_kind(), io::ErrorKind::ConnectionRefused);
		});
	}
}

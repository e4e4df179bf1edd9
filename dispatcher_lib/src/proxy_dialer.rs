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
Upstream proxy used by client transports to reach the bridge.

Supported URL schemes:
```plain
http://[user:pass@]host:port
socks5://[user:pass@]host:port
socks4a://[user@]host:port
```
*/

use crate::{
	error::{ConfigurationError, DialError},
	prelude::*,
	protocol::SocksDestination,
	transport::plain::connect_tcp,
};
use http::{header, Request, StatusCode};
use std::io;
use tokio::net::TcpStream;
use url::{Host, Url};

const MAX_RESPONSE_LEN: usize = 8 * 1024;
const SOCKS4_VER: u8 = 4;
const SOCKS5_VER: u8 = 5;
const SOCKS_CONNECT: u8 = 1;
const NO_AUTH: u8 = 0;
const USERPASS: u8 = 2;
const USERPASS_VER: u8 = 1;
const SOCKS4_GRANTED: u8 = 90;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyDialer {
	Http {
		addr: SocksAddr,
		/// Base64 encoded `user:pass`.
		auth: Option<String>,
	},
	Socks5 {
		addr: SocksAddr,
		user_pass: Option<(String, String)>,
	},
	Socks4a {
		addr: SocksAddr,
		user: String,
	},
}

impl ProxyDialer {
	/// # Errors
	///
	/// Returns [`ConfigurationError::InvalidProxy`] if the scheme is unsupported
	/// or the URL has no usable host.
	pub fn from_url(url: &Url) -> Result<Self, ConfigurationError> {
		let invalid = |reason: String| ConfigurationError::InvalidProxy {
			url: url.to_string(),
			reason,
		};
		let port = url
			.port_or_known_default()
			.or_else(|| matches!(url.scheme(), "socks5" | "socks4a").then(|| 1080))
			.ok_or_else(|| invalid("missing port".into()))?;
		let dest = match url.host() {
			Some(Host::Domain(name)) => name
				.parse::<SocksDestination>()
				.map_err(|e| invalid(e.to_string()))?,
			Some(Host::Ipv4(ip)) => ip.into(),
			Some(Host::Ipv6(ip)) => ip.into(),
			None => return Err(invalid("missing host".into())),
		};
		let addr = SocksAddr::new(dest, port);
		let user = url.username();
		let pass = url.password().unwrap_or("");
		Ok(match url.scheme() {
			"http" => ProxyDialer::Http {
				addr,
				auth: if user.is_empty() && pass.is_empty() {
					None
				} else {
					Some(base64::encode(format!("{}:{}", user, pass)))
				},
			},
			"socks5" => ProxyDialer::Socks5 {
				addr,
				user_pass: if user.is_empty() && pass.is_empty() {
					None
				} else {
					Some((user.to_owned(), pass.to_owned()))
				},
			},
			"socks4a" => ProxyDialer::Socks4a {
				addr,
				user: user.to_owned(),
			},
			scheme => return Err(invalid(format!("unsupported proxy scheme '{}'", scheme))),
		})
	}

	#[must_use]
	pub fn addr(&self) -> &SocksAddr {
		match self {
			ProxyDialer::Http { addr, .. }
			| ProxyDialer::Socks5 { addr, .. }
			| ProxyDialer::Socks4a { addr, .. } => addr,
		}
	}

	/// Connect to `dst` through the proxy.
	///
	/// # Errors
	///
	/// Returns [`DialError::Connect`] if the proxy cannot be reached, or
	/// [`DialError::Proxy`] if the proxy refuses.
	pub async fn connect(&self, dst: &SocksAddr) -> Result<TcpStream, DialError> {
		let mut stream = connect_tcp(self.addr()).await?;
		debug!("connecting to {} through proxy {}", dst, self.addr());
		let res = match self {
			ProxyDialer::Http { auth, .. } => http_connect(&mut stream, dst, auth.as_deref()).await,
			ProxyDialer::Socks5 { user_pass, .. } => {
				socks5_connect(&mut stream, dst, user_pass.as_ref()).await
			}
			ProxyDialer::Socks4a { user, .. } => socks4a_connect(&mut stream, dst, user).await,
		};
		res.map_err(|source| DialError::Proxy {
			proxy: self.addr().to_string(),
			source,
		})?;
		Ok(stream)
	}
}

fn proxy_err(msg: String) -> io::Error {
	io::Error::new(io::ErrorKind::Other, msg)
}

// -------------------------------------------------------
//                     HTTP CONNECT
// -------------------------------------------------------

fn put_request_head(buf: &mut Vec<u8>, req: &Request<()>) {
	buf.put_slice(req.method().as_str().as_bytes());
	buf.put_u8(b' ');
	buf.put_slice(req.uri().to_string().as_bytes());
	buf.put_slice(b" HTTP/1.1");
	buf.put_slice(CRLF);
	for (name, value) in req.headers() {
		buf.put_slice(name.as_str().as_bytes());
		buf.put_slice(b": ");
		buf.put_slice(value.as_bytes());
		buf.put_slice(CRLF);
	}
	buf.put_slice(CRLF);
}

async fn http_connect(
	stream: &mut TcpStream,
	dst: &SocksAddr,
	auth: Option<&str>,
) -> io::Result<()> {
	let dst_str = dst.to_string();
	let mut req = Request::connect(dst_str.as_str());
	req = req.header(header::HOST, dst_str.as_str());
	if let Some(auth) = auth {
		req = req.header(header::PROXY_AUTHORIZATION, format!("Basic {}", auth));
	}
	let req = req
		.body(())
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

	let mut buf = Vec::with_capacity(256);
	put_request_head(&mut buf, &req);
	stream.write_all(&buf).await?;

	// Read byte by byte so nothing after the response head is consumed.
	buf.clear();
	while !buf.ends_with(CRLF_2) {
		if buf.len() >= MAX_RESPONSE_LEN {
			return Err(proxy_err("HTTP proxy response too long".into()));
		}
		buf.push(stream.read_u8().await?);
	}

	let mut headers = [httparse::EMPTY_HEADER; 32];
	let mut resp = httparse::Response::new(&mut headers);
	let status = match resp.parse(&buf) {
		Ok(httparse::Status::Complete(_)) => resp.code.unwrap_or_default(),
		Ok(httparse::Status::Partial) => {
			return Err(proxy_err("incomplete HTTP proxy response".into()))
		}
		Err(e) => return Err(proxy_err(format!("invalid HTTP proxy response ({})", e))),
	};
	trace!("HTTP proxy replied with status {}", status);
	match StatusCode::from_u16(status) {
		Ok(StatusCode::OK) => Ok(()),
		Ok(StatusCode::PROXY_AUTHENTICATION_REQUIRED) => Err(io::Error::new(
			io::ErrorKind::PermissionDenied,
			"HTTP proxy authentication failed",
		)),
		_ => Err(proxy_err(format!("HTTP proxy status code {}", status))),
	}
}

// -------------------------------------------------------
//                        SOCKS
// -------------------------------------------------------

async fn socks5_connect(
	stream: &mut TcpStream,
	dst: &SocksAddr,
	user_pass: Option<&(String, String)>,
) -> io::Result<()> {
	let method = if user_pass.is_some() { USERPASS } else { NO_AUTH };
	stream.write_all(&[SOCKS5_VER, 1, method]).await?;
	let mut reply = [0_u8; 2];
	stream.read_exact(&mut reply).await?;
	if reply[0] != SOCKS5_VER || reply[1] != method {
		return Err(proxy_err(format!(
			"SOCKS5 proxy rejected method {} ({:?})",
			method, reply
		)));
	}

	let mut buf = Vec::with_capacity(512);
	if let Some((user, pass)) = user_pass {
		let (user_len, pass_len) = match (u8::try_from(user.len()), u8::try_from(pass.len())) {
			(Ok(u), Ok(p)) => (u, p),
			_ => return Err(proxy_err("SOCKS5 username or password too long".into())),
		};
		buf.put_u8(USERPASS_VER);
		buf.put_u8(user_len);
		buf.put_slice(user.as_bytes());
		buf.put_u8(pass_len);
		buf.put_slice(pass.as_bytes());
		stream.write_all(&buf).await?;
		stream.read_exact(&mut reply).await?;
		if reply[1] != 0 {
			return Err(io::Error::new(
				io::ErrorKind::PermissionDenied,
				"SOCKS5 proxy authentication failed",
			));
		}
	}

	buf.clear();
	buf.put_slice(&[SOCKS5_VER, SOCKS_CONNECT, 0]);
	dst.write_to(&mut buf);
	stream.write_all(&buf).await?;

	let mut head = [0_u8; 3];
	stream.read_exact(&mut head).await?;
	if head[0] != SOCKS5_VER {
		return Err(proxy_err(format!("invalid SOCKS5 version {}", head[0])));
	}
	SocksAddr::async_read_from(stream)
		.await
		.map_err(|e| e.into_io_err())?;
	match head[1] {
		0 => Ok(()),
		5 => Err(io::ErrorKind::ConnectionRefused.into()),
		6 => Err(io::ErrorKind::TimedOut.into()),
		code => Err(proxy_err(format!("SOCKS5 proxy replied {}", code))),
	}
}

async fn socks4a_connect(stream: &mut TcpStream, dst: &SocksAddr, user: &str) -> io::Result<()> {
	let mut buf = Vec::with_capacity(512);
	buf.put_u8(SOCKS4_VER);
	buf.put_u8(SOCKS_CONNECT);
	buf.put_u16(dst.port);
	match &dst.dest {
		SocksDestination::Ip(IpAddr::V4(ip)) => {
			buf.put_slice(&ip.octets());
			buf.put_slice(user.as_bytes());
			buf.put_u8(0);
		}
		dest => {
			// 0.0.0.1 tells the proxy a host name follows.
			buf.put_slice(&[0, 0, 0, 1]);
			buf.put_slice(user.as_bytes());
			buf.put_u8(0);
			buf.put_slice(dest.to_string().as_bytes());
			buf.put_u8(0);
		}
	}
	stream.write_all(&buf).await?;

	let mut reply = [0_u8; 8];
	stream.read_exact(&mut reply).await?;
	if reply[1] == SOCKS4_GRANTED {
		Ok(())
	} else {
		Err(proxy_err(format!("SOCKS4a proxy replied {}", reply[1])))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::net::TcpListener;

	fn parse(s: &str) -> Result<ProxyDialer, ConfigurationError> {
		ProxyDialer::from_url(&Url::parse(s).unwrap())
	}

	#[test]
	fn test_from_url() {
		assert_eq!(
			parse("http://u:p@127.0.0.1:8080").unwrap(),
			ProxyDialer::Http {
				addr: "127.0.0.1:8080".parse().unwrap(),
				auth: Some(base64::encode("u:p")),
			}
		);
		assert_eq!(
			parse("socks5://localhost").unwrap(),
			ProxyDialer::Socks5 {
				addr: "localhost:1080".parse().unwrap(),
				user_pass: None,
			}
		);
		assert_eq!(
			parse("socks4a://me@[::1]:9050").unwrap(),
			ProxyDialer::Socks4a {
				addr: "[::1]:9050".parse().unwrap(),
				user: "me".into(),
			}
		);
		assert!(matches!(
			parse("ftp://127.0.0.1:21"),
			Err(ConfigurationError::InvalidProxy { .. })
		));
	}

	#[test]
	fn test_http_connect() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
			let proxy_addr = listener.local_addr().unwrap();
			let proxy = tokio::spawn(async move {
				let (mut stream, _) = listener.accept().await.unwrap();
				let mut head = Vec::new();
				while !head.ends_with(CRLF_2) {
					head.push(stream.read_u8().await.unwrap());
				}
				let head = String::from_utf8(head).unwrap();
				stream
					.write_all(b"HTTP/1.1 200 Connection established\r\n\r\nhi")
					.await
					.unwrap();
				head
			});

			let dialer = parse(&format!("http://u:p@{}", proxy_addr)).unwrap();
			let mut stream = dialer
				.connect(&"example.com:443".parse().unwrap())
				.await
				.unwrap();
			let mut buf = [0_u8; 2];
			stream.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"hi");

			let head = proxy.await.unwrap();
			assert!(head.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
			let auth = format!("proxy-authorization: Basic {}\r\n", base64::encode("u:p"));
			assert!(head.contains(&auth), "{}", head);
		});
	}

	#[test]
	fn test_http_connect_rejected() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
			let proxy_addr = listener.local_addr().unwrap();
			tokio::spawn(async move {
				let (mut stream, _) = listener.accept().await.unwrap();
				let mut buf = [0_u8; 256];
				let _ = stream.read(&mut buf).await;
				let _ = stream
					.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
					.await;
			});
			let dialer = parse(&format!("http://{}", proxy_addr)).unwrap();
			let err = dialer
				.connect(&"127.0.0.1:1".parse().unwrap())
				.await
				.unwrap_err();
			assert!(matches!(err, DialError::Proxy { .. }));
			assert_eq!(err.io_kind(), io::ErrorKind::PermissionDenied);
		});
	}

	#[test]
	fn test_socks5_connect() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
			let proxy_addr = listener.local_addr().unwrap();
			let proxy = tokio::spawn(async move {
				let (mut stream, _) = listener.accept().await.unwrap();
				let mut methods = [0_u8; 3];
				stream.read_exact(&mut methods).await.unwrap();
				assert_eq!(methods, [5, 1, USERPASS]);
				stream.write_all(&[5, USERPASS]).await.unwrap();
				let mut auth = [0_u8; 6];
				stream.read_exact(&mut auth).await.unwrap();
				assert_eq!(&auth, b"\x01\x02ab\x01c");
				stream.write_all(&[1, 0]).await.unwrap();
				let mut head = [0_u8; 3];
				stream.read_exact(&mut head).await.unwrap();
				assert_eq!(head, [5, 1, 0]);
				let dst = SocksAddr::async_read_from(&mut stream).await.unwrap();
				stream
					.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0])
					.await
					.unwrap();
				dst
			});

			let dialer = parse(&format!("socks5://ab:c@{}", proxy_addr)).unwrap();
			let target: SocksAddr = "bridge.example:80".parse().unwrap();
			dialer.connect(&target).await.unwrap();
			assert_eq!(proxy.await.unwrap(), target);
		});
	}
}

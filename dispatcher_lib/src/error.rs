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

use crate::{prelude::Tag, protocol::socks_addr::ReadError};
use std::{
	fmt::{self, Display},
	io,
	net::SocketAddr,
	path::PathBuf,
};
use thiserror::Error as ThisError;

/// Invalid or conflicting configuration.
///
/// Fatal before any listener is started, or causes a single
/// bind spec/transport to be skipped.
#[derive(Debug, ThisError)]
pub enum ConfigurationError {
	#[error("unknown transport '{transport}'")]
	UnknownTransport { transport: Tag },
	#[error("transport '{transport}' is missing required parameter '{missing}'")]
	MissingParameter {
		transport: Tag,
		missing: &'static str,
	},
	#[error("transport '{transport}' has invalid parameter '{param}' ({reason})")]
	InvalidParameter {
		transport: Tag,
		param: &'static str,
		reason: String,
	},
	#[error("cannot specify -options and -optionsFile at the same time")]
	ConflictingOptions,
	#[error("cannot read options file '{}' ({source})", .path.display())]
	OptionsFile { path: PathBuf, source: io::Error },
	#[error("invalid transport options {options:?} ({reason})")]
	InvalidOptions { options: String, reason: String },
	#[error("-bindaddr: {spec:?}: doesn't contain \"-\"")]
	MissingSeparator { spec: String },
	#[error("-bindaddr: {spec:?}: {reason}")]
	InvalidBindAddr { spec: String, reason: String },
	#[error("invalid address {addr:?} ({reason})")]
	InvalidAddress { addr: String, reason: String },
	#[error("invalid proxy URL {url:?} ({reason})")]
	InvalidProxy { url: String, reason: String },
	#[error("cannot create state directory '{}' ({source})", .path.display())]
	StateDir { path: PathBuf, source: io::Error },
	#[error("{0}")]
	InvalidFlag(String),
}

/// A listener cannot be opened.
#[derive(Debug, ThisError)]
#[error("cannot open '{transport}' listener on {addr} ({source})")]
pub struct ListenerBindError {
	pub transport: Tag,
	pub addr: SocketAddr,
	pub source: io::Error,
}

/// Malformed front-end handshake.
#[derive(Debug, ThisError)]
pub enum HandshakeError {
	#[error("IO error ({0})")]
	Io(#[from] io::Error),
	#[error("unsupported SOCKS version {0}")]
	UnsupportedVersion(u8),
	#[error("no acceptable SOCKS authentication method")]
	NoAcceptableMethod,
	#[error("unsupported SOCKS command {0}")]
	UnsupportedCommand(u8),
	#[error("invalid address ({0})")]
	Address(#[from] ReadError),
	#[error("invalid transport arguments ({0})")]
	Args(String),
	#[error("cannot determine target address ({0})")]
	NoTarget(&'static str),
	#[error("first datagram is not a STUN message")]
	NotStun,
}

/// Outbound dial through a transport failed.
#[derive(Debug, ThisError)]
pub enum DialError {
	#[error("cannot connect to {addr} ({source})")]
	Connect { addr: String, source: io::Error },
	#[error("upstream proxy {proxy} failed ({source})")]
	Proxy { proxy: String, source: io::Error },
	#[error("transport error ({0})")]
	Transport(io::Error),
}

impl DialError {
	/// The underlying IO error kind, used to pick a SOCKS reply code.
	#[must_use]
	pub fn io_kind(&self) -> io::ErrorKind {
		match self {
			DialError::Connect { source, .. } | DialError::Proxy { source, .. } => source.kind(),
			DialError::Transport(e) => e.kind(),
		}
	}
}

/// Backend connection or extended ORPort handshake failed.
#[derive(Debug, ThisError)]
pub enum BackendError {
	#[error("cannot connect to backend {addr} ({source})")]
	Connect { addr: SocketAddr, source: io::Error },
	#[error("IO error during extended ORPort handshake ({0})")]
	Io(#[from] io::Error),
	#[error("auth cookie '{}' is invalid ({reason})", .path.display())]
	Cookie { path: PathBuf, reason: String },
	#[error("extended ORPort is configured without an auth cookie")]
	MissingCookie,
	#[error("backend does not support SAFE_COOKIE authentication")]
	NoSafeCookie,
	#[error("backend server hash mismatch")]
	ServerHashMismatch,
	#[error("backend rejected authentication")]
	AuthRejected,
	#[error("backend denied the connection")]
	Denied,
	#[error("unexpected backend reply {0:#06x}")]
	UnexpectedReply(u16),
	#[error("{0} is too long for an extended ORPort command")]
	CommandTooLong(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	/// From the local/accepted side to the remote side.
	Send,
	/// From the remote side to the local/accepted side.
	Recv,
}

impl Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Direction::Send => "send",
			Direction::Recv => "recv",
		})
	}
}

/// Read or write failure in the middle of a relay.
#[derive(Debug, ThisError)]
#[error("relay {direction} failed ({source})")]
pub struct RelayError {
	pub direction: Direction,
	pub source: io::Error,
}

#[derive(Debug, ThisError)]
pub enum Error {
	#[error("configuration error ({0})")]
	Configuration(#[from] ConfigurationError),
	#[error("{0}")]
	ListenerBind(#[from] ListenerBindError),
	#[error("handshake error ({0})")]
	Handshake(#[from] HandshakeError),
	#[error("dial error ({0})")]
	Dial(#[from] DialError),
	#[error("backend error ({0})")]
	Backend(#[from] BackendError),
	#[error("{0}")]
	Relay(#[from] RelayError),
}

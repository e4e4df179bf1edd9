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

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

/*!
Pluggable transport dispatcher.

The client side accepts local application traffic (SOCKS5, intercepted
TCP or UDP) and carries it through a named transport to a remote server.
The server side accepts transport connections and hands the undisguised
traffic to a backend, optionally announcing each connection through
the extended ORPort protocol.
*/

// All codes below forbid unsafe.

#[forbid(unsafe_code)]
pub mod backend;
#[forbid(unsafe_code)]
pub mod config;
#[forbid(unsafe_code)]
pub mod error;
#[forbid(unsafe_code)]
pub mod frontend;
#[forbid(unsafe_code)]
pub mod mode;
#[forbid(unsafe_code)]
pub mod options;
#[forbid(unsafe_code)]
mod prelude;
#[forbid(unsafe_code)]
pub mod protocol;
#[forbid(unsafe_code)]
pub mod proxy_dialer;
#[forbid(unsafe_code)]
pub mod socks5;
#[forbid(unsafe_code)]
pub mod status;
#[cfg(test)]
#[forbid(unsafe_code)]
mod test_utils;
#[forbid(unsafe_code)]
pub mod transport;
#[forbid(unsafe_code)]
mod utils;

pub use config::{Flags, LegacyEnv, Role, RoleConfig, Setup, StateDir};
pub use error::Error;
pub use frontend::{Dispatcher, Launch};
pub use mode::ProxyMode;
pub use status::{CaptureReporter, Reporter, StdoutReporter};
pub use utils::BytesCount;

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
#![allow(clippy::default_trait_access)]

use args::{Action, AppOptions, ServeAction};
use dispatcher_lib::{
	error::ConfigurationError, Dispatcher, Launch, LegacyEnv, Reporter, RoleConfig, Setup,
	StdoutReporter,
};
use std::{io, sync::Arc};
use tokio::{io::AsyncReadExt, runtime::Runtime};

mod args;
mod config;

type BoxStdErr = Box<dyn std::error::Error + Send + Sync>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
enum Error {
	#[error("[IO error] {0}")]
	Io(#[from] io::Error),
	#[error("[logger] {0}")]
	Logger(BoxStdErr),
	#[error("[config] {0}")]
	Config(#[from] ConfigurationError),
	#[error("[runtime] {0}")]
	Runtime(dispatcher_lib::Error),
	#[error("[runtime] no transport could be launched")]
	NothingLaunched,
	#[error("[IO error] stdin closed")]
	StdinClosed,
}

impl Error {
	fn exit_code(&self) -> exitcode::ExitCode {
		match self {
			Error::Io(_) | Error::StdinClosed => exitcode::IOERR,
			Error::Logger(_) | Error::Config(_) => exitcode::CONFIG,
			Error::Runtime(_) | Error::NothingLaunched => exitcode::SOFTWARE,
		}
	}
}

fn serve(action: ServeAction) -> Result<(), Error> {
	let flags = action.flags.with_legacy_env(&LegacyEnv::from_process());

	// Creates the state directory, where the log file lives.
	let setup = Setup::from_flags(&flags)?;
	action
		.log
		.init_logger(setup.state_dir.path())
		.map_err(Error::Logger)?;
	log::info!("dispatcher-{} starting in {} mode", VERSION, setup.mode);
	let reporter: Arc<dyn Reporter> = Arc::new(StdoutReporter);
	reporter.version(&flags.ptversion);

	let rt = Runtime::new()?;
	rt.block_on(run(setup, reporter))
}

async fn run(setup: Setup, reporter: Arc<dyn Reporter>) -> Result<(), Error> {
	let dispatcher = Dispatcher::new(setup.mode, setup.options, reporter);
	let launch: Launch = match &setup.role {
		RoleConfig::Client(conf) => dispatcher.client_setup(conf).await?,
		RoleConfig::Server(conf) => dispatcher
			.server_setup(conf, &setup.state_dir)
			.await
			.map_err(|e| match e {
				dispatcher_lib::Error::Configuration(e) => Error::Config(e),
				e => Error::Runtime(e),
			})?,
	};
	if !launch.launched {
		return Err(Error::NothingLaunched);
	}
	log::info!(
		"{} listener(s) running on {:?}",
		launch.listeners.len(),
		launch.listeners
	);

	if setup.exit_on_stdin_close {
		wait_stdin_close().await;
		log::info!("stdin closed, exiting");
		return Err(Error::StdinClosed);
	}
	futures::future::pending::<()>().await;
	Ok(())
}

/// Read and discard stdin until it is closed.
async fn wait_stdin_close() {
	let mut stdin = tokio::io::stdin();
	let mut buf = [0_u8; 256];
	loop {
		match stdin.read(&mut buf).await {
			Ok(0) => return,
			Ok(_) => {}
			Err(e) => {
				log::debug!("cannot read stdin ({})", e);
				return;
			}
		}
	}
}

fn main() {
	let opts = match AppOptions::new_from_args() {
		Ok(opts) => opts,
		Err(err) => {
			let code = if err.use_stderr() {
				exitcode::USAGE
			} else {
				exitcode::OK
			};
			// Help text goes to stdout, usage errors to stderr.
			err.print().unwrap_or_default();
			std::process::exit(code);
		}
	};
	match opts.into_action() {
		Action::CheckVersion => {
			println!("dispatcher-{}", VERSION);
		}
		Action::Serve(action) => {
			if let Err(err) = serve(action) {
				eprintln!("dispatcher stopped:\n {}\n", err);
				std::process::exit(err.exit_code());
			}
		}
	}
}

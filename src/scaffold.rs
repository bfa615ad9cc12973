/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains a "scaffold", in other words, functions that pre-configure an application embedding the [`Engine`](`crate::Engine`).
//!
//! The main entry point of this module is [`init`]

use std::process;

use tracing::subscriber::SetGlobalDefaultError;

use crate::shutdown::Shutdown;

/// Contains the result of the [`init`] function
#[must_use = "the shutdown signal should probably be used to stop the engine. Ignore this type manually if you are sure you don't want it"]
pub struct InitResult {
	/// Fires when a Ctrl-C signal has arrived
	pub shutdown: Shutdown,
}

/// Initializes a tracing subscriber and a background task that fires a [`Shutdown`] signal when Ctrl-C is pressed.
///
/// See [`set_up_logging`] and [`set_up_ctrl_c_handler`] for more info
pub fn init() -> InitResult {
	if set_up_logging().is_err() {
		tracing::debug!(
			"Unable to set up the default tracing subscriber. Another one is probably already registered"
		);
	}

	InitResult {
		shutdown: set_up_ctrl_c_handler(),
	}
}

/// Installs a tracing subscriber as the default.
///
/// The subscriber shows compact one-line log messages when log level is > DEBUG,
/// and pretty multi-line log messages when it's set to <= DEBUG.
///
/// It also logs to systemd-journald if available but only when compiled in release (to avoid log spam when debugging).
/// Timestamps fall back to UTC if the local offset can't be determined
///
/// # Errors
/// If a different global tracing subscriber has already been registered.
pub fn set_up_logging() -> Result<(), SetGlobalDefaultError> {
	use tracing::Level;
	use tracing_subscriber::{
		EnvFilter, Layer,
		filter::LevelFilter,
		fmt::time::{OffsetTime, UtcTime},
		layer::SubscriberExt,
	};

	let env_filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::INFO.into())
		.from_env_lossy();

	let is_debug_log_level = env_filter
		.max_level_hint()
		.map_or_else(|| false, |level| level >= Level::DEBUG);

	// determining the local offset may fail in a multithreaded process
	let stdout = match OffsetTime::local_rfc_3339() {
		Ok(timer) => stdout_layer(timer, is_debug_log_level),
		Err(_) => stdout_layer(UtcTime::rfc_3339(), is_debug_log_level),
	};

	// enable journald logging only on release to avoid log spam on dev machines
	let journald = if cfg!(debug_assertions) {
		None
	} else {
		tracing_journald::layer().ok()
	};

	let subscriber = tracing_subscriber::registry()
		.with(journald.with_filter(LevelFilter::INFO))
		.with(stdout.with_filter(env_filter));

	tracing::subscriber::set_global_default(subscriber)
}

/// Starts a detached [`tokio::task`] that sets up a Ctrl-C signal handler.
///
/// The first Ctrl-C fires the returned [`Shutdown`] signal, the second one force closes the process.
#[must_use]
pub fn set_up_ctrl_c_handler() -> Shutdown {
	let (shutdown, shutdown_handle) = Shutdown::new();

	tokio::spawn(async move {
		// graceful shutdown
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!("Failed to set up a CtrlC signal handler: {e}");
			return;
		}

		shutdown_handle.signal();
		tracing::info!("Shutting down. Press Ctrl-C again to force close");

		// force close
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!("Failed to set up a CtrlC signal handler: {e}");
			return;
		}

		tracing::info!("Force closing...");
		#[expect(clippy::exit, reason = "user requested force close")]
		process::exit(1);
	});

	shutdown
}

/// Pretty multi-line output if `verbose`, compact one-line output otherwise
fn stdout_layer<S, T>(
	timer: T,
	verbose: bool,
) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
	S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
	T: tracing_subscriber::fmt::time::FormatTime + Send + Sync + 'static,
{
	use tracing_subscriber::Layer;

	let layer = tracing_subscriber::fmt::layer()
		.with_target(verbose)
		.with_file(verbose)
		.with_line_number(verbose)
		.with_thread_ids(verbose)
		.with_timer(timer);

	if verbose {
		layer.pretty().boxed()
	} else {
		layer.boxed()
	}
}

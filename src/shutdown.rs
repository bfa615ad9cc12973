/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`Shutdown`] signal that every background loop observes
//! and the [`ShutdownHandle`] that fires it

use tokio::sync::watch;

/// The receiving end of a shutdown signal.
///
/// Loops check it at the top of every iteration and race it against every wait.
#[derive(Clone, Debug)]
pub struct Shutdown(watch::Receiver<bool>);

/// The sending end of a shutdown signal
#[derive(Debug)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl Shutdown {
	/// Creates a new [`Shutdown`] signal and returns the handle that fires it
	#[must_use]
	pub fn new() -> (Self, ShutdownHandle) {
		let (tx, rx) = watch::channel(false);
		(Self(rx), ShutdownHandle(tx))
	}

	/// Blocks the current task until the signal fires
	pub async fn wait(&mut self) {
		// assume closed channel = should stop
		_ = self.0.wait_for(|stop| *stop).await;
	}

	/// Checks if the signal has fired without blocking
	#[must_use]
	pub fn is_signaled(&self) -> bool {
		// assume closed channel = should stop
		*self.0.borrow() || self.0.has_changed().is_err()
	}
}

impl ShutdownHandle {
	/// Fires the signal. Every current and future [`Shutdown`] of this handle observes it
	pub fn signal(&self) {
		self.0.send_replace(true);
	}

	/// Creates another receiving end for this handle
	#[must_use]
	pub fn subscribe(&self) -> Shutdown {
		Shutdown(self.0.subscribe())
	}

	/// Checks if [`ShutdownHandle::signal`] has already been called
	#[must_use]
	pub fn is_signaled(&self) -> bool {
		*self.0.borrow()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::Shutdown;

	#[tokio::test]
	async fn wait_returns_after_signal() {
		let (mut shutdown, handle) = Shutdown::new();
		assert!(!shutdown.is_signaled(), "fresh signal must not be fired");

		handle.signal();
		tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
			.await
			.expect("wait() should return once signaled");
		assert!(shutdown.is_signaled(), "signal must stay fired");
	}

	#[tokio::test]
	async fn subscribers_created_after_signal_see_it() {
		let (_shutdown, handle) = Shutdown::new();
		handle.signal();

		let mut late = handle.subscribe();
		assert!(late.is_signaled(), "late subscriber must observe the signal");
		late.wait().await;
	}

	#[tokio::test]
	async fn dropped_handle_counts_as_signaled() {
		let (mut shutdown, handle) = Shutdown::new();
		drop(handle);

		assert!(shutdown.is_signaled(), "closed channel means stop");
		shutdown.wait().await;
	}
}

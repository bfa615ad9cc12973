/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`SyncBackoff`] trait and its implementations

use std::time::Duration;

use rand::Rng;

/// Decides how long an account loop waits before its next sync
pub trait SyncBackoff: Send + Sync + 'static {
	/// Delay before the next sync of an account syncing every `interval`,
	/// after `consecutive_failures` failed syncs in a row (0 after a success)
	fn next_delay(&self, interval: Duration, consecutive_failures: u32) -> Duration;
}

/// Always waits the account's regular interval, even after errors
#[derive(Clone, Copy, Default, Debug)]
pub struct FixedInterval;

impl SyncBackoff for FixedInterval {
	fn next_delay(&self, interval: Duration, _consecutive_failures: u32) -> Duration {
		interval
	}
}

/// Doubles the wait after each consecutive failure, starting from the account's regular interval:
/// - after a success: interval
/// - 1st failure: 2 * interval
/// - 2nd failure: 4 * interval
///   And so on, up to [`max_delay`](`Self::max_delay`)
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
	/// Upper bound of the wait.
	/// Defaults to [`DEFAULT_MAX_DELAY`](`Self::DEFAULT_MAX_DELAY`) (1 hour)
	pub max_delay: Duration,

	/// Randomize the wait within `[0.5, 1.5)` of the calculated value
	pub use_jitter: bool,
}

impl ExponentialBackoff {
	#[expect(missing_docs, reason = "self-explanatory")]
	pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60 * 60 /* an hour */);

	/// Creates a new [`ExponentialBackoff`] instance with the default values
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

impl Default for ExponentialBackoff {
	fn default() -> Self {
		Self {
			max_delay: Self::DEFAULT_MAX_DELAY,
			use_jitter: true,
		}
	}
}

impl SyncBackoff for ExponentialBackoff {
	fn next_delay(&self, interval: Duration, consecutive_failures: u32) -> Duration {
		if consecutive_failures == 0 {
			return interval;
		}

		exponential_backoff_duration(
			interval,
			consecutive_failures,
			self.max_delay,
			self.use_jitter,
			rand::rng(),
		)
	}
}

fn exponential_backoff_duration(
	base: Duration,
	attempt: u32,
	max: Duration,
	use_jitter: bool,
	mut rng: impl Rng,
) -> Duration {
	let multiplier = 2u32.saturating_pow(attempt);
	let exp_duration = base.saturating_mul(multiplier).min(max);

	let final_duration = if use_jitter {
		let jittered = exp_duration.mul_f64(rng.random::<f64>() + 0.5);

		tracing::debug!(
			"Calculated exponential backoff duration: base = {}s, with jitter = {}s",
			exp_duration.as_secs(),
			jittered.as_secs()
		);

		jittered
	} else {
		tracing::debug!(
			"Calculated exponential backoff duration: {}s",
			exp_duration.as_secs()
		);

		exp_duration
	};

	final_duration.min(max)
}

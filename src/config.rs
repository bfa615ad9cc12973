/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Tunables of the engine.
//!
//! Every struct implements [`Default`], has a [`bon`] builder, and can be deserialized with all fields optional.
//! Durations are written as whole seconds.

use std::time::Duration;

use serde::Deserialize;

/// Configuration of the whole [`Engine`](`crate::Engine`)
#[derive(bon::Builder, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct EngineConfig {
	/// Worker pool configuration
	#[builder(default)]
	pub pool: PoolConfig,

	/// Scheduler configuration
	#[builder(default)]
	pub scheduler: SchedulerConfig,

	/// Incremental sync configuration
	#[builder(default)]
	pub sync: SyncManagerConfig,

	/// How many events a slow subscriber may lag behind before it starts missing them
	#[builder(default = EngineConfig::DEFAULT_EVENT_CAPACITY)]
	pub event_capacity: usize,
}

impl EngineConfig {
	#[expect(missing_docs, reason = "self-explanatory")]
	pub const DEFAULT_EVENT_CAPACITY: usize = 1024;
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self::builder().build()
	}
}

/// Configuration of the [`WorkerPool`](`crate::WorkerPool`)
#[derive(bon::Builder, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PoolConfig {
	/// How often a subscription-driven worker polls its mailbox
	#[builder(default = PoolConfig::DEFAULT_POLL_INTERVAL)]
	#[serde(with = "duration_secs")]
	pub poll_interval: Duration,

	/// How often the idle-worker sweep runs
	#[builder(default = PoolConfig::DEFAULT_RECLAIM_INTERVAL)]
	#[serde(with = "duration_secs")]
	pub reclaim_interval: Duration,

	/// How long an unreferenced worker is kept around before the sweep reclaims it
	#[builder(default = PoolConfig::DEFAULT_IDLE_GRACE)]
	#[serde(with = "duration_secs")]
	pub idle_grace: Duration,

	/// Delay between the last subscription of a mailbox going away and the reclamation check
	#[builder(default = PoolConfig::DEFAULT_UNSUBSCRIBE_DEBOUNCE)]
	#[serde(with = "duration_secs")]
	pub unsubscribe_debounce: Duration,

	/// How many recently delivered message IDs each worker remembers to avoid re-delivering them
	#[builder(default = PoolConfig::DEFAULT_DEDUP_WINDOW)]
	pub dedup_window: usize,
}

#[expect(missing_docs, reason = "self-explanatory")]
impl PoolConfig {
	pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
	pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(60);
	pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(5 * 60 /* secs in a min */);
	pub const DEFAULT_UNSUBSCRIBE_DEBOUNCE: Duration = Duration::from_secs(5);
	pub const DEFAULT_DEDUP_WINDOW: usize = 1024;
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self::builder().build()
	}
}

/// Configuration of the [`EmailFetchScheduler`](`crate::EmailFetchScheduler`)
#[derive(bon::Builder, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SchedulerConfig {
	/// How often expired subscriptions are swept
	#[builder(default = SchedulerConfig::DEFAULT_EXPIRY_SWEEP_INTERVAL)]
	#[serde(with = "duration_secs")]
	pub expiry_sweep_interval: Duration,

	/// How long [`stop`](`crate::EmailFetchScheduler::stop`) waits for in-flight fetches before aborting them
	#[builder(default = SchedulerConfig::DEFAULT_SHUTDOWN_DEADLINE)]
	#[serde(with = "duration_secs")]
	pub shutdown_deadline: Duration,
}

#[expect(missing_docs, reason = "self-explanatory")]
impl SchedulerConfig {
	pub const DEFAULT_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
	pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self::builder().build()
	}
}

/// Configuration of the [`IncrementalSyncManager`](`crate::IncrementalSyncManager`)
#[derive(bon::Builder, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SyncManagerConfig {
	/// A time window never ends later than `now - safety_skew`, to tolerate clock drift and server-side indexing lag
	#[builder(default = SyncManagerConfig::DEFAULT_SAFETY_SKEW)]
	#[serde(with = "duration_secs")]
	pub safety_skew: Duration,

	/// How far back the very first sync of an account reaches
	#[builder(default = SyncManagerConfig::DEFAULT_INITIAL_WINDOW)]
	#[serde(with = "duration_secs")]
	pub initial_window: Duration,

	/// How far back a resync reaches after the provider invalidated the change token
	#[builder(default = SyncManagerConfig::DEFAULT_FULL_RESYNC_WINDOW)]
	#[serde(with = "duration_secs")]
	pub full_resync_window: Duration,

	/// Upper bound of the random delay before an account's first sync after start
	#[builder(default = SyncManagerConfig::DEFAULT_MAX_START_JITTER)]
	#[serde(with = "duration_secs")]
	pub max_start_jitter: Duration,

	/// How long [`stop`](`crate::IncrementalSyncManager::stop`) waits for in-flight syncs before aborting them
	#[builder(default = SyncManagerConfig::DEFAULT_SHUTDOWN_DEADLINE)]
	#[serde(with = "duration_secs")]
	pub shutdown_deadline: Duration,
}

#[expect(missing_docs, reason = "self-explanatory")]
impl SyncManagerConfig {
	pub const DEFAULT_SAFETY_SKEW: Duration = Duration::from_secs(30);
	pub const DEFAULT_INITIAL_WINDOW: Duration = Duration::from_secs(24 * 60 * 60 /* a day */);
	pub const DEFAULT_FULL_RESYNC_WINDOW: Duration =
		Duration::from_secs(7 * 24 * 60 * 60 /* a week */);
	pub const DEFAULT_MAX_START_JITTER: Duration = Duration::from_secs(10);
	pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);
}

impl Default for SyncManagerConfig {
	fn default() -> Self {
		Self::builder().build()
	}
}

/// (De)serializes a [`Duration`] as a whole number of seconds
pub(crate) mod duration_secs {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub(crate) fn serialize<S>(dur: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(dur.as_secs())
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_secs)
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
	collections::{HashSet, VecDeque},
	time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Mutable state of a single worker. Guarded by the worker's lock
#[derive(Debug)]
pub(crate) struct WorkerState {
	/// A fetch cycle is in progress
	pub fetching: bool,

	/// When the last fetch cycle finished, successfully or not
	pub last_fetch: Option<Instant>,

	/// When the worker last became unreferenced or finished a cycle, whichever is later
	pub idle_since: Instant,

	/// Live subscriptions fetching from this mailbox
	pub subscriptions: usize,

	/// Account loops syncing this mailbox
	pub sync_refs: usize,

	/// Start of the next time window the worker fetches on its own timer
	pub own_since: DateTime<Utc>,

	/// IDs of recently delivered messages
	pub recent: RecentIds,
}

impl WorkerState {
	pub fn new(dedup_window: usize) -> Self {
		Self {
			fetching: false,
			last_fetch: None,
			idle_since: Instant::now(),
			subscriptions: 0,
			sync_refs: 0,
			own_since: Utc::now(),
			recent: RecentIds::new(dedup_window),
		}
	}

	pub fn is_referenced(&self) -> bool {
		self.subscriptions > 0 || self.sync_refs > 0
	}

	/// Whether the worker's own timer should poll. A mailbox pinned by an account loop is fetched by that loop instead
	pub fn wants_poll(&self) -> bool {
		self.subscriptions > 0 && self.sync_refs == 0
	}

	/// Not referenced, not fetching, and idle for at least `min_idle`
	pub fn is_reclaimable(&self, now: Instant, min_idle: Duration) -> bool {
		!self.is_referenced()
			&& !self.fetching
			&& now.saturating_duration_since(self.idle_since) >= min_idle
	}
}

/// A bounded set of message IDs remembering insertion order. The oldest ID is forgotten first
#[derive(Debug)]
pub(crate) struct RecentIds {
	capacity: usize,
	order: VecDeque<String>,
	ids: HashSet<String>,
}

impl RecentIds {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			order: VecDeque::with_capacity(capacity),
			ids: HashSet::with_capacity(capacity),
		}
	}

	/// Remembers `id`. Returns false if it was already remembered
	pub fn insert(&mut self, id: &str) -> bool {
		if self.capacity == 0 {
			return true;
		}

		if self.ids.contains(id) {
			return false;
		}

		if self.order.len() >= self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.ids.remove(&oldest);
			}
		}

		self.order.push_back(id.to_owned());
		self.ids.insert(id.to_owned());

		true
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`IncrementalSyncManager`]

use std::{
	collections::{HashMap, HashSet},
	fmt, mem,
	sync::{Arc, Weak},
	time::Duration,
};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::FuturesUnordered};
use parking_lot::Mutex;
use rand::Rng;
use tokio::{
	select,
	sync::Notify,
	task::{JoinError, JoinHandle},
	time::{sleep, timeout},
};
use tracing::Instrument;

use super::{
	Account, SyncConfig, SyncProgress, SyncStatus,
	backoff::{FixedInterval, SyncBackoff},
};
use crate::{
	alias::normalize_mailbox,
	auth::TokenSource,
	config::SyncManagerConfig,
	error::{Classify, ErrorChainDisplay, ErrorKind},
	fetch::{Cursor, Fetch, FetchError},
	shutdown::{Shutdown, ShutdownHandle},
	store::{StoreError, SyncStore},
	worker::{CycleError, CycleReport, WorkerPool},
};

/// Syncs every enabled account on its own interval and persists how far each one got.
///
/// At most one sync of an account runs at any time, whether it was scheduled or triggered manually.
pub struct IncrementalSyncManager<F, T, S> {
	inner: Arc<SyncInner<F, T, S>>,
}

struct SyncInner<F, T, S> {
	store: S,
	pool: WorkerPool<F, T>,
	config: SyncManagerConfig,
	backoff: Box<dyn SyncBackoff>,

	/// Accounts with a sync in progress
	in_flight: Mutex<HashSet<String>>,

	/// account ID -> its running loop
	loops: Mutex<HashMap<String, AccountLoop>>,
}

struct AccountLoop {
	mailbox: String,
	shutdown: ShutdownHandle,

	/// Wakes up a loop paused by an authorization error
	resume: Arc<Notify>,
	task: JoinHandle<()>,
}

/// What happened to a sync request
#[derive(Debug)]
pub enum SyncOutcome {
	/// The sync ran and its progress has been persisted
	Synced(SyncReport),

	/// The time window between the last sync and now is still empty, nothing to fetch yet
	UpToDate,

	/// Another sync of the account is in progress. This request has been discarded
	AlreadyRunning,

	/// The mailbox's worker was busy with a cycle of its own. Nothing has changed, try again later
	WorkerBusy,

	/// Scheduled syncs are disabled for the account
	Disabled,

	/// The account needs to be re-authorized. Scheduled syncs are paused until a manual sync succeeds
	Paused,
}

/// Details of a successful sync
#[derive(Clone, Debug)]
pub struct SyncReport {
	/// Cursor the sync fetched from
	pub cursor: Cursor,

	/// Messages fetched that weren't delivered before
	pub fetched: usize,

	/// (message, subscription) pairs delivered
	pub matched: usize,

	/// Resume position that has been persisted
	pub progress: SyncProgress,

	/// The sync cleared a previous [`SyncStatus::AuthRequired`]
	pub recovered: bool,
}

#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
	#[error("Account {0:?} doesn't exist")]
	UnknownAccount(String),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("Sync of account {account_id:?} failed")]
	Cycle {
		account_id: String,
		#[source]
		source: CycleError,
	},
}

impl Classify for SyncError {
	fn kind(&self) -> ErrorKind {
		match self {
			Self::UnknownAccount(_) => ErrorKind::Configuration,
			Self::Store(e) => e.kind(),
			Self::Cycle { source, .. } => source.kind(),
		}
	}
}

/// Whether the sync was requested by the account's timer or by a user
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Trigger {
	Scheduled,
	Manual,
}

#[bon::bon]
impl<F, T, S> IncrementalSyncManager<F, T, S>
where
	F: Fetch,
	T: TokenSource,
	S: SyncStore,
{
	/// Creates a manager. No account is synced until [`start`](`Self::start`) or [`add_account`](`Self::add_account`)
	#[builder]
	pub fn new(
		store: S,
		pool: WorkerPool<F, T>,
		#[builder(default)] config: SyncManagerConfig,
		#[builder(default = Box::new(FixedInterval))] backoff: Box<dyn SyncBackoff>,
	) -> Self {
		Self {
			inner: Arc::new(SyncInner {
				store,
				pool,
				config,
				backoff,
				in_flight: Mutex::new(HashSet::new()),
				loops: Mutex::new(HashMap::new()),
			}),
		}
	}
}

impl<F, T, S> IncrementalSyncManager<F, T, S>
where
	F: Fetch,
	T: TokenSource,
	S: SyncStore,
{
	/// Starts a sync loop for every account with auto sync enabled. Returns how many loops were started
	///
	/// # Errors
	/// If the store couldn't be read
	pub async fn start(&self) -> Result<usize, SyncError> {
		let configs = self.inner.store.enabled_configs().await?;

		let mut started = 0;
		for config in configs {
			let Some(account) = self.inner.store.account(&config.account_id).await? else {
				tracing::warn!(
					account_id = %config.account_id,
					"Sync config has no account, skipping"
				);
				continue;
			};

			if self.inner.spawn_loop(&account, &config) {
				started += 1;
			}
		}

		tracing::info!("Started {started} account sync loop(s)");
		Ok(started)
	}

	/// Syncs `account_id` right away, bypassing its schedule and a paused state.
	///
	/// A success after an authorization failure resumes the account's scheduled syncs.
	///
	/// # Errors
	/// If the account doesn't exist, the store failed, or the sync itself failed
	pub async fn trigger_sync(&self, account_id: &str) -> Result<SyncOutcome, SyncError> {
		let outcome = self.inner.sync_account(account_id, Trigger::Manual).await?;

		if let SyncOutcome::Synced(report) = &outcome {
			if report.recovered {
				if let Some(account_loop) = self.inner.loops.lock().get(account_id) {
					tracing::info!(account_id, "Re-authorized, resuming scheduled syncs");
					account_loop.resume.notify_one();
				}
			}
		}

		Ok(outcome)
	}

	/// Starts the sync loop of an account that has been added to the store.
	///
	/// Returns false if auto sync is disabled for it or its loop is already running
	///
	/// # Errors
	/// If the account doesn't exist or the store failed
	pub async fn add_account(&self, account_id: &str) -> Result<bool, SyncError> {
		let unknown = || SyncError::UnknownAccount(account_id.to_owned());
		let config = self.inner.store.config(account_id).await?.ok_or_else(unknown)?;
		let account = self.inner.store.account(account_id).await?.ok_or_else(unknown)?;

		if !config.auto_sync {
			return Ok(false);
		}

		Ok(self.inner.spawn_loop(&account, &config))
	}

	/// Stops the sync loop of `account_id`, waiting for its in-flight sync for at most the shutdown deadline.
	///
	/// Returns the real mailbox of the account, or `None` if it neither had a running loop nor exists in the store
	///
	/// # Errors
	/// If the account had no running loop and the store couldn't be read
	pub async fn remove_account(&self, account_id: &str) -> Result<Option<String>, SyncError> {
		let account_loop = self.inner.loops.lock().remove(account_id);

		let Some(account_loop) = account_loop else {
			let account = self.inner.store.account(account_id).await?;
			return Ok(account.map(|account| normalize_mailbox(&account.mailbox)));
		};

		let mailbox = account_loop.mailbox.clone();
		stop_loops(vec![account_loop], self.inner.config.shutdown_deadline).await;
		self.inner.pool.unpin(&mailbox);

		tracing::info!(account_id, %mailbox, "Account sync stopped");
		Ok(Some(mailbox))
	}

	/// The stored sync state of `account_id`
	///
	/// # Errors
	/// If the store couldn't be read
	pub async fn status(&self, account_id: &str) -> Result<Option<SyncConfig>, SyncError> {
		Ok(self.inner.store.config(account_id).await?)
	}

	/// IDs of the accounts with a running sync loop, sorted
	#[must_use]
	pub fn running_accounts(&self) -> Vec<String> {
		let mut ids = self.inner.loops.lock().keys().cloned().collect::<Vec<_>>();
		ids.sort();
		ids
	}

	/// Stops every account loop. In-flight syncs get `deadline` to finish before they are aborted
	pub async fn stop(&self, deadline: Duration) {
		let loops = mem::take(&mut *self.inner.loops.lock())
			.into_values()
			.collect::<Vec<_>>();

		let mailboxes = loops
			.iter()
			.map(|account_loop| account_loop.mailbox.clone())
			.collect::<Vec<_>>();

		tracing::debug!("Stopping {} account sync loop(s)", loops.len());
		stop_loops(loops, deadline).await;

		for mailbox in mailboxes {
			self.inner.pool.unpin(&mailbox);
		}
	}
}

impl<F, T, S> SyncInner<F, T, S>
where
	F: Fetch,
	T: TokenSource,
	S: SyncStore,
{
	/// Returns false if the loop is already running.
	///
	/// The mailbox is pinned the same way every sync of the account pins it, from the [`Account`]
	fn spawn_loop(self: &Arc<Self>, account: &Account, config: &SyncConfig) -> bool {
		let mut loops = self.loops.lock();
		if loops.contains_key(&config.account_id) {
			return false;
		}

		let mailbox = normalize_mailbox(&account.mailbox);
		self.pool.pin(&mailbox);

		let (shutdown, shutdown_handle) = Shutdown::new();
		let resume = Arc::new(Notify::new());
		let jitter = self.start_jitter();

		let task = account_loop(
			Arc::downgrade(self),
			config.account_id.clone(),
			config.interval,
			jitter,
			shutdown,
			Arc::clone(&resume),
		)
		.instrument(tracing::info_span!("account", id = %config.account_id));

		loops.insert(
			config.account_id.clone(),
			AccountLoop {
				mailbox,
				shutdown: shutdown_handle,
				resume,
				task: tokio::spawn(task),
			},
		);

		true
	}

	fn start_jitter(&self) -> Duration {
		let max = u64::try_from(self.config.max_start_jitter.as_millis()).unwrap_or(u64::MAX);
		if max == 0 {
			return Duration::ZERO;
		}

		Duration::from_millis(rand::rng().random_range(0..=max))
	}

	async fn sync_account(
		&self,
		account_id: &str,
		trigger: Trigger,
	) -> Result<SyncOutcome, SyncError> {
		let Some(_in_flight) = InFlightGuard::try_new(&self.in_flight, account_id) else {
			tracing::debug!(account_id, "Sync already in progress, discarding request");
			return Ok(SyncOutcome::AlreadyRunning);
		};

		let unknown = || SyncError::UnknownAccount(account_id.to_owned());
		let config = self.store.config(account_id).await?.ok_or_else(unknown)?;
		let account = self.store.account(account_id).await?.ok_or_else(unknown)?;

		if trigger == Trigger::Scheduled {
			if config.status == SyncStatus::AuthRequired {
				return Ok(SyncOutcome::Paused);
			}

			if !config.auto_sync {
				return Ok(SyncOutcome::Disabled);
			}
		}

		self.store
			.save_status(account_id, SyncStatus::Syncing, config.last_error.as_deref())
			.await?;

		let mailbox = normalize_mailbox(&account.mailbox);
		let res = {
			let _pin = PinGuard::new(&self.pool, &mailbox);
			self.run_strategy(&account, &config, &mailbox).await
		};

		match res {
			Ok(Some(mut report)) => {
				let saved = self.store.save_progress(account_id, &report.progress).await;
				if let Err(e) = saved {
					self.record_failure(account_id, SyncStatus::Error, &e).await;
					return Err(e.into());
				}

				self.store
					.save_status(account_id, SyncStatus::Idle, None)
					.await?;

				report.recovered = config.status == SyncStatus::AuthRequired;
				tracing::info!(
					account_id,
					fetched = report.fetched,
					matched = report.matched,
					"Synced"
				);

				Ok(SyncOutcome::Synced(report))
			}
			Ok(None) => {
				self.store
					.save_status(account_id, SyncStatus::Idle, None)
					.await?;

				Ok(SyncOutcome::UpToDate)
			}
			Err(CycleError::Busy { .. }) => {
				// nothing happened, restore what was there
				self.store
					.save_status(account_id, config.status, config.last_error.as_deref())
					.await?;

				Ok(SyncOutcome::WorkerBusy)
			}
			Err(e) => {
				let status = if e.kind() == ErrorKind::Authorization {
					SyncStatus::AuthRequired
				} else {
					SyncStatus::Error
				};

				self.record_failure(account_id, status, &e).await;

				Err(SyncError::Cycle {
					account_id: account_id.to_owned(),
					source: e,
				})
			}
		}
	}

	async fn record_failure(
		&self,
		account_id: &str,
		status: SyncStatus,
		error: &(dyn std::error::Error + Send + Sync),
	) {
		let message = ErrorChainDisplay(error).to_string();
		tracing::error!(account_id, ?status, "Sync failed: {message}");

		if let Err(e) = self
			.store
			.save_status(account_id, status, Some(&message))
			.await
		{
			tracing::error!(
				account_id,
				"Failed to record the sync failure: {}",
				ErrorChainDisplay(&e)
			);
		}
	}

	/// Runs the cycle(s) of a single sync. Returns `None` if there was nothing to fetch
	async fn run_strategy(
		&self,
		account: &Account,
		config: &SyncConfig,
		mailbox: &str,
	) -> Result<Option<SyncReport>, CycleError> {
		let now = Utc::now();

		let token = config
			.last_history_id
			.as_deref()
			.filter(|token| account.exposes_change_token() && !token.is_empty());

		let Some(token) = token else {
			let start = config
				.last_sync_end_time
				.unwrap_or_else(|| ago(now, self.config.initial_window));

			return self
				.sync_window(account, config, mailbox, start, now, config.last_history_id.clone())
				.await;
		};

		let cursor = Cursor::HistoryId(token.to_owned());
		let res = self
			.pool
			.sync_mailbox(mailbox, &cursor, &config.folders, account.uses_oauth2)
			.await;

		match res {
			Ok(cycle) => {
				let last_history_id = match &cycle.next_cursor {
					Some(Cursor::HistoryId(next)) => Some(next.clone()),
					_ => Some(token.to_owned()),
				};

				Ok(Some(report(
					cursor,
					&cycle,
					SyncProgress {
						last_sync_time: Some(now),
						last_sync_end_time: Some(now),
						last_history_id,
					},
				)))
			}
			Err(CycleError::Fetch {
				source: FetchError::CursorInvalidated { token: stale },
				..
			}) => {
				tracing::warn!(
					"Change token {stale:?} has been invalidated, falling back to a full resync"
				);

				let cleared = SyncProgress {
					last_history_id: None,
					..config.progress()
				};
				if let Err(e) = self.store.save_progress(&config.account_id, &cleared).await {
					// the token will be rejected again and cleared next time
					tracing::error!(
						"Failed to clear the invalidated change token: {}",
						ErrorChainDisplay(&e)
					);
				}

				let start = ago(now, self.config.full_resync_window);
				self.sync_window(account, config, mailbox, start, now, None)
					.await
			}
			Err(e) => Err(e),
		}
	}

	/// Fetches the time window `[start, now - safety_skew]`, if it's not empty.
	///
	/// Keeps `last_history_id` unless the fetch returns a new token
	async fn sync_window(
		&self,
		account: &Account,
		config: &SyncConfig,
		mailbox: &str,
		start: DateTime<Utc>,
		now: DateTime<Utc>,
		last_history_id: Option<String>,
	) -> Result<Option<SyncReport>, CycleError> {
		let end = ago(now, self.config.safety_skew);

		if end <= start {
			tracing::debug!("Time window is empty, nothing to sync yet");
			return Ok(None);
		}

		let cursor = Cursor::TimeWindow { start, end };
		let cycle = self
			.pool
			.sync_mailbox(mailbox, &cursor, &config.folders, account.uses_oauth2)
			.await?;

		let (covered_end, last_history_id) = match &cycle.next_cursor {
			// never past what was asked for, never before the start
			Some(Cursor::TimeWindow { end: covered, .. }) => {
				((*covered).max(start).min(end), last_history_id)
			}
			Some(Cursor::HistoryId(token)) => (end, Some(token.clone())),
			None => (end, last_history_id),
		};

		Ok(Some(report(
			cursor,
			&cycle,
			SyncProgress {
				last_sync_time: Some(start),
				last_sync_end_time: Some(covered_end),
				last_history_id,
			},
		)))
	}
}

/// `now - dur`, saturating at the earliest representable time
fn ago(now: DateTime<Utc>, dur: Duration) -> DateTime<Utc> {
	chrono::Duration::from_std(dur)
		.ok()
		.and_then(|dur| now.checked_sub_signed(dur))
		.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn report(cursor: Cursor, cycle: &CycleReport, progress: SyncProgress) -> SyncReport {
	SyncReport {
		cursor,
		fetched: cycle.fetched,
		matched: cycle.matched,
		progress,
		recovered: false,
	}
}

async fn account_loop<F, T, S>(
	inner: Weak<SyncInner<F, T, S>>,
	account_id: String,
	interval: Duration,
	jitter: Duration,
	mut shutdown: Shutdown,
	resume: Arc<Notify>,
) where
	F: Fetch,
	T: TokenSource,
	S: SyncStore,
{
	tracing::debug!("First sync in {}ms", jitter.as_millis());
	select! {
		() = sleep(jitter) => (),
		() = shutdown.wait() => return,
	}

	let mut consecutive_failures = 0;

	loop {
		if shutdown.is_signaled() {
			break;
		}

		let Some(sync) = inner.upgrade() else {
			break;
		};

		let outcome = sync.sync_account(&account_id, Trigger::Scheduled).await;
		let paused = match &outcome {
			Ok(SyncOutcome::Synced(_) | SyncOutcome::UpToDate) => {
				consecutive_failures = 0;
				false
			}
			Ok(SyncOutcome::Paused) => true,
			Ok(SyncOutcome::AlreadyRunning | SyncOutcome::WorkerBusy | SyncOutcome::Disabled) => {
				false
			}
			Err(e) => {
				consecutive_failures += 1;
				e.kind() == ErrorKind::Authorization
			}
		};
		let delay = sync.backoff.next_delay(interval, consecutive_failures);
		drop(sync);

		if paused {
			tracing::warn!("Scheduled syncs paused until the account is re-authorized");

			select! {
				() = resume.notified() => consecutive_failures = 0,
				() = shutdown.wait() => break,
			}
		}

		select! {
			() = sleep(delay) => (),
			() = shutdown.wait() => break,
		}
	}

	tracing::debug!("Account sync loop stopped");
}

/// Signals every loop and waits for all of them, aborting the ones still running after `deadline`
async fn stop_loops(loops: Vec<AccountLoop>, deadline: Duration) {
	let mut tasks = loops
		.into_iter()
		.map(|account_loop| {
			account_loop.shutdown.signal();
			account_loop.task
		})
		.collect::<FuturesUnordered<_>>();

	// finished loops leave the set, only the ones still running are left on timeout
	let graceful = timeout(deadline, async {
		while let Some(res) = tasks.next().await {
			log_loop_result(res);
		}
	})
	.await;

	if graceful.is_err() {
		tracing::warn!(
			"{} account sync(s) didn't stop within {}s, aborting",
			tasks.len(),
			deadline.as_secs()
		);

		for task in &tasks {
			task.abort();
		}

		// an aborted task finishes at its next suspension point
		while tasks.next().await.is_some() {}
	}
}

fn log_loop_result(res: Result<(), JoinError>) {
	if let Err(e) = res {
		if e.is_panic() {
			tracing::error!("Account sync loop panicked: {e}");
		}
	}
}

/// Marks an account as having a sync in flight, unmarks on drop
struct InFlightGuard<'a> {
	set: &'a Mutex<HashSet<String>>,
	account_id: String,
}

impl<'a> InFlightGuard<'a> {
	/// Returns `None` if a sync of the account is already in flight
	fn try_new(set: &'a Mutex<HashSet<String>>, account_id: &str) -> Option<Self> {
		set.lock().insert(account_id.to_owned()).then(|| Self {
			set,
			account_id: account_id.to_owned(),
		})
	}
}

impl Drop for InFlightGuard<'_> {
	fn drop(&mut self) {
		self.set.lock().remove(&self.account_id);
	}
}

/// Keeps a mailbox pinned in the pool for the duration of a sync
struct PinGuard<'a, F, T>
where
	F: Fetch,
	T: TokenSource,
{
	pool: &'a WorkerPool<F, T>,
	mailbox: &'a str,
}

impl<'a, F, T> PinGuard<'a, F, T>
where
	F: Fetch,
	T: TokenSource,
{
	fn new(pool: &'a WorkerPool<F, T>, mailbox: &'a str) -> Self {
		pool.pin(mailbox);
		Self { pool, mailbox }
	}
}

impl<F, T> Drop for PinGuard<'_, F, T>
where
	F: Fetch,
	T: TokenSource,
{
	fn drop(&mut self) {
		self.pool.unpin(self.mailbox);
	}
}

impl<F, T, S> fmt::Debug for IncrementalSyncManager<F, T, S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("IncrementalSyncManager")
			.field("config", &self.inner.config)
			.field("in_flight", &*self.inner.in_flight.lock())
			.field("loops", &self.inner.loops.lock().len())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn in_flight_guard_is_exclusive() {
		let set = Mutex::new(HashSet::new());

		let guard = InFlightGuard::try_new(&set, "a").expect("nothing in flight");
		assert!(InFlightGuard::try_new(&set, "a").is_none());
		assert!(InFlightGuard::try_new(&set, "b").is_some());

		drop(guard);
		assert!(InFlightGuard::try_new(&set, "a").is_some());
	}
}

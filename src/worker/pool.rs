/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`WorkerPool`]

use std::{
	collections::HashMap,
	fmt,
	mem,
	sync::{
		Arc, Weak,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use chrono::Utc;
use parking_lot::Mutex;
use tap::TapOptional;
use tokio::{
	select,
	sync::mpsc,
	task::JoinSet,
	time::{Instant, MissedTickBehavior, interval_at, sleep, timeout},
};
use tracing::Instrument;

use super::{Worker, state::WorkerState};
use crate::{
	auth::{AuthError, TokenSource},
	config::PoolConfig,
	error::{Classify, ErrorChainDisplay, ErrorKind},
	event::{EmailEvent, EventBus},
	fetch::{Cursor, Fetch, FetchError, FetchRequest},
	shutdown::{Shutdown, ShutdownHandle},
	subscription::SubscriptionManager,
};

/// Keeps at most one fetch worker per real mailbox and drives the [`Fetch`] capability through them.
///
/// A worker is created when its mailbox gets its first reference, either from a subscription ([`acquire`](`Self::acquire`))
/// or from an account loop ([`pin`](`Self::pin`)), and is reclaimed some time after its last reference is gone.
pub struct WorkerPool<F, T> {
	inner: Arc<PoolInner<F, T>>,
}

pub(crate) struct PoolInner<F, T> {
	fetcher: F,
	tokens: T,
	subscriptions: Arc<SubscriptionManager>,
	events: EventBus,
	config: PoolConfig,

	/// real mailbox -> its worker
	workers: Mutex<HashMap<String, Arc<Worker>>>,
	next_worker_id: AtomicU64,

	/// Worker tasks and pending debounced reclamation checks
	tasks: Mutex<JoinSet<()>>,
	closing: ShutdownHandle,
}

/// A [`WorkerPool`] reference that doesn't keep the pool alive
pub(crate) struct WeakWorkerPool<F, T>(Weak<PoolInner<F, T>>);

/// Snapshot of a worker's state
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct WorkerInfo {
	/// Unique for the whole lifetime of the pool. A re-created worker gets a new ID
	pub id: u64,

	#[expect(missing_docs, reason = "self-explanatory")]
	pub mailbox: String,

	#[expect(missing_docs, reason = "self-explanatory")]
	pub fetching: bool,

	/// When the last cycle finished
	pub last_fetch: Option<Instant>,

	/// Live subscriptions of this mailbox
	pub subscriptions: usize,

	/// Account loops syncing this mailbox
	pub sync_refs: usize,
}

/// Result of a successful fetch cycle
#[derive(Clone, Debug)]
pub struct CycleReport {
	/// Messages fetched that weren't delivered before
	pub fetched: usize,

	/// (message, subscription) pairs delivered
	pub matched: usize,

	/// Cursor the fetch returned, see [`FetchBatch::next_cursor`](`crate::FetchBatch::next_cursor`)
	pub next_cursor: Option<Cursor>,
}

#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
	#[error("A fetch of {mailbox} is already in progress")]
	Busy { mailbox: String },

	#[error("No worker is running for {mailbox}")]
	NoWorker { mailbox: String },

	#[error("The worker pool is shutting down")]
	Closed,

	#[error("Failed to get an access token for {mailbox}")]
	Auth {
		mailbox: String,
		#[source]
		source: AuthError,
	},

	#[error("Failed to fetch {mailbox}")]
	Fetch {
		mailbox: String,
		#[source]
		source: FetchError,
	},
}

impl Classify for CycleError {
	fn kind(&self) -> ErrorKind {
		match self {
			Self::Busy { .. } | Self::NoWorker { .. } | Self::Closed => ErrorKind::Transient,
			Self::Auth { source, .. } => source.kind(),
			Self::Fetch { source, .. } => source.kind(),
		}
	}
}

#[bon::bon]
impl<F, T> WorkerPool<F, T>
where
	F: Fetch,
	T: TokenSource,
{
	/// Creates an empty pool
	#[builder]
	pub fn new(
		fetcher: F,
		tokens: T,
		subscriptions: Arc<SubscriptionManager>,
		events: EventBus,
		#[builder(default)] config: PoolConfig,
	) -> Self {
		let (_closing_rx, closing) = Shutdown::new();

		Self {
			inner: Arc::new(PoolInner {
				fetcher,
				tokens,
				subscriptions,
				events,
				config,
				workers: Mutex::new(HashMap::new()),
				next_worker_id: AtomicU64::new(0),
				tasks: Mutex::new(JoinSet::new()),
				closing,
			}),
		}
	}
}

impl<F, T> WorkerPool<F, T>
where
	F: Fetch,
	T: TokenSource,
{
	/// Adds a subscription reference to `mailbox`, starting its worker if there is none
	pub fn acquire(&self, mailbox: &str) {
		self.inner.reference(mailbox, |state| state.subscriptions += 1);
	}

	/// Removes a subscription reference from `mailbox`.
	///
	/// If it was the last reference and the worker is still unreferenced after the unsubscribe debounce,
	/// it's reclaimed once it has been idle for the idle grace.
	pub fn release(&self, mailbox: &str) {
		self.inner
			.unreference(mailbox, |state| state.subscriptions = state.subscriptions.saturating_sub(1));
	}

	/// Adds an account loop reference to `mailbox`, starting its worker if there is none.
	///
	/// A pinned worker doesn't poll on its own timer, the account loop drives it with [`sync_mailbox`](`Self::sync_mailbox`).
	pub fn pin(&self, mailbox: &str) {
		self.inner.reference(mailbox, |state| state.sync_refs += 1);
	}

	/// Removes an account loop reference from `mailbox`. See [`release`](`Self::release`)
	pub fn unpin(&self, mailbox: &str) {
		self.inner
			.unreference(mailbox, |state| state.sync_refs = state.sync_refs.saturating_sub(1));
	}

	/// Asks the worker of `mailbox` to run a cycle on its own cursor right away.
	///
	/// Returns false if there's no such worker or a trigger is already queued.
	pub fn trigger(&self, mailbox: &str) -> bool {
		let Some(worker) = self.inner.workers.lock().get(mailbox).cloned() else {
			return false;
		};

		worker.trigger.try_send(()).is_ok()
	}

	/// Runs a fetch cycle of `mailbox` from `cursor` in the calling task, limited to `folders` (all if empty).
	///
	/// If `requires_oauth2` is set, a mailbox without an access token fails with [`AuthError::ReauthorizationRequired`]
	/// instead of being fetched without one
	///
	/// # Errors
	/// * [`CycleError::Busy`] if a cycle of that mailbox is already running
	/// * [`CycleError::NoWorker`] if the mailbox has no worker
	/// * [`CycleError::Closed`] if the pool is shutting down
	/// * [`CycleError::Auth`] and [`CycleError::Fetch`] if the credential or the fetch itself failed
	pub async fn sync_mailbox(
		&self,
		mailbox: &str,
		cursor: &Cursor,
		folders: &[String],
		requires_oauth2: bool,
	) -> Result<CycleReport, CycleError> {
		let worker = self
			.inner
			.workers
			.lock()
			.get(mailbox)
			.cloned()
			.ok_or_else(|| CycleError::NoWorker {
				mailbox: mailbox.to_owned(),
			})?;

		self.inner
			.run_cycle(&worker, cursor, Some(folders), requires_oauth2)
			.await
	}

	/// Periodically reclaims workers that have been unreferenced and idle for longer than the idle grace, until `shutdown` fires
	pub async fn run_reclaim_loop(&self, mut shutdown: Shutdown) {
		let period = self.inner.config.reclaim_interval;
		let mut ticker = interval_at(Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			if shutdown.is_signaled() {
				break;
			}

			select! {
				_ = ticker.tick() => (),
				() = shutdown.wait() => break,
			}

			let reclaimed = self.inner.sweep(self.inner.config.idle_grace);
			if reclaimed > 0 {
				tracing::debug!("Idle sweep reclaimed {reclaimed} worker(s)");
			}
		}

		tracing::trace!("Idle sweep stopped");
	}

	/// Reclaims the worker of `mailbox` if it's unreferenced, not fetching, and idle for at least `min_idle`.
	///
	/// Returns true if the worker was reclaimed
	pub fn reclaim_if_idle(&self, mailbox: &str, min_idle: Duration) -> bool {
		self.inner.reclaim_if_idle(mailbox, min_idle)
	}

	/// Stops every worker and waits for their tasks to finish, aborting the ones still running after `deadline`.
	///
	/// No worker task outlives this call. The pool can't be used afterwards
	pub async fn shutdown(&self, deadline: Duration) {
		self.inner.closing.signal();

		let workers = mem::take(&mut *self.inner.workers.lock());
		for worker in workers.values() {
			worker.shutdown.signal();
		}
		tracing::debug!("Stopping {} worker(s)", workers.len());

		let mut tasks = mem::take(&mut *self.inner.tasks.lock());
		let graceful = timeout(deadline, async {
			while let Some(res) = tasks.join_next().await {
				log_task_result(res);
			}
		})
		.await;

		if graceful.is_err() {
			tracing::warn!(
				"{} worker task(s) didn't stop within {}s, aborting",
				tasks.len(),
				deadline.as_secs()
			);

			tasks.abort_all();
			while tasks.join_next().await.is_some() {}
		}
	}

	/// Snapshot of every worker, sorted by mailbox
	#[must_use]
	pub fn workers(&self) -> Vec<WorkerInfo> {
		let workers = self.inner.workers.lock();
		let mut infos = workers
			.values()
			.map(|worker| {
				let state = worker.state.lock();
				WorkerInfo {
					id: worker.id,
					mailbox: worker.mailbox.clone(),
					fetching: state.fetching,
					last_fetch: state.last_fetch,
					subscriptions: state.subscriptions,
					sync_refs: state.sync_refs,
				}
			})
			.collect::<Vec<_>>();

		infos.sort_by(|a, b| a.mailbox.cmp(&b.mailbox));
		infos
	}

	/// Snapshot of the worker of `mailbox`
	#[must_use]
	pub fn worker(&self, mailbox: &str) -> Option<WorkerInfo> {
		self.workers().into_iter().find(|info| info.mailbox == mailbox)
	}

	pub(crate) fn downgrade(&self) -> WeakWorkerPool<F, T> {
		WeakWorkerPool(Arc::downgrade(&self.inner))
	}
}

impl<F, T> PoolInner<F, T>
where
	F: Fetch,
	T: TokenSource,
{
	fn reference(self: &Arc<Self>, mailbox: &str, add: impl FnOnce(&mut WorkerState)) {
		if self.closing.is_signaled() {
			tracing::warn!("Tried to reference {mailbox} after the pool has been shut down");
			return;
		}

		let mut workers = self.workers.lock();

		let worker = match workers.get(mailbox) {
			Some(worker) => Arc::clone(worker),
			None => {
				let worker = self.spawn_worker(mailbox);
				workers.insert(mailbox.to_owned(), Arc::clone(&worker));
				worker
			}
		};

		add(&mut worker.state.lock());
	}

	fn unreference(self: &Arc<Self>, mailbox: &str, remove: impl FnOnce(&mut WorkerState)) {
		let became_unreferenced = {
			let workers = self.workers.lock();
			let Some(worker) = workers.get(mailbox) else {
				tracing::warn!("Tried to release {mailbox} that has no worker");
				return;
			};

			let mut state = worker.state.lock();
			let was_referenced = state.is_referenced();
			remove(&mut state);

			if was_referenced && !state.is_referenced() {
				state.idle_since = Instant::now();
				true
			} else {
				false
			}
		};

		if became_unreferenced {
			self.schedule_reclaim_check(mailbox);
		}
	}

	/// Creates a worker and spawns its task. Must be called with the worker map locked
	fn spawn_worker(self: &Arc<Self>, mailbox: &str) -> Arc<Worker> {
		let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
		let (shutdown, shutdown_handle) = Shutdown::new();
		let (trigger_tx, trigger_rx) = mpsc::channel(1);

		let worker = Arc::new(Worker {
			id,
			mailbox: mailbox.to_owned(),
			state: Mutex::new(WorkerState::new(self.config.dedup_window)),
			shutdown: shutdown_handle,
			trigger: trigger_tx,
		});

		tracing::info!(worker_id = id, mailbox, "Starting worker");

		let task = worker_loop(
			Arc::downgrade(self),
			Arc::clone(&worker),
			shutdown,
			trigger_rx,
			self.config.poll_interval,
		)
		.instrument(tracing::info_span!("worker", mailbox));

		self.spawn_task(task);
		worker
	}

	fn spawn_task(&self, task: impl Future<Output = ()> + Send + 'static) {
		let mut tasks = self.tasks.lock();

		// reap finished tasks
		while let Some(res) = tasks.try_join_next() {
			log_task_result(res);
		}

		tasks.spawn(task);
	}

	fn schedule_reclaim_check(self: &Arc<Self>, mailbox: &str) {
		if self.closing.is_signaled() {
			return;
		}

		let pool = Arc::downgrade(self);
		let mailbox = mailbox.to_owned();
		let debounce = self.config.unsubscribe_debounce;
		let idle_grace = self.config.idle_grace;
		let mut closing = self.closing.subscribe();

		tracing::trace!("Checking {mailbox} for reclamation in {}s", debounce.as_secs());

		self.spawn_task(async move {
			let check = async {
				sleep(debounce).await;

				// still unreferenced, let it age out under the idle grace
				let remaining = pool.upgrade()?.grace_remaining(&mailbox, idle_grace)?;
				tracing::trace!("{mailbox} is unreferenced, reclaiming in {}s", remaining.as_secs());
				sleep(remaining).await;

				pool.upgrade()?
					.reclaim_if_idle(&mailbox, idle_grace)
					.then_some(())
			};

			select! {
				_ = check => (),
				() = closing.wait() => (),
			}
		});
	}

	/// How much of `idle_grace` the worker of `mailbox` has left, or `None` if it's gone, referenced, or fetching
	fn grace_remaining(&self, mailbox: &str, idle_grace: Duration) -> Option<Duration> {
		let workers = self.workers.lock();
		let state = workers.get(mailbox)?.state.lock();
		if state.is_referenced() || state.fetching {
			return None;
		}

		let idle = Instant::now().saturating_duration_since(state.idle_since);
		Some(idle_grace.saturating_sub(idle))
	}

	fn reclaim_if_idle(&self, mailbox: &str, min_idle: Duration) -> bool {
		let mut workers = self.workers.lock();
		let Some(worker) = workers.get(mailbox) else {
			return false;
		};

		if !worker.state.lock().is_reclaimable(Instant::now(), min_idle) {
			return false;
		}

		if let Some(worker) = workers.remove(mailbox) {
			worker.shutdown.signal();
			tracing::info!(worker_id = worker.id, mailbox, "Reclaimed idle worker");
		}

		true
	}

	/// Reclaims every worker idle for at least `min_idle`. Returns how many were reclaimed
	fn sweep(&self, min_idle: Duration) -> usize {
		let now = Instant::now();
		let mut workers = self.workers.lock();

		let before = workers.len();
		workers.retain(|mailbox, worker| {
			if worker.state.lock().is_reclaimable(now, min_idle) {
				worker.shutdown.signal();
				tracing::info!(worker_id = worker.id, %mailbox, "Reclaimed idle worker");
				false
			} else {
				true
			}
		});

		before - workers.len()
	}

	/// Marks the worker as fetching if it's still the worker of its mailbox and isn't fetching already
	fn begin_fetch(&self, worker: &Arc<Worker>) -> Result<FetchGuard, CycleError> {
		if self.closing.is_signaled() {
			return Err(CycleError::Closed);
		}

		let workers = self.workers.lock();
		let is_current = workers
			.get(&worker.mailbox)
			.is_some_and(|current| Arc::ptr_eq(current, worker));

		if !is_current {
			return Err(CycleError::NoWorker {
				mailbox: worker.mailbox.clone(),
			});
		}

		let mut state = worker.state.lock();
		if state.fetching {
			return Err(CycleError::Busy {
				mailbox: worker.mailbox.clone(),
			});
		}

		state.fetching = true;

		Ok(FetchGuard {
			worker: Arc::clone(worker),
		})
	}

	/// Runs a single fetch cycle.
	///
	/// `folders` overrides the folder scope derived from the mailbox's subscriptions
	async fn run_cycle(
		&self,
		worker: &Arc<Worker>,
		cursor: &Cursor,
		folders: Option<&[String]>,
		requires_oauth2: bool,
	) -> Result<CycleReport, CycleError> {
		let _guard = self.begin_fetch(worker)?;
		let mailbox = worker.mailbox.as_str();

		tracing::debug!(?cursor, "Fetch cycle started");
		self.events.emit(EmailEvent::fetch_start(mailbox));

		let res = self
			.fetch_and_deliver(worker, cursor, folders, requires_oauth2)
			.await;

		match &res {
			Ok(report) => {
				tracing::debug!(
					fetched = report.fetched,
					matched = report.matched,
					"Fetch cycle finished"
				);
				self.events.emit(EmailEvent::fetch_complete(
					mailbox,
					report.fetched,
					report.matched,
				));
			}
			Err(e) => {
				tracing::warn!("{}", ErrorChainDisplay(e));
				self.events.emit(EmailEvent::fetch_error(
					mailbox,
					ErrorChainDisplay(e).to_string(),
				));
			}
		}

		res
	}

	async fn fetch_and_deliver(
		&self,
		worker: &Worker,
		cursor: &Cursor,
		folders: Option<&[String]>,
		requires_oauth2: bool,
	) -> Result<CycleReport, CycleError> {
		let mailbox = worker.mailbox.as_str();
		let auth_error = |source| CycleError::Auth {
			mailbox: mailbox.to_owned(),
			source,
		};

		let credential = self
			.tokens
			.access_token(mailbox)
			.await
			.map_err(auth_error)?
			.tap_none(|| tracing::trace!("No access token"));

		if requires_oauth2 && credential.is_none() {
			return Err(auth_error(AuthError::ReauthorizationRequired {
				mailbox: mailbox.to_owned(),
			}));
		}

		let scope;
		let folders = match folders {
			Some(folders) => folders,
			None => {
				scope = self.subscriptions.folder_scope(mailbox);
				&scope
			}
		};

		let batch = self
			.fetcher
			.fetch(FetchRequest {
				mailbox,
				folders,
				cursor,
				credential: credential.as_ref(),
			})
			.await
			.map_err(|source| CycleError::Fetch {
				mailbox: mailbox.to_owned(),
				source,
			})?;

		let total = batch.messages.len();
		let fresh = {
			let mut state = worker.state.lock();
			batch
				.messages
				.into_iter()
				.filter(|msg| state.recent.insert(&msg.id))
				.collect::<Vec<_>>()
		};

		if fresh.len() < total {
			tracing::trace!(
				"Skipped {} already delivered message(s)",
				total - fresh.len()
			);
		}

		let fetched = fresh.len();
		let mut matched = 0;
		for message in fresh {
			let subs = self.subscriptions.match_message(mailbox, &message);
			if subs.is_empty() {
				continue;
			}

			let message = Arc::new(message);
			for sub in subs {
				matched += 1;
				self.events
					.emit(EmailEvent::new_email(mailbox, sub.id, Arc::clone(&message)));
			}
		}

		Ok(CycleReport {
			fetched,
			matched,
			next_cursor: batch.next_cursor,
		})
	}

	/// A cycle on the worker's own time window cursor, driven by its timer or a trigger
	async fn run_own_cycle(&self, worker: &Arc<Worker>) -> Result<CycleReport, CycleError> {
		let requested_end = Utc::now();
		let cursor = Cursor::TimeWindow {
			start: worker.state.lock().own_since,
			end: requested_end,
		};

		let report = self.run_cycle(worker, &cursor, None, false).await?;

		let covered_end = match &report.next_cursor {
			Some(Cursor::TimeWindow { end, .. }) => (*end).min(requested_end),
			_ => requested_end,
		};
		worker.state.lock().own_since = covered_end;

		Ok(report)
	}
}

impl<F, T> WeakWorkerPool<F, T> {
	pub(crate) fn upgrade(&self) -> Option<WorkerPool<F, T>> {
		self.0.upgrade().map(|inner| WorkerPool { inner })
	}
}

/// Clears the fetching flag and stamps the last fetch time on drop, no matter how the cycle ended
struct FetchGuard {
	worker: Arc<Worker>,
}

impl Drop for FetchGuard {
	fn drop(&mut self) {
		let now = Instant::now();
		let mut state = self.worker.state.lock();

		state.fetching = false;
		state.last_fetch = Some(now);
		if !state.is_referenced() {
			state.idle_since = now;
		}
	}
}

async fn worker_loop<F, T>(
	pool: Weak<PoolInner<F, T>>,
	worker: Arc<Worker>,
	mut shutdown: Shutdown,
	mut trigger: mpsc::Receiver<()>,
	poll_interval: Duration,
) where
	F: Fetch,
	T: TokenSource,
{
	let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		if shutdown.is_signaled() {
			break;
		}

		select! {
			() = shutdown.wait() => break,
			_ = ticker.tick() => {
				if !worker.state.lock().wants_poll() {
					continue;
				}
			}
			Some(()) = trigger.recv() => tracing::trace!("Triggered"),
		}

		let Some(pool) = pool.upgrade() else {
			break;
		};

		match pool.run_own_cycle(&worker).await {
			Ok(_) => (),
			Err(CycleError::Busy { .. }) => {
				tracing::debug!("Skipped a cycle, the previous one is still running");
			}
			Err(CycleError::NoWorker { .. } | CycleError::Closed) => break,
			// already logged and reported
			Err(_) => (),
		}
	}

	tracing::info!(worker_id = worker.id, "Worker stopped");
}

fn log_task_result(res: Result<(), tokio::task::JoinError>) {
	if let Err(e) = res {
		if e.is_panic() {
			tracing::error!("A worker pool task panicked: {e}");
		}
	}
}

impl<F, T> Clone for WorkerPool<F, T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<F, T> fmt::Debug for WorkerPool<F, T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkerPool")
			.field("workers", &self.inner.workers.lock().len())
			.field("config", &self.inner.config)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use assert_matches::assert_matches;

	use super::*;
	use crate::{
		event::EmailEventKind,
		fetch::FetchBatch,
		filter::EmailFilter,
		message::EmailMessage,
		subscription::{SubscribeRequest, SubscriptionKind},
	};

	/// Returns the same message on every fetch and counts the calls
	#[derive(Default)]
	struct Repeating {
		calls: AtomicUsize,
	}

	impl Fetch for Repeating {
		async fn fetch(&self, _request: FetchRequest<'_>) -> Result<FetchBatch, FetchError> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			Ok(FetchBatch {
				messages: vec![
					EmailMessage::builder()
						.id("m1")
						.to("a@gmail.com")
						.build(),
				],
				next_cursor: None,
			})
		}
	}

	fn pool() -> (WorkerPool<Arc<Repeating>, ()>, Arc<Repeating>, EventBus) {
		let fetcher = Arc::new(Repeating::default());
		let events = EventBus::new(64);
		let subscriptions = Arc::new(SubscriptionManager::default());
		subscriptions
			.subscribe(
				SubscribeRequest::builder(SubscriptionKind::Poll)
					.filter(EmailFilter::builder().address("a@gmail.com").build())
					.build(),
			)
			.expect("valid request");

		let pool = WorkerPool::builder()
			.fetcher(Arc::clone(&fetcher))
			.tokens(())
			.subscriptions(subscriptions)
			.events(events.clone())
			// keep debounced checks out of the way, they're covered by the integration tests
			.config(
				PoolConfig::builder()
					.unsubscribe_debounce(Duration::from_secs(60 * 60))
					.build(),
			)
			.build();

		(pool, fetcher, events)
	}

	fn window() -> Cursor {
		let now = Utc::now();
		Cursor::TimeWindow {
			start: now - chrono::Duration::hours(1),
			end: now,
		}
	}

	#[tokio::test]
	async fn one_worker_per_mailbox() {
		let (pool, _, _) = pool();

		pool.acquire("a@gmail.com");
		pool.acquire("a@gmail.com");
		pool.pin("a@gmail.com");

		let workers = pool.workers();
		assert_eq!(workers.len(), 1);
		assert_eq!(workers[0].subscriptions, 2);
		assert_eq!(workers[0].sync_refs, 1);

		pool.shutdown(Duration::from_secs(1)).await;
	}

	#[tokio::test]
	async fn sync_without_worker_fails() {
		let (pool, _, _) = pool();

		assert_matches!(
			pool.sync_mailbox("a@gmail.com", &window(), &[], false).await,
			Err(CycleError::NoWorker { .. })
		);
	}

	#[tokio::test]
	async fn delivered_messages_are_not_delivered_again() {
		let (pool, fetcher, events) = pool();
		let mut rx = events.subscribe();
		pool.pin("a@gmail.com");

		let first = pool
			.sync_mailbox("a@gmail.com", &window(), &[], false)
			.await
			.expect("fetch succeeds");
		let second = pool
			.sync_mailbox("a@gmail.com", &window(), &[], false)
			.await
			.expect("fetch succeeds");

		assert_eq!((first.fetched, first.matched), (1, 1));
		assert_eq!((second.fetched, second.matched), (0, 0));
		assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

		let mut new_emails = 0;
		while let Ok(event) = rx.try_recv() {
			if let EmailEventKind::NewEmail { .. } = event.kind {
				new_emails += 1;
			}
		}
		assert_eq!(new_emails, 1);

		pool.shutdown(Duration::from_secs(1)).await;
	}

	#[tokio::test]
	async fn fetch_guard_clears_flag() {
		let (pool, _, _) = pool();
		pool.pin("a@gmail.com");

		pool.sync_mailbox("a@gmail.com", &window(), &[], false)
			.await
			.expect("fetch succeeds");

		let info = pool.worker("a@gmail.com").expect("worker exists");
		assert!(!info.fetching);
		assert!(info.last_fetch.is_some());

		pool.shutdown(Duration::from_secs(1)).await;
	}

	#[tokio::test(start_paused = true)]
	async fn sweep_respects_idle_grace() {
		let (pool, _, _) = pool();
		pool.pin("a@gmail.com");
		pool.unpin("a@gmail.com");

		let grace = Duration::from_secs(300);
		assert!(!pool.reclaim_if_idle("a@gmail.com", grace));

		tokio::time::advance(grace).await;
		assert!(pool.reclaim_if_idle("a@gmail.com", grace));
		assert!(pool.workers().is_empty());

		pool.shutdown(Duration::from_secs(1)).await;
	}

	#[tokio::test]
	async fn closed_pool_refuses_cycles() {
		let (pool, _, _) = pool();
		pool.pin("a@gmail.com");
		pool.shutdown(Duration::from_secs(1)).await;

		assert!(pool.workers().is_empty());
		assert_matches!(
			pool.sync_mailbox("a@gmail.com", &window(), &[], false).await,
			Err(CycleError::NoWorker { .. })
		);
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`EmailFetchScheduler`] that ties subscriptions to fetch workers

use std::{fmt, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::{
	select,
	task::JoinSet,
	time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tracing::Instrument;

use crate::{
	auth::TokenSource,
	config::{PoolConfig, SchedulerConfig},
	error::HookError,
	event::{EmailEvent, EventBus},
	fetch::Fetch,
	shutdown::{Shutdown, ShutdownHandle},
	subscription::{
		SubscribeRequest, Subscription, SubscriptionError, SubscriptionId, SubscriptionListener,
		SubscriptionManager, UnsubscribeReason,
	},
	worker::{WorkerPool, pool::WeakWorkerPool},
};

/// Mailbox reported in the events of broadcast subscriptions which aren't tied to any mailbox
pub const BROADCAST_MAILBOX: &str = "*";

/// Owns the [`SubscriptionManager`], the [`WorkerPool`], and the [`EventBus`],
/// keeps a worker running for every mailbox with live subscriptions, and runs the cleanup loops.
pub struct EmailFetchScheduler<F, T> {
	subscriptions: Arc<SubscriptionManager>,
	pool: WorkerPool<F, T>,
	events: EventBus,
	config: SchedulerConfig,
	running: Mutex<Option<Running>>,
}

/// Background loops of a started scheduler
struct Running {
	shutdown: ShutdownHandle,
	tasks: JoinSet<()>,
}

/// Starts and stops workers as subscriptions come and go
struct PoolLifecycle<F, T> {
	pool: WeakWorkerPool<F, T>,
	events: EventBus,
}

#[bon::bon]
impl<F, T> EmailFetchScheduler<F, T>
where
	F: Fetch,
	T: TokenSource,
{
	/// Creates a scheduler and its worker pool
	#[builder]
	pub fn new(
		fetcher: F,
		tokens: T,
		#[builder(default = Arc::new(SubscriptionManager::default()))] subscriptions: Arc<
			SubscriptionManager,
		>,
		#[builder(default = EventBus::new(crate::config::EngineConfig::DEFAULT_EVENT_CAPACITY))]
		events: EventBus,
		#[builder(default)] pool_config: PoolConfig,
		#[builder(default)] config: SchedulerConfig,
	) -> Self {
		let pool = WorkerPool::builder()
			.fetcher(fetcher)
			.tokens(tokens)
			.subscriptions(Arc::clone(&subscriptions))
			.events(events.clone())
			.config(pool_config)
			.build();

		subscriptions.add_listener(Arc::new(PoolLifecycle {
			pool: pool.downgrade(),
			events: events.clone(),
		}));

		Self {
			subscriptions,
			pool,
			events,
			config,
			running: Mutex::new(None),
		}
	}
}

impl<F, T> EmailFetchScheduler<F, T>
where
	F: Fetch,
	T: TokenSource,
{
	/// Spawns the idle worker sweep and the subscription expiry sweep. Does nothing if they are already running
	pub fn start(&self) {
		let mut running = self.running.lock();
		if running.is_some() {
			return;
		}

		let (shutdown, shutdown_handle) = Shutdown::new();

		let mut tasks = JoinSet::new();

		let pool = self.pool.clone();
		let reclaim_shutdown = shutdown.clone();
		tasks.spawn(
			async move { pool.run_reclaim_loop(reclaim_shutdown).await }.in_current_span(),
		);

		tasks.spawn(
			expiry_loop(
				Arc::clone(&self.subscriptions),
				self.config.expiry_sweep_interval,
				shutdown,
			)
			.in_current_span(),
		);

		*running = Some(Running {
			shutdown: shutdown_handle,
			tasks,
		});

		tracing::info!("Scheduler started");
	}

	/// Stops the cleanup loops and every worker. In-flight fetches get the shutdown deadline to finish.
	///
	/// Returns once no background task of the scheduler is left
	pub async fn stop(&self) {
		let running = self.running.lock().take();
		let deadline = self.config.shutdown_deadline;

		if let Some(Running { shutdown, mut tasks }) = running {
			shutdown.signal();

			let graceful = timeout(deadline, async {
				while tasks.join_next().await.is_some() {}
			})
			.await;

			if graceful.is_err() {
				tracing::warn!("Cleanup loops didn't stop in time, aborting");
				tasks.abort_all();
				while tasks.join_next().await.is_some() {}
			}
		}

		self.pool.shutdown(deadline).await;
		tracing::info!("Scheduler stopped");
	}

	/// See [`SubscriptionManager::subscribe`]
	///
	/// # Errors
	/// See [`SubscriptionManager::subscribe`]
	pub fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, SubscriptionError> {
		self.subscriptions.subscribe(request)
	}

	/// See [`SubscriptionManager::unsubscribe`]
	///
	/// # Errors
	/// See [`SubscriptionManager::unsubscribe`]
	pub fn unsubscribe(&self, id: SubscriptionId) -> Result<Subscription, SubscriptionError> {
		self.subscriptions.unsubscribe(id)
	}

	/// Asks the worker of `mailbox` to fetch right away. See [`WorkerPool::trigger`]
	pub fn trigger(&self, mailbox: &str) -> bool {
		self.pool.trigger(mailbox)
	}

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
		&self.subscriptions
	}

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn pool(&self) -> &WorkerPool<F, T> {
		&self.pool
	}

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn events(&self) -> &EventBus {
		&self.events
	}
}

async fn expiry_loop(
	subscriptions: Arc<SubscriptionManager>,
	period: std::time::Duration,
	mut shutdown: Shutdown,
) {
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

		let expired = subscriptions.expire_due(Utc::now());
		if !expired.is_empty() {
			tracing::debug!("Expired {} subscription(s)", expired.len());
		}
	}

	tracing::trace!("Expiry sweep stopped");
}

impl<F, T> PoolLifecycle<F, T>
where
	F: Fetch,
	T: TokenSource,
{
	fn pool(&self) -> Result<WorkerPool<F, T>, HookError> {
		self.pool
			.upgrade()
			.ok_or_else(|| HookError::from("worker pool has already been dropped"))
	}

	fn released(&self, sub: &Subscription, reason: UnsubscribeReason) -> Result<(), HookError> {
		let mailbox = match &sub.real_mailbox {
			Some(mailbox) => {
				self.pool()?.release(mailbox);
				mailbox.as_str()
			}
			None => BROADCAST_MAILBOX,
		};

		self.events
			.emit(EmailEvent::unsubscribed(mailbox, sub.id, reason));
		Ok(())
	}
}

impl<F, T> SubscriptionListener for PoolLifecycle<F, T>
where
	F: Fetch,
	T: TokenSource,
{
	fn on_subscribe(&self, sub: &Subscription) -> Result<(), HookError> {
		let mailbox = match &sub.real_mailbox {
			Some(mailbox) => {
				self.pool()?.acquire(mailbox);
				mailbox.as_str()
			}
			None => BROADCAST_MAILBOX,
		};

		self.events.emit(EmailEvent::subscribed(mailbox, sub.id));
		Ok(())
	}

	fn on_unsubscribe(&self, sub: &Subscription, reason: UnsubscribeReason) -> Result<(), HookError> {
		self.released(sub, reason)
	}

	fn on_expire(&self, sub: &Subscription) -> Result<(), HookError> {
		self.released(sub, UnsubscribeReason::Expired)
	}
}

impl<F, T> fmt::Debug for EmailFetchScheduler<F, T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EmailFetchScheduler")
			.field("subscriptions", &self.subscriptions)
			.field("pool", &self.pool)
			.field("config", &self.config)
			.field("running", &self.running.lock().is_some())
			.finish_non_exhaustive()
	}
}

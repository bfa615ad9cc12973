/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`Engine`], the single entry point of the library

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
	alias::{AliasResolver, TaggedAliasResolver},
	auth::TokenSource,
	config::EngineConfig,
	event::{EmailEvent, EventBus},
	fetch::Fetch,
	scheduler::EmailFetchScheduler,
	store::SyncStore,
	subscription::{
		SubscribeRequest, Subscription, SubscriptionError, SubscriptionId, SubscriptionManager,
	},
	sync::{
		IncrementalSyncManager, SyncBackoff, SyncConfig, SyncError, SyncOutcome,
		backoff::FixedInterval,
	},
	worker::{WorkerInfo, WorkerPool},
};

/// Bundles the [`EmailFetchScheduler`] and the [`IncrementalSyncManager`] behind a single lifecycle.
///
/// Both share the same [`WorkerPool`], so a mailbox that is both subscribed to and synced
/// is only ever fetched by one worker.
///
/// ```no_run
/// # use mailsub::{Engine, EngineConfig, store::MemoryStore};
/// # async fn run(fetcher: impl mailsub::Fetch) -> Result<(), Box<dyn std::error::Error>> {
/// let engine = Engine::builder()
/// 	.fetcher(fetcher)
/// 	.tokens(())
/// 	.store(MemoryStore::new())
/// 	.config(EngineConfig::default())
/// 	.build();
///
/// let mut events = engine.events();
/// engine.start().await?;
///
/// while let Ok(event) = events.recv().await {
/// 	println!("{event:?}");
/// }
///
/// engine.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Engine<F, T, S> {
	scheduler: EmailFetchScheduler<F, T>,
	sync: IncrementalSyncManager<F, T, S>,
	events: EventBus,
	config: EngineConfig,
}

#[bon::bon]
impl<F, T, S> Engine<F, T, S>
where
	F: Fetch,
	T: TokenSource,
	S: SyncStore,
{
	/// Creates an engine. Nothing runs until [`start`](`Self::start`)
	#[builder]
	pub fn new(
		fetcher: F,
		tokens: T,
		store: S,
		#[builder(default)] config: EngineConfig,
		#[builder(default = Box::new(TaggedAliasResolver::new()))] resolver: Box<
			dyn AliasResolver,
		>,
		#[builder(default = Box::new(FixedInterval))] backoff: Box<dyn SyncBackoff>,
	) -> Self {
		let events = EventBus::new(config.event_capacity);

		let scheduler = EmailFetchScheduler::builder()
			.fetcher(fetcher)
			.tokens(tokens)
			.subscriptions(Arc::new(SubscriptionManager::new(resolver)))
			.events(events.clone())
			.pool_config(config.pool.clone())
			.config(config.scheduler.clone())
			.build();

		let sync = IncrementalSyncManager::builder()
			.store(store)
			.pool(scheduler.pool().clone())
			.config(config.sync.clone())
			.backoff(backoff)
			.build();

		Self {
			scheduler,
			sync,
			events,
			config,
		}
	}
}

impl<F, T, S> Engine<F, T, S>
where
	F: Fetch,
	T: TokenSource,
	S: SyncStore,
{
	/// Starts the cleanup loops and a sync loop for every enabled account
	///
	/// # Errors
	/// If the enabled accounts couldn't be read from the store. The scheduler is stopped again in that case
	pub async fn start(&self) -> Result<(), SyncError> {
		self.scheduler.start();

		if let Err(e) = self.sync.start().await {
			self.scheduler.stop().await;
			return Err(e);
		}

		tracing::info!("Engine started");
		Ok(())
	}

	/// Stops the account loops first, then the scheduler and its workers.
	///
	/// Returns once no background task is left
	pub async fn stop(&self) {
		self.sync.stop(self.config.sync.shutdown_deadline).await;
		self.scheduler.stop().await;
		tracing::info!("Engine stopped");
	}

	/// See [`SubscriptionManager::subscribe`]
	///
	/// # Errors
	/// See [`SubscriptionManager::subscribe`]
	pub fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, SubscriptionError> {
		self.scheduler.subscribe(request)
	}

	/// See [`SubscriptionManager::unsubscribe`]
	///
	/// # Errors
	/// See [`SubscriptionManager::unsubscribe`]
	pub fn unsubscribe(&self, id: SubscriptionId) -> Result<Subscription, SubscriptionError> {
		self.scheduler.unsubscribe(id)
	}

	/// See [`IncrementalSyncManager::trigger_sync`]
	///
	/// # Errors
	/// See [`IncrementalSyncManager::trigger_sync`]
	pub async fn trigger_sync(&self, account_id: &str) -> Result<SyncOutcome, SyncError> {
		self.sync.trigger_sync(account_id).await
	}

	/// Asks the worker of a subscribed mailbox to fetch right away. See [`WorkerPool::trigger`]
	pub fn trigger_fetch(&self, mailbox: &str) -> bool {
		self.scheduler.trigger(mailbox)
	}

	/// See [`IncrementalSyncManager::add_account`]
	///
	/// # Errors
	/// See [`IncrementalSyncManager::add_account`]
	pub async fn add_account(&self, account_id: &str) -> Result<bool, SyncError> {
		self.sync.add_account(account_id).await
	}

	/// Stops syncing `account_id` and cancels every subscription of its mailbox.
	///
	/// Returns the cancelled subscriptions
	///
	/// # Errors
	/// See [`IncrementalSyncManager::remove_account`]
	pub async fn remove_account(&self, account_id: &str) -> Result<Vec<Subscription>, SyncError> {
		let Some(mailbox) = self.sync.remove_account(account_id).await? else {
			tracing::debug!(account_id, "Tried to remove an unknown account");
			return Ok(Vec::new());
		};

		let cancelled = self.scheduler.subscriptions().cancel_mailbox(&mailbox);
		tracing::info!(
			account_id,
			%mailbox,
			"Account removed, cancelled {} subscription(s)",
			cancelled.len()
		);

		Ok(cancelled)
	}

	/// See [`IncrementalSyncManager::status`]
	///
	/// # Errors
	/// See [`IncrementalSyncManager::status`]
	pub async fn status(&self, account_id: &str) -> Result<Option<SyncConfig>, SyncError> {
		self.sync.status(account_id).await
	}

	/// Receives every [`EmailEvent`] emitted from now on
	#[must_use]
	pub fn events(&self) -> broadcast::Receiver<EmailEvent> {
		self.events.subscribe()
	}

	/// Same as [`events`](`Self::events`) but as a [`Stream`](`futures::Stream`)
	#[must_use]
	pub fn event_stream(&self) -> BroadcastStream<EmailEvent> {
		self.events.stream()
	}

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
		self.scheduler.subscriptions()
	}

	/// Snapshot of every running worker, sorted by mailbox
	#[must_use]
	pub fn workers(&self) -> Vec<WorkerInfo> {
		self.scheduler.pool().workers()
	}

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn pool(&self) -> &WorkerPool<F, T> {
		self.scheduler.pool()
	}

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn scheduler(&self) -> &EmailFetchScheduler<F, T> {
		&self.scheduler
	}

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn sync(&self) -> &IncrementalSyncManager<F, T, S> {
		&self.sync
	}
}

impl<F, T, S> std::fmt::Debug for Engine<F, T, S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine")
			.field("scheduler", &self.scheduler)
			.field("sync", &self.sync)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

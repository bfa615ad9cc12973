/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! `mailsub` polls remote mailboxes on behalf of many subscriptions,
//! delivers newly observed messages to the subscriptions that match them,
//! and keeps each account's resume cursor durable across restarts.
//!
//! The main pieces are:
//! - [`SubscriptionManager`] that owns live subscriptions and matches messages against them
//! - [`WorkerPool`] with exactly one fetch worker per real mailbox
//! - [`EmailFetchScheduler`] that wires the two together and runs the cleanup loops
//! - [`IncrementalSyncManager`] that syncs every account on its own interval and persists its cursor
//! - [`Engine`] that bundles everything behind a single start/stop lifecycle
//!
//! The actual mail protocols, OAuth2 and persistence are consumed through the [`Fetch`],
//! [`TokenSource`] and [`SyncStore`] traits.

pub mod alias;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fetch;
pub mod filter;
pub mod fingerprint;
pub mod message;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod worker;

#[cfg(feature = "scaffold")]
pub mod scaffold;

pub use self::{
	alias::{AliasResolver, TaggedAliasResolver},
	auth::{Credential, StaticTokens, TokenSource},
	config::{EngineConfig, PoolConfig, SchedulerConfig, SyncManagerConfig},
	engine::Engine,
	error::{Classify, ErrorKind},
	event::{EmailEvent, EmailEventKind, EventBus},
	fetch::{Cursor, Fetch, FetchBatch, FetchError, FetchRequest},
	filter::EmailFilter,
	fingerprint::Fingerprint,
	message::EmailMessage,
	scheduler::EmailFetchScheduler,
	shutdown::{Shutdown, ShutdownHandle},
	store::{MemoryStore, SyncStore},
	subscription::{
		SubscribeRequest, Subscription, SubscriptionId, SubscriptionKind, SubscriptionListener,
		SubscriptionManager,
	},
	sync::{IncrementalSyncManager, SyncConfig, SyncOutcome, SyncStatus},
	worker::WorkerPool,
};

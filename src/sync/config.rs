/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Persisted per-account sync state

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::duration_secs;

/// Sync settings and resume position of a single account, as stored in a [`SyncStore`](`crate::SyncStore`)
#[derive(bon::Builder, Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct SyncConfig {
	#[expect(missing_docs, reason = "self-explanatory")]
	#[builder(start_fn, into)]
	pub account_id: String,

	/// Mailbox address of the account
	#[builder(start_fn, into)]
	pub mailbox: String,

	/// Folders to sync. Empty means all of them
	#[builder(field)]
	pub folders: Vec<String>,

	/// How often the account is synced
	#[builder(default = SyncConfig::DEFAULT_INTERVAL)]
	#[serde(with = "duration_secs")]
	pub interval: Duration,

	/// Start of the last successfully synced time window
	pub last_sync_time: Option<DateTime<Utc>>,

	/// Point up to which the mailbox is verified to be synced
	pub last_sync_end_time: Option<DateTime<Utc>>,

	/// Last provider change token, e.g. a Gmail History ID. `None` for IMAP-only accounts
	#[builder(into)]
	pub last_history_id: Option<String>,

	#[expect(missing_docs, reason = "self-explanatory")]
	#[builder(default)]
	pub status: SyncStatus,

	/// Error of the last failed sync, with its source chain
	#[builder(into)]
	pub last_error: Option<String>,

	/// Whether the account is synced on its interval. Manual syncs work either way
	#[builder(default = true)]
	pub auto_sync: bool,
}

impl<S: sync_config_builder::State> SyncConfigBuilder<S> {
	/// Adds a folder to sync
	pub fn folder(mut self, value: impl Into<String>) -> Self {
		self.folders.push(value.into());
		self
	}
}

impl SyncConfig {
	#[expect(missing_docs, reason = "self-explanatory")]
	pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60 /* secs in a min */);

	/// The resume position this config currently stores
	#[must_use]
	pub fn progress(&self) -> SyncProgress {
		SyncProgress {
			last_sync_time: self.last_sync_time,
			last_sync_end_time: self.last_sync_end_time,
			last_history_id: self.last_history_id.clone(),
		}
	}
}

/// State of an account's sync
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, Debug)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	/// Waiting for the next sync
	#[default]
	Idle,

	/// A sync is in progress
	Syncing,

	/// The last sync failed, see [`SyncConfig::last_error`]
	Error,

	/// The account's credentials were revoked or expired.
	/// Scheduled syncs are paused until a manual sync succeeds
	AuthRequired,
}

/// Resume position written after every successful sync
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Default, Debug)]
pub struct SyncProgress {
	/// See [`SyncConfig::last_sync_time`]
	pub last_sync_time: Option<DateTime<Utc>>,

	/// See [`SyncConfig::last_sync_end_time`]
	pub last_sync_end_time: Option<DateTime<Utc>>,

	/// See [`SyncConfig::last_history_id`]
	pub last_history_id: Option<String>,
}

/// A mail account, as known by the store
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Account {
	#[expect(missing_docs, reason = "self-explanatory")]
	pub id: String,

	#[expect(missing_docs, reason = "self-explanatory")]
	pub mailbox: String,

	#[expect(missing_docs, reason = "self-explanatory")]
	pub provider: Provider,

	/// Whether the mailbox is accessed with an OAuth2 token from the [`TokenSource`](`crate::TokenSource`)
	pub uses_oauth2: bool,
}

impl Account {
	/// Whether the provider issues change tokens to resume from
	#[must_use]
	pub fn exposes_change_token(&self) -> bool {
		matches!(self.provider, Provider::Gmail)
	}
}

#[expect(missing_docs, reason = "self-explanatory")]
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
	/// Plain IMAP, resumed by time windows
	Imap,

	/// Gmail API, resumed by History IDs
	Gmail,
}

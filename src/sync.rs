/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Incremental, durable syncing of accounts on their own intervals.
//!
//! Each account resumes from its persisted [`SyncConfig`]: plain IMAP accounts from the end of the last verified time window,
//! accounts whose provider issues change tokens from the last token.

pub mod backoff;
pub mod config;
pub mod manager;

pub use self::{
	backoff::{ExponentialBackoff, FixedInterval, SyncBackoff},
	config::{Account, Provider, SyncConfig, SyncProgress, SyncStatus},
	manager::{IncrementalSyncManager, SyncError, SyncOutcome, SyncReport},
};

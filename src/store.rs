/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`SyncStore`] trait, the read/write contract of the sync state persistence

mod memory;

pub use self::memory::MemoryStore;

use std::{error::Error as StdError, sync::Arc};

use crate::{
	error::{Classify, ErrorKind},
	sync::{Account, SyncConfig, SyncProgress, SyncStatus},
};

/// Persists [`SyncConfig`]s and provides [`Account`]s.
///
/// Every write only ever comes from the single in-flight sync of that account.
pub trait SyncStore: Send + Sync + 'static {
	/// Every config with auto sync enabled
	///
	/// # Errors
	/// If the store couldn't be read
	fn enabled_configs(&self) -> impl Future<Output = Result<Vec<SyncConfig>, StoreError>> + Send;

	/// The config of `account_id`, if it exists
	///
	/// # Errors
	/// If the store couldn't be read
	fn config(
		&self,
		account_id: &str,
	) -> impl Future<Output = Result<Option<SyncConfig>, StoreError>> + Send;

	/// The account `account_id`, if it exists
	///
	/// # Errors
	/// If the store couldn't be read
	fn account(
		&self,
		account_id: &str,
	) -> impl Future<Output = Result<Option<Account>, StoreError>> + Send;

	/// Writes the status and the last error of `account_id`
	///
	/// # Errors
	/// If the store couldn't be written to
	fn save_status(
		&self,
		account_id: &str,
		status: SyncStatus,
		last_error: Option<&str>,
	) -> impl Future<Output = Result<(), StoreError>> + Send;

	/// Writes the resume position of `account_id`
	///
	/// # Errors
	/// If the store couldn't be written to
	fn save_progress(
		&self,
		account_id: &str,
		progress: &SyncProgress,
	) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// An error that happened while reading from or writing to a [`SyncStore`]
#[derive(thiserror::Error, Debug)]
#[error("Failed to access the sync state of account {account_id:?}")]
pub struct StoreError {
	/// Account that was being accessed, if any
	pub account_id: Option<String>,

	#[expect(missing_docs, reason = "self-explanatory")]
	#[source]
	pub source: Box<dyn StdError + Send + Sync>,
}

impl StoreError {
	#[expect(missing_docs, reason = "self-explanatory")]
	pub fn new(account_id: Option<&str>, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
		Self {
			account_id: account_id.map(ToOwned::to_owned),
			source: source.into(),
		}
	}
}

impl Classify for StoreError {
	fn kind(&self) -> ErrorKind {
		ErrorKind::Transient
	}
}

impl<S: SyncStore> SyncStore for Arc<S> {
	async fn enabled_configs(&self) -> Result<Vec<SyncConfig>, StoreError> {
		S::enabled_configs(self).await
	}

	async fn config(&self, account_id: &str) -> Result<Option<SyncConfig>, StoreError> {
		S::config(self, account_id).await
	}

	async fn account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
		S::account(self, account_id).await
	}

	async fn save_status(
		&self,
		account_id: &str,
		status: SyncStatus,
		last_error: Option<&str>,
	) -> Result<(), StoreError> {
		S::save_status(self, account_id, status, last_error).await
	}

	async fn save_progress(
		&self,
		account_id: &str,
		progress: &SyncProgress,
	) -> Result<(), StoreError> {
		S::save_progress(self, account_id, progress).await
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{StoreError, SyncStore};
use crate::sync::{Account, SyncConfig, SyncProgress, SyncStatus};

/// A [`SyncStore`] that keeps everything in memory. Nothing survives a restart
#[derive(Default, Debug)]
pub struct MemoryStore {
	inner: Mutex<Inner>,
}

#[derive(Default, Debug)]
struct Inner {
	accounts: HashMap<String, Account>,
	configs: HashMap<String, SyncConfig>,
}

impl MemoryStore {
	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds (or replaces) an account and its sync config
	pub fn insert(&self, account: Account, config: SyncConfig) {
		let mut inner = self.inner.lock();
		inner.configs.insert(account.id.clone(), config);
		inner.accounts.insert(account.id.clone(), account);
	}

	/// Removes an account and its sync config
	pub fn remove(&self, account_id: &str) -> Option<(Account, SyncConfig)> {
		let mut inner = self.inner.lock();
		let account = inner.accounts.remove(account_id)?;
		let config = inner.configs.remove(account_id)?;

		Some((account, config))
	}

	/// A snapshot of the current config of `account_id`
	#[must_use]
	pub fn snapshot(&self, account_id: &str) -> Option<SyncConfig> {
		self.inner.lock().configs.get(account_id).cloned()
	}

	fn update(
		&self,
		account_id: &str,
		f: impl FnOnce(&mut SyncConfig),
	) -> Result<(), StoreError> {
		let mut inner = self.inner.lock();
		let config = inner
			.configs
			.get_mut(account_id)
			.ok_or_else(|| StoreError::new(Some(account_id), "no such account"))?;

		f(config);
		Ok(())
	}
}

impl SyncStore for MemoryStore {
	async fn enabled_configs(&self) -> Result<Vec<SyncConfig>, StoreError> {
		let mut configs = self
			.inner
			.lock()
			.configs
			.values()
			.filter(|config| config.auto_sync)
			.cloned()
			.collect::<Vec<_>>();

		configs.sort_by(|a, b| a.account_id.cmp(&b.account_id));
		Ok(configs)
	}

	async fn config(&self, account_id: &str) -> Result<Option<SyncConfig>, StoreError> {
		Ok(self.snapshot(account_id))
	}

	async fn account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
		Ok(self.inner.lock().accounts.get(account_id).cloned())
	}

	async fn save_status(
		&self,
		account_id: &str,
		status: SyncStatus,
		last_error: Option<&str>,
	) -> Result<(), StoreError> {
		self.update(account_id, |config| {
			config.status = status;
			config.last_error = last_error.map(ToOwned::to_owned);
		})
	}

	async fn save_progress(
		&self,
		account_id: &str,
		progress: &SyncProgress,
	) -> Result<(), StoreError> {
		self.update(account_id, |config| {
			config.last_sync_time = progress.last_sync_time;
			config.last_sync_end_time = progress.last_sync_end_time;
			config.last_history_id.clone_from(&progress.last_history_id);
		})
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`SubscriptionManager`]

use std::{
	collections::{HashMap, HashSet},
	fmt,
	sync::Arc,
};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};

use super::{
	SubscribeRequest, Subscription, SubscriptionId, SubscriptionKind, SubscriptionListener,
	SubscriptionStatus, UnsubscribeReason, matcher,
};
use crate::{
	alias::{AliasError, AliasResolver, TaggedAliasResolver},
	error::{Classify, ErrorChainDisplay, ErrorKind, HookError},
	fingerprint::{Fingerprint, fingerprint},
	message::EmailMessage,
};

/// Owns every live subscription, resolves their addresses, and matches fetched mail against them
pub struct SubscriptionManager {
	/// Held from a registry change until its lifecycle hooks have run, so hooks see transitions in order
	transitions: Mutex<()>,
	registry: Mutex<Registry>,
	resolver: Box<dyn AliasResolver>,
	listeners: RwLock<Vec<Arc<dyn SubscriptionListener>>>,
}

/// Live (active) subscriptions and their indices
#[derive(Default, Debug)]
struct Registry {
	by_id: HashMap<SubscriptionId, Subscription>,
	by_fingerprint: HashMap<Fingerprint, SubscriptionId>,
	by_mailbox: HashMap<String, HashSet<SubscriptionId>>,
	broadcast: HashSet<SubscriptionId>,
}

#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
	#[error("Invalid subscription request: {reason}")]
	InvalidRequest {
		reason: String,
		#[source]
		source: Option<AliasError>,
	},

	#[error("Subscription {0} doesn't exist")]
	NotFound(SubscriptionId),

	#[error("An identical subscription {existing} already exists")]
	Duplicate {
		existing: SubscriptionId,
		fingerprint: Fingerprint,
	},
}

impl Classify for SubscriptionError {
	fn kind(&self) -> ErrorKind {
		ErrorKind::Configuration
	}
}

impl SubscriptionManager {
	/// Creates a manager resolving addresses with `resolver`
	pub fn new(resolver: impl AliasResolver + 'static) -> Self {
		Self {
			transitions: Mutex::new(()),
			registry: Mutex::new(Registry::default()),
			resolver: Box::new(resolver),
			listeners: RwLock::new(Vec::new()),
		}
	}

	/// Registers a listener. Listeners are invoked in the order they were added
	pub fn add_listener(&self, listener: Arc<dyn SubscriptionListener>) {
		self.listeners.write().push(listener);
	}

	/// Validates and registers a new subscription
	///
	/// # Errors
	/// * [`SubscriptionError::InvalidRequest`] if the address is missing for a kind that needs one or it can't be resolved
	/// * [`SubscriptionError::Duplicate`] if a live subscription with the same fingerprint exists
	pub fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, SubscriptionError> {
		let _transition = self.transitions.lock();
		let res = self.subscribe_impl(request);

		match &res {
			Ok(sub) => {
				tracing::info!(
					id = %sub.id,
					mailbox = sub.real_mailbox.as_deref(),
					fingerprint = %sub.fingerprint,
					"Subscribed"
				);
				self.notify("on_subscribe", |l| l.on_subscribe(sub));
			}
			Err(e) => {
				tracing::warn!("Subscribe request rejected: {}", ErrorChainDisplay(e));
				self.notify("on_error", |l| l.on_error(e));
			}
		}

		res
	}

	fn subscribe_impl(&self, request: SubscribeRequest) -> Result<Subscription, SubscriptionError> {
		let SubscribeRequest {
			kind,
			filter,
			expires_at,
		} = request;

		let real_mailbox = match (kind.requires_address(), filter.target_address()) {
			(true, None) => {
				return Err(SubscriptionError::InvalidRequest {
					reason: format!("{kind:?} subscriptions require an address"),
					source: None,
				});
			}
			(true, Some(address)) => {
				let mailbox = self.resolver.resolve(address).map_err(|e| {
					SubscriptionError::InvalidRequest {
						reason: format!("can't resolve {address:?}"),
						source: Some(e),
					}
				})?;

				Some(mailbox)
			}
			// broadcast subscriptions match mail from every mailbox
			(false, _) => None,
		};

		if let Some(expires_at) = expires_at {
			if expires_at <= Utc::now() {
				return Err(SubscriptionError::InvalidRequest {
					reason: format!("expiry {expires_at} is in the past"),
					source: None,
				});
			}
		}

		let fingerprint = fingerprint(kind, real_mailbox.as_deref(), &filter);

		let mut registry = self.registry.lock();
		if let Some(&existing) = registry.by_fingerprint.get(&fingerprint) {
			return Err(SubscriptionError::Duplicate {
				existing,
				fingerprint,
			});
		}

		let mut sub = Subscription {
			id: SubscriptionId::new_random(),
			kind,
			filter: Arc::new(filter),
			real_mailbox,
			fingerprint,
			status: SubscriptionStatus::Pending,
			created_at: Utc::now(),
			expires_at,
		};

		// validated and unique, nothing can fail past this point
		sub.status = SubscriptionStatus::Active;
		registry.insert(sub.clone());

		Ok(sub)
	}

	/// Removes a subscription at the owner's request
	///
	/// # Errors
	/// [`SubscriptionError::NotFound`] if there's no live subscription with this ID
	pub fn unsubscribe(&self, id: SubscriptionId) -> Result<Subscription, SubscriptionError> {
		let _transition = self.transitions.lock();
		let removed = self.registry.lock().remove(id);

		let Some(mut sub) = removed else {
			let e = SubscriptionError::NotFound(id);
			tracing::debug!("{e}");
			self.notify("on_error", |l| l.on_error(&e));

			return Err(e);
		};

		sub.status = SubscriptionStatus::Cancelled;
		tracing::info!(%id, mailbox = sub.real_mailbox.as_deref(), "Unsubscribed");
		self.notify("on_unsubscribe", |l| {
			l.on_unsubscribe(&sub, UnsubscribeReason::Requested)
		});

		Ok(sub)
	}

	/// Removes every subscription that expired at or before `now`
	pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<Subscription> {
		let _transition = self.transitions.lock();
		let expired = {
			let mut registry = self.registry.lock();
			let due = registry
				.by_id
				.values()
				.filter(|sub| sub.is_expired_at(now))
				.map(|sub| sub.id)
				.collect::<Vec<_>>();

			due.into_iter()
				.filter_map(|id| registry.remove(id))
				.map(|sub| Subscription {
					status: SubscriptionStatus::Expired,
					..sub
				})
				.collect::<Vec<_>>()
		};

		for sub in &expired {
			tracing::info!(id = %sub.id, "Subscription expired");
			self.notify("on_expire", |l| l.on_expire(sub));
		}

		expired
	}

	/// Removes every subscription fetching from `mailbox`, e.g. because its account was removed
	pub fn cancel_mailbox(&self, mailbox: &str) -> Vec<Subscription> {
		let _transition = self.transitions.lock();
		let cancelled = {
			let mut registry = self.registry.lock();
			let ids = registry
				.by_mailbox
				.get(mailbox)
				.map(|ids| ids.iter().copied().collect::<Vec<_>>())
				.unwrap_or_default();

			ids.into_iter()
				.filter_map(|id| registry.remove(id))
				.map(|sub| Subscription {
					status: SubscriptionStatus::Cancelled,
					..sub
				})
				.collect::<Vec<_>>()
		};

		for sub in &cancelled {
			tracing::info!(id = %sub.id, mailbox, "Subscription cancelled, its account was removed");
			self.notify("on_unsubscribe", |l| {
				l.on_unsubscribe(sub, UnsubscribeReason::AccountRemoved)
			});
		}

		cancelled
	}

	/// Returns every live subscription `message` fetched from `mailbox` matches, firing `on_email_match` for each.
	///
	/// Candidates are the subscriptions of `mailbox` and every broadcast subscription.
	pub fn match_message(&self, mailbox: &str, message: &EmailMessage) -> Vec<Subscription> {
		let candidates = self.registry.lock().candidates(mailbox);

		let matched = candidates
			.into_iter()
			.filter(|sub| matcher::matches(&sub.filter, message))
			.collect::<Vec<_>>();

		for sub in &matched {
			tracing::trace!(id = %sub.id, message_id = %message.id, "Message matched");
			self.notify("on_email_match", |l| l.on_email_match(sub, message));
		}

		matched
	}

	/// Folders the subscriptions of `mailbox` are interested in. Empty if any of them is interested in every folder
	#[must_use]
	pub fn folder_scope(&self, mailbox: &str) -> Vec<String> {
		let candidates = self.registry.lock().candidates(mailbox);

		if candidates.iter().any(|sub| sub.filter.folders.is_empty()) {
			return Vec::new();
		}

		candidates
			.iter()
			.flat_map(|sub| &sub.filter.folders)
			.map(|folder| folder.trim().to_owned())
			.unique_by(|folder| folder.to_lowercase())
			.sorted()
			.collect()
	}

	/// Returns a live subscription
	#[must_use]
	pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
		self.registry.lock().by_id.get(&id).cloned()
	}

	/// Returns every live subscription, oldest first
	#[must_use]
	pub fn list(&self) -> Vec<Subscription> {
		self.registry
			.lock()
			.by_id
			.values()
			.cloned()
			.sorted_by_key(|sub| sub.created_at)
			.collect()
	}

	/// How many live subscriptions fetch from `mailbox`
	#[must_use]
	pub fn count_for_mailbox(&self, mailbox: &str) -> usize {
		self.registry
			.lock()
			.by_mailbox
			.get(mailbox)
			.map_or(0, HashSet::len)
	}

	fn notify(
		&self,
		hook: &'static str,
		f: impl Fn(&dyn SubscriptionListener) -> Result<(), HookError>,
	) {
		// cloned to not hold the lock while running foreign code
		let listeners = self.listeners.read().clone();

		for listener in &listeners {
			if let Err(e) = f(listener.as_ref()) {
				tracing::error!("Subscription listener failed in {hook}: {}", ErrorChainDisplay(&e));
			}
		}
	}
}

impl Default for SubscriptionManager {
	fn default() -> Self {
		Self::new(TaggedAliasResolver::new())
	}
}

impl fmt::Debug for SubscriptionManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SubscriptionManager")
			.field("registry", &*self.registry.lock())
			.field("resolver", &self.resolver)
			.field("listeners", &self.listeners.read().len())
			.finish()
	}
}

impl Registry {
	fn insert(&mut self, sub: Subscription) {
		self.by_fingerprint.insert(sub.fingerprint.clone(), sub.id);

		match (&sub.real_mailbox, sub.kind) {
			(Some(mailbox), _) => {
				self.by_mailbox
					.entry(mailbox.clone())
					.or_default()
					.insert(sub.id);
			}
			(None, SubscriptionKind::Broadcast) => {
				self.broadcast.insert(sub.id);
			}
			(None, kind) => {
				tracing::error!(id = %sub.id, ?kind, "Subscription has no mailbox and won't receive any mail");
			}
		}

		self.by_id.insert(sub.id, sub);
	}

	fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
		let sub = self.by_id.remove(&id)?;
		self.by_fingerprint.remove(&sub.fingerprint);
		self.broadcast.remove(&id);

		if let Some(mailbox) = &sub.real_mailbox {
			if let Some(ids) = self.by_mailbox.get_mut(mailbox) {
				ids.remove(&id);

				if ids.is_empty() {
					self.by_mailbox.remove(mailbox);
				}
			}
		}

		Some(sub)
	}

	fn candidates(&self, mailbox: &str) -> Vec<Subscription> {
		self.by_mailbox
			.get(mailbox)
			.into_iter()
			.flatten()
			.chain(&self.broadcast)
			.filter_map(|id| self.by_id.get(id))
			.cloned()
			.collect()
	}
}

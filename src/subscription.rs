/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains [`Subscription`], a registered interest in a subset of a mailbox's mail,
//! and the [`SubscriptionManager`] that owns every live subscription

pub mod listener;
pub mod manager;
mod matcher;

pub use self::{
	listener::SubscriptionListener,
	manager::{SubscriptionError, SubscriptionManager},
};

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{filter::EmailFilter, fingerprint::Fingerprint};

/// How a subscription is served
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
	/// Delivered as soon as the mailbox's worker observes the message
	Realtime,

	/// Delivered on the worker's regular poll
	Poll,

	/// Not tied to an address. Matches mail fetched from every mailbox
	Broadcast,
}

impl SubscriptionKind {
	/// Whether subscriptions of this kind must target an address
	#[must_use]
	pub fn requires_address(self) -> bool {
		matches!(self, Self::Realtime | Self::Poll)
	}
}

/// Opaque ID of a [`Subscription`]
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
	pub(crate) fn new_random() -> Self {
		Self(Uuid::new_v4())
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

#[expect(missing_docs, reason = "self-explanatory")]
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
	Pending,
	Active,
	Expired,
	Cancelled,
}

/// Why a subscription stopped receiving mail
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeReason {
	/// The owner unsubscribed explicitly
	Requested,

	/// The subscription outlived its expiry timestamp
	Expired,

	/// The account owning the mailbox was removed
	AccountRemoved,
}

/// A registered interest in the mail matching [`EmailFilter`]
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Subscription {
	#[expect(missing_docs, reason = "self-explanatory")]
	pub id: SubscriptionId,

	#[expect(missing_docs, reason = "self-explanatory")]
	pub kind: SubscriptionKind,

	/// Criteria the delivered mail matches. Never changes after creation
	pub filter: Arc<EmailFilter>,

	/// Mailbox the filter's address resolved into. `None` for [`SubscriptionKind::Broadcast`]
	pub real_mailbox: Option<String>,

	/// Identity of `kind`, `real_mailbox`, and `filter`. Never changes after creation
	pub fingerprint: Fingerprint,

	#[expect(missing_docs, reason = "self-explanatory")]
	pub status: SubscriptionStatus,

	#[expect(missing_docs, reason = "self-explanatory")]
	pub created_at: DateTime<Utc>,

	/// When the subscription expires on its own, if ever
	pub expires_at: Option<DateTime<Utc>>,
}

impl Subscription {
	/// Whether the subscription has outlived its expiry timestamp at `now`
	#[must_use]
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at <= now)
	}
}

/// A request to create a [`Subscription`]
#[derive(bon::Builder, Clone, Debug)]
pub struct SubscribeRequest {
	#[expect(missing_docs, reason = "self-explanatory")]
	#[builder(start_fn)]
	pub kind: SubscriptionKind,

	#[expect(missing_docs, reason = "self-explanatory")]
	#[builder(default)]
	pub filter: EmailFilter,

	/// When the subscription should expire on its own
	pub expires_at: Option<DateTime<Utc>>,
}

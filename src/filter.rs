/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains [`EmailFilter`], the criteria a subscription matches messages against

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A list of criteria a message must pass to be delivered to a subscription.
///
/// Every unset criterion is ignored. Immutable once attached to a [`Subscription`](`crate::Subscription`).
#[derive(bon::Builder, Serialize, Deserialize, Clone, PartialEq, Eq, Default, Debug)]
#[serde(default)]
pub struct EmailFilter {
	/// Get messages only from these folders. Empty means any folder
	#[builder(field)]
	pub folders: Vec<String>,

	/// Get messages only carrying all of these labels
	#[builder(field)]
	pub labels: Vec<String>,

	/// Get messages only whose custom fields contain all of these key-value pairs
	#[builder(field)]
	pub custom: BTreeMap<String, String>,

	/// Address the message must be sent to.
	///
	/// Supports `user+tag@domain` to only match mail sent to that exact tag
	/// and `*@domain` to match mail sent to any address of a domain.
	#[builder(into)]
	pub address: Option<String>,

	/// Get messages only containing this string in the subject
	#[builder(into)]
	pub subject: Option<String>,

	/// Get messages only containing this string in the sender
	#[builder(into)]
	pub from: Option<String>,

	/// Get messages only containing this string in one of the direct recipients
	#[builder(into)]
	pub to: Option<String>,

	/// Get messages only with (or without) attachments
	pub has_attachments: Option<bool>,

	/// Get messages only that are unread (or read)
	pub unread: Option<bool>,

	/// Ignore messages received before this point
	pub start_date: Option<DateTime<Utc>>,
}

impl<S: email_filter_builder::State> EmailFilterBuilder<S> {
	/// Adds a folder to match
	pub fn folder(mut self, value: impl Into<String>) -> Self {
		self.folders.push(value.into());
		self
	}

	/// Adds a label the message must carry
	pub fn label(mut self, value: impl Into<String>) -> Self {
		self.labels.push(value.into());
		self
	}

	/// Adds a custom key-value pair the message must carry
	pub fn custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.custom.insert(key.into(), value.into());
		self
	}
}

impl EmailFilter {
	/// The explicit target address, if it is set and not blank
	#[must_use]
	pub fn target_address(&self) -> Option<&str> {
		self.address
			.as_deref()
			.map(str::trim)
			.filter(|addr| !addr.is_empty())
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains [`EmailMessage`], the parsed message summary a [`Fetch`](`crate::Fetch`) implementation returns

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of a single fetched message. Bodies are not part of it
#[derive(bon::Builder, Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct EmailMessage {
	/// Raw `To` header values. Each may contain several comma-separated addresses
	#[builder(field)]
	pub to: Vec<String>,

	/// Raw `Cc` header values
	#[builder(field)]
	pub cc: Vec<String>,

	/// Provider labels, e.g. Gmail labels
	#[builder(field)]
	pub labels: Vec<String>,

	/// Any other provider-specific fields, matched by custom filters
	#[builder(field)]
	pub custom: BTreeMap<String, String>,

	/// Provider-issued message ID, e.g. an IMAP UID or a Gmail message ID. Unique within a mailbox
	#[builder(into)]
	pub id: String,

	/// Folder the message was fetched from
	#[builder(default = String::from("INBOX"), into)]
	pub folder: String,

	/// When the message was received
	#[builder(default = Utc::now())]
	pub date: DateTime<Utc>,

	/// Raw `From` header value
	#[builder(into)]
	pub from: Option<String>,

	/// Subject line
	#[builder(into)]
	pub subject: Option<String>,

	/// Whether the message has at least one attachment
	#[builder(default)]
	pub has_attachments: bool,

	/// Whether the message hasn't been read yet
	#[builder(default)]
	pub unread: bool,
}

impl<S: email_message_builder::State> EmailMessageBuilder<S> {
	/// Adds a `To` header value
	pub fn to(mut self, value: impl Into<String>) -> Self {
		self.to.push(value.into());
		self
	}

	/// Adds a `Cc` header value
	pub fn cc(mut self, value: impl Into<String>) -> Self {
		self.cc.push(value.into());
		self
	}

	/// Adds a label
	pub fn label(mut self, value: impl Into<String>) -> Self {
		self.labels.push(value.into());
		self
	}

	/// Adds a custom field
	pub fn custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.custom.insert(key.into(), value.into());
		self
	}
}

impl EmailMessage {
	/// Direct and carbon-copy recipient header values
	pub fn recipients(&self) -> impl Iterator<Item = &str> {
		self.to.iter().chain(&self.cc).map(String::as_str)
	}
}

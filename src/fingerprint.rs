/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains [`Fingerprint`] and the [`fingerprint`] function that computes it

use std::{collections::BTreeMap, fmt};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{filter::EmailFilter, subscription::SubscriptionKind};

/// Stable identity of a subscription's matching criteria.
///
/// Two subscriptions that would match exactly the same mail of the same mailbox have equal fingerprints.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
	/// Amount of hex characters kept from the digest
	pub const LEN: usize = 16;

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Canonical form of a filter. Field order is fixed by the declaration order
#[derive(Serialize)]
struct Canonical<'a> {
	kind: SubscriptionKind,
	mailbox: Option<&'a str>,
	address: Option<String>,
	folders: Vec<String>,
	subject: Option<String>,
	from: Option<String>,
	to: Option<String>,
	has_attachments: Option<bool>,
	unread: Option<bool>,
	labels: Vec<String>,
	custom: BTreeMap<String, String>,
	start_date: Option<i64>,
}

/// Computes the fingerprint of a subscription of `kind` with `filter` attached, fetching from `real_mailbox`.
///
/// The result doesn't depend on the order of folders, labels, or custom filters,
/// on duplicates among them, or on the letter case of any case-insensitive criterion.
#[must_use]
pub fn fingerprint(
	kind: SubscriptionKind,
	real_mailbox: Option<&str>,
	filter: &EmailFilter,
) -> Fingerprint {
	let lower = |s: &Option<String>| s.as_deref().map(str::to_lowercase);
	let sorted_lowercase = |items: &[String]| {
		items
			.iter()
			.map(|item| item.trim().to_lowercase())
			.sorted()
			.dedup()
			.collect::<Vec<_>>()
	};

	let canonical = Canonical {
		kind,
		mailbox: real_mailbox,
		address: filter.target_address().map(str::to_lowercase),
		folders: sorted_lowercase(&filter.folders),
		subject: lower(&filter.subject),
		from: lower(&filter.from),
		to: lower(&filter.to),
		has_attachments: filter.has_attachments,
		unread: filter.unread,
		labels: sorted_lowercase(&filter.labels),
		custom: filter.custom.clone(),
		start_date: filter.start_date.map(|date| date.timestamp()),
	};

	// serializing a struct of strings, bools, and string maps into memory can't fail.
	// Hashing an empty encoding in that impossible case still produces a stable, if coarse, identity
	let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
	let digest = format!("{:x}", Sha256::digest(&encoded));

	Fingerprint(digest[..Fingerprint::LEN].to_owned())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn poll(filter: &EmailFilter) -> Fingerprint {
		fingerprint(SubscriptionKind::Poll, Some("a@gmail.com"), filter)
	}

	#[test]
	fn fixed_length_hex() {
		let fp = poll(&EmailFilter::default());

		assert_eq!(fp.as_str().len(), Fingerprint::LEN);
		assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn folder_order_does_not_matter() {
		let a = EmailFilter::builder().folder("INBOX").folder("Sent").build();
		let b = EmailFilter::builder().folder("Sent").folder("INBOX").build();

		assert_eq!(poll(&a), poll(&b));
	}

	#[test]
	fn labels_and_custom_are_normalized() {
		let a = EmailFilter::builder()
			.label("Work")
			.label("urgent")
			.label("work")
			.custom("x", "1")
			.custom("y", "2")
			.build();
		let b = EmailFilter::builder()
			.label("URGENT")
			.label("work")
			.custom("y", "2")
			.custom("x", "1")
			.build();

		assert_eq!(poll(&a), poll(&b));
	}

	#[test]
	fn subject_case_does_not_matter() {
		let a = EmailFilter::builder().subject("Invoice").build();
		let b = EmailFilter::builder().subject("INVOICE").build();

		assert_eq!(poll(&a), poll(&b));
	}

	#[test]
	fn different_criteria_differ() {
		let base = EmailFilter::builder().folder("INBOX").build();
		let unread = EmailFilter::builder().folder("INBOX").unread(true).build();
		let read = EmailFilter::builder().folder("INBOX").unread(false).build();

		assert_ne!(poll(&base), poll(&unread));
		assert_ne!(poll(&unread), poll(&read));
	}

	#[test]
	fn address_tag_is_part_of_the_identity() {
		let promo = EmailFilter::builder().address("a+promo@gmail.com").build();
		let news = EmailFilter::builder().address("a+news@gmail.com").build();

		assert_ne!(poll(&promo), poll(&news));
	}

	#[test]
	fn kind_and_mailbox_are_part_of_the_identity() {
		let filter = EmailFilter::default();

		assert_ne!(
			fingerprint(SubscriptionKind::Poll, Some("a@gmail.com"), &filter),
			fingerprint(SubscriptionKind::Realtime, Some("a@gmail.com"), &filter)
		);
		assert_ne!(
			fingerprint(SubscriptionKind::Poll, Some("a@gmail.com"), &filter),
			fingerprint(SubscriptionKind::Poll, Some("b@gmail.com"), &filter)
		);
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Evaluation of an [`EmailFilter`] against an [`EmailMessage`]

use mailparse::{MailAddr, addrparse};

use crate::{alias::split_address, filter::EmailFilter, message::EmailMessage};

/// Returns true if `message` passes every criterion of `filter`.
///
/// Criteria are checked cheapest first: date, folder, address, then the rest of the fields.
pub(crate) fn matches(filter: &EmailFilter, message: &EmailMessage) -> bool {
	if filter
		.start_date
		.is_some_and(|start_date| message.date < start_date)
	{
		return false;
	}

	if !filter.folders.is_empty()
		&& !filter
			.folders
			.iter()
			.any(|folder| folder.eq_ignore_ascii_case(&message.folder))
	{
		return false;
	}

	if let Some(target) = filter.target_address().map(Target::parse) {
		let addressed = message
			.recipients()
			.flat_map(extract_addresses)
			.any(|addr| target.matches(&addr));

		if !addressed {
			return false;
		}
	}

	matches_fields(filter, message)
}

fn matches_fields(filter: &EmailFilter, message: &EmailMessage) -> bool {
	let contains = |field: Option<&str>, wanted: &Option<String>| match wanted {
		Some(wanted) => field.is_some_and(|field| contains_ignore_case(field, wanted)),
		None => true,
	};

	if !contains(message.subject.as_deref(), &filter.subject)
		|| !contains(message.from.as_deref(), &filter.from)
	{
		return false;
	}

	if let Some(to) = &filter.to {
		if !message.to.iter().any(|t| contains_ignore_case(t, to)) {
			return false;
		}
	}

	if filter
		.has_attachments
		.is_some_and(|wanted| wanted != message.has_attachments)
	{
		return false;
	}

	if filter.unread.is_some_and(|wanted| wanted != message.unread) {
		return false;
	}

	let has_every_label = filter.labels.iter().all(|wanted| {
		message
			.labels
			.iter()
			.any(|label| label.eq_ignore_ascii_case(wanted))
	});
	if !has_every_label {
		return false;
	}

	filter
		.custom
		.iter()
		.all(|(key, value)| message.custom.get(key) == Some(value))
}

/// Address a filter targets, lowercased
#[derive(PartialEq, Eq, Debug)]
enum Target {
	/// `*@domain`. Matches every address ending with `@domain`
	Wildcard { suffix: String },

	/// `user@domain` or `user+tag@domain`. Matches only that exact address,
	/// so a tagged target never matches the untagged base address and vice versa
	Exact(String),
}

impl Target {
	fn parse(address: &str) -> Self {
		let address = address.to_lowercase();

		match split_address(&address) {
			Some(("*", domain)) => Self::Wildcard {
				suffix: format!("@{domain}"),
			},
			_ => Self::Exact(address),
		}
	}

	fn matches(&self, candidate: &str) -> bool {
		match self {
			Self::Wildcard { suffix } => candidate.len() > suffix.len() && candidate.ends_with(suffix),
			Self::Exact(addr) => candidate == addr,
		}
	}
}

/// Extracts lowercased bare addresses from a raw header value like `"Name" <a@b.com>, c@d.com`
fn extract_addresses(header: &str) -> Vec<String> {
	match addrparse(header) {
		Ok(list) => list
			.iter()
			.flat_map(|addr| match addr {
				MailAddr::Single(single) => vec![single.addr.to_lowercase()],
				MailAddr::Group(group) => group
					.addrs
					.iter()
					.map(|single| single.addr.to_lowercase())
					.collect(),
			})
			.collect(),
		// some providers hand out headers that aren't strictly RFC 5322 compliant
		Err(_) => header
			.split(',')
			.filter_map(|part| {
				let part = part.trim();
				let bare = match (part.rfind('<'), part.rfind('>')) {
					(Some(open), Some(close)) if open < close => &part[open + 1..close],
					_ => part,
				};
				let bare = bare.trim();
				(!bare.is_empty()).then(|| bare.to_lowercase())
			})
			.collect(),
	}
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
	haystack.to_lowercase().contains(&needle.to_lowercase())
}

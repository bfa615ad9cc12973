/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Alias resolution: turning the address a subscription watches into the real mailbox that has to be fetched.
//!
//! The rules are provider-specific, so they are behind the [`AliasResolver`] trait.
//! [`TaggedAliasResolver`] implements the `user+tag@domain` and `*@domain` schemes.

use std::{collections::HashMap, fmt::Debug};

/// A strategy resolving subscription addresses into real mailboxes
pub trait AliasResolver: Debug + Send + Sync {
	/// Resolves `address` into the real mailbox whose worker fetches mail for it
	///
	/// # Errors
	/// If the address is malformed or can't be routed to any mailbox
	fn resolve(&self, address: &str) -> Result<String, AliasError>;
}

#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(thiserror::Error, Debug)]
pub enum AliasError {
	#[error("{0:?} is not a valid email address")]
	Malformed(String),

	#[error("No shared mailbox is configured for the wildcard domain {0:?}")]
	UnroutedWildcard(String),
}

/// Resolves `user+tag@domain` into `user@domain`
/// and routes `*@domain` into the shared mailbox configured for that domain.
///
/// Resolved mailboxes are lowercased.
#[derive(Clone, Default, Debug)]
pub struct TaggedAliasResolver {
	/// domain -> mailbox that receives mail for all addresses of the domain
	shared_mailboxes: HashMap<String, String>,
}

impl TaggedAliasResolver {
	/// Creates a resolver without any shared mailboxes. Wildcard addresses won't resolve
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Routes wildcard subscriptions for `domain` to `mailbox`
	#[must_use]
	pub fn with_shared_mailbox(mut self, domain: &str, mailbox: &str) -> Self {
		self.shared_mailboxes
			.insert(domain.trim().to_lowercase(), normalize_mailbox(mailbox));
		self
	}
}

impl AliasResolver for TaggedAliasResolver {
	fn resolve(&self, address: &str) -> Result<String, AliasError> {
		let address = normalize_mailbox(address);
		let (local, domain) =
			split_address(&address).ok_or_else(|| AliasError::Malformed(address.clone()))?;

		if local == "*" {
			return self
				.shared_mailboxes
				.get(domain)
				.cloned()
				.ok_or_else(|| AliasError::UnroutedWildcard(domain.to_owned()));
		}

		let base = strip_tag(local);
		if base.is_empty() {
			return Err(AliasError::Malformed(address));
		}

		Ok(format!("{base}@{domain}"))
	}
}

impl<R> AliasResolver for Box<R>
where
	R: AliasResolver + ?Sized,
{
	fn resolve(&self, address: &str) -> Result<String, AliasError> {
		(**self).resolve(address)
	}
}

/// Canonical form of a real mailbox address, as used to key workers
#[must_use]
pub fn normalize_mailbox(mailbox: &str) -> String {
	mailbox.trim().to_lowercase()
}

/// Splits an address into its local part and domain. Both must be non-empty
pub(crate) fn split_address(address: &str) -> Option<(&str, &str)> {
	let (local, domain) = address.rsplit_once('@')?;
	(!local.is_empty() && !domain.is_empty()).then_some((local, domain))
}

/// Removes the `+tag` suffix from a local part
pub(crate) fn strip_tag(local: &str) -> &str {
	local.split_once('+').map_or(local, |(base, _tag)| base)
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn strips_tag() {
		let resolver = TaggedAliasResolver::new();
		assert_eq!(
			resolver.resolve("a+promo@gmail.com").expect("valid address"),
			"a@gmail.com"
		);
	}

	#[test]
	fn lowercases_and_trims() {
		let resolver = TaggedAliasResolver::new();
		assert_eq!(
			resolver.resolve("  User@Example.COM ").expect("valid address"),
			"user@example.com"
		);
	}

	#[test]
	fn wildcard_routes_to_shared_mailbox() {
		let resolver =
			TaggedAliasResolver::new().with_shared_mailbox("Corp.example", "inbox@corp.example");
		assert_eq!(
			resolver.resolve("*@corp.example").expect("routed wildcard"),
			"inbox@corp.example"
		);
	}

	#[test]
	fn unrouted_wildcard_is_rejected() {
		let resolver = TaggedAliasResolver::new();
		assert_matches!(
			resolver.resolve("*@nowhere.example"),
			Err(AliasError::UnroutedWildcard(domain)) if domain == "nowhere.example"
		);
	}

	#[test]
	fn malformed_addresses_are_rejected() {
		let resolver = TaggedAliasResolver::new();
		for addr in ["no-at-sign", "@domain.com", "user@", "+tag@domain.com"] {
			assert_matches!(
				resolver.resolve(addr),
				Err(AliasError::Malformed(_)),
				"{addr} should be malformed"
			);
		}
	}
}

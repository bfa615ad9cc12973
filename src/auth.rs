/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! OAuth2 access, consumed as a capability.
//!
//! Acquiring and refreshing tokens is left to the [`TokenSource`] implementation.

use std::{collections::HashMap, error::Error as StdError, fmt};

use crate::error::{Classify, ErrorKind};

/// An OAuth2 access token for a single mailbox
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	access_token: String,
}

impl Credential {
	#[expect(missing_docs, reason = "self-explanatory")]
	pub fn new(access_token: impl Into<String>) -> Self {
		Self {
			access_token: access_token.into(),
		}
	}

	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn access_token(&self) -> &str {
		&self.access_token
	}

	/// The XOAUTH2 SASL initial response for `email`, as used by IMAP `AUTHENTICATE XOAUTH2`
	#[must_use]
	pub fn as_xoauth2(&self, email: &str) -> String {
		format!(
			"user={}\x01auth=Bearer {}\x01\x01",
			email, self.access_token
		)
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credential")
			.field("access_token", &"<redacted>")
			.finish()
	}
}

/// Provides valid access tokens for mailboxes
pub trait TokenSource: Send + Sync + 'static {
	/// Returns a fresh access token for `mailbox`, refreshing it first if it's expired.
	///
	/// Returns `None` if the mailbox isn't accessed via OAuth2.
	///
	/// # Errors
	/// If the token couldn't be refreshed
	fn access_token(
		&self,
		mailbox: &str,
	) -> impl Future<Output = Result<Option<Credential>, AuthError>> + Send;
}

#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
	#[error("Access to {mailbox} has been revoked or has expired and needs to be re-authorized")]
	ReauthorizationRequired { mailbox: String },

	#[error("Failed to refresh the access token")]
	Transient(#[source] Box<dyn StdError + Send + Sync>),
}

impl Classify for AuthError {
	fn kind(&self) -> ErrorKind {
		match self {
			Self::ReauthorizationRequired { .. } => ErrorKind::Authorization,
			Self::Transient(_) => ErrorKind::Transient,
		}
	}
}

/// No mailbox uses OAuth2
impl TokenSource for () {
	async fn access_token(&self, _mailbox: &str) -> Result<Option<Credential>, AuthError> {
		Ok(None)
	}
}

/// A fixed mailbox -> token map. Mailboxes missing from it don't use OAuth2
#[derive(Clone, Default, Debug)]
pub struct StaticTokens {
	tokens: HashMap<String, Credential>,
}

impl StaticTokens {
	#[expect(missing_docs, reason = "self-explanatory")]
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds (or replaces) the token for `mailbox`
	#[must_use]
	pub fn with_token(mut self, mailbox: impl Into<String>, credential: Credential) -> Self {
		self.tokens.insert(mailbox.into(), credential);
		self
	}
}

impl TokenSource for StaticTokens {
	async fn access_token(&self, mailbox: &str) -> Result<Option<Credential>, AuthError> {
		Ok(self.tokens.get(mailbox).cloned())
	}
}

impl<T: TokenSource> TokenSource for std::sync::Arc<T> {
	async fn access_token(&self, mailbox: &str) -> Result<Option<Credential>, AuthError> {
		T::access_token(self, mailbox).await
	}
}

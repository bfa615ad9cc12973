/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`Fetch`] capability, the only way the engine talks to a mail provider,
//! and the [`Cursor`] that describes where a fetch resumes from

use std::{error::Error as StdError, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
	auth::Credential,
	error::{Classify, ErrorKind},
	message::EmailMessage,
};

/// Where a fetch resumes from
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cursor {
	/// Every message received in `[start, end)`. Used for plain IMAP
	TimeWindow {
		/// Inclusive
		start: DateTime<Utc>,
		/// Exclusive
		end: DateTime<Utc>,
	},

	/// Every change after a provider-issued change token, e.g. a Gmail History ID
	HistoryId(String),
}

/// What to fetch
#[derive(Clone, Copy, Debug)]
pub struct FetchRequest<'a> {
	/// Real mailbox to fetch from
	pub mailbox: &'a str,

	/// Folders to fetch. Empty means all of them
	pub folders: &'a [String],

	#[expect(missing_docs, reason = "self-explanatory")]
	pub cursor: &'a Cursor,

	/// OAuth2 access token, if the mailbox uses OAuth2
	pub credential: Option<&'a Credential>,
}

/// Result of a successful fetch
#[derive(Clone, Default, Debug)]
pub struct FetchBatch {
	/// Messages found after the cursor
	pub messages: Vec<EmailMessage>,

	/// Where the next fetch should resume from.
	///
	/// For a time window cursor, a [`Cursor::TimeWindow`] whose `end` is the point up to which the fetch is verified complete.
	/// For a change token cursor (or the initial time window of a change token account), the newest [`Cursor::HistoryId`].
	/// `None` means the requested cursor was covered completely and no new token was issued.
	pub next_cursor: Option<Cursor>,
}

/// Fetches messages from a remote mailbox
pub trait Fetch: Send + Sync + 'static {
	/// Fetches every message after `request.cursor`
	///
	/// # Errors
	/// If the provider couldn't be reached, refused the request, or invalidated the cursor
	fn fetch(
		&self,
		request: FetchRequest<'_>,
	) -> impl Future<Output = Result<FetchBatch, FetchError>> + Send;
}

impl<F: Fetch> Fetch for Arc<F> {
	async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchBatch, FetchError> {
		F::fetch(self, request).await
	}
}

#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
	#[error("Network error")]
	Network(#[source] Box<dyn StdError + Send + Sync>),

	#[error("Provider returned an error: {0}")]
	Provider(String),

	#[error("Change token {token:?} is no longer valid")]
	CursorInvalidated { token: String },

	#[error("Authorization rejected: {0}")]
	Auth(String),

	#[error(transparent)]
	Other(Box<dyn StdError + Send + Sync>),
}

impl Classify for FetchError {
	fn kind(&self) -> ErrorKind {
		match self {
			Self::Network(_) | Self::Provider(_) | Self::Other(_) => ErrorKind::Transient,
			Self::CursorInvalidated { .. } => ErrorKind::CursorInvalidated,
			Self::Auth(_) => ErrorKind::Authorization,
		}
	}
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;

	use super::*;

	#[test]
	fn history_id_serializes_tagged() {
		let cursor = Cursor::HistoryId("42".to_owned());
		assert_eq!(
			serde_json::to_string(&cursor).expect("serializable"),
			r#"{"type":"history_id","value":"42"}"#
		);
	}

	#[test]
	fn time_window_serializes_with_bounds() {
		let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid date");
		let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).single().expect("valid date");
		let json = serde_json::to_value(Cursor::TimeWindow { start, end }).expect("serializable");

		assert_eq!(json["type"], "time_window");
		assert_eq!(json["value"]["start"], "2024-01-01T00:00:00Z");
	}

	#[test]
	fn error_kinds() {
		assert_eq!(
			FetchError::CursorInvalidated { token: "1".into() }.kind(),
			ErrorKind::CursorInvalidated
		);
		assert_eq!(FetchError::Auth("revoked".into()).kind(), ErrorKind::Authorization);
		assert_eq!(FetchError::Provider("503".into()).kind(), ErrorKind::Transient);
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Error classification shared by every module.
//!
//! Each module defines its own error enum. All of them implement [`Classify`]
//! so that loops can decide between retrying, falling back, rejecting, or pausing an account.

mod error_chain_display;

pub use self::error_chain_display::ErrorChainDisplay;

use std::error::Error as StdError;

/// How the engine should react to an error
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
	/// Network or provider hiccup. Retried on the normal schedule with the cursor untouched
	Transient,

	/// The provider says the stored change token is stale. Falls back to a time-window resync
	CursorInvalidated,

	/// Malformed request or unknown ID. Rejected to the caller, never retried
	Configuration,

	/// Expired or revoked credential. Pauses the account until it is re-authorized
	Authorization,
}

/// A subtrait of [`std::error::Error`] that requires classifying the error by [`ErrorKind`]
pub trait Classify: StdError + Send + Sync {
	/// What kind of failure this is
	#[must_use]
	fn kind(&self) -> ErrorKind;
}

/// Error returned by a [`SubscriptionListener`](`crate::subscription::SubscriptionListener`) hook.
///
/// Hook errors are logged and never roll back the transition that invoked the hook.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct HookError(pub Box<dyn StdError + Send + Sync>);

impl HookError {
	/// Wraps any error into a [`HookError`]
	pub fn new(err: impl StdError + Send + Sync + 'static) -> Self {
		Self(Box::new(err))
	}
}

impl From<Box<dyn StdError + Send + Sync>> for HookError {
	fn from(value: Box<dyn StdError + Send + Sync>) -> Self {
		Self(value)
	}
}

impl From<&str> for HookError {
	fn from(value: &str) -> Self {
		Self(value.into())
	}
}

impl From<String> for HookError {
	fn from(value: String) -> Self {
		Self(value.into())
	}
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`SubscriptionListener`] trait

use super::{Subscription, SubscriptionError, UnsubscribeReason};
use crate::{error::HookError, message::EmailMessage};

/// Hooks invoked after a subscription changes state.
///
/// Hooks run synchronously right after the transition, in the order the listeners were registered.
/// Lifecycle hooks of one transition finish before the next transition starts,
/// so a hook must not subscribe or unsubscribe through the same manager.
/// An error returned from a hook is logged and never rolls the transition back.
/// Every hook does nothing by default.
#[allow(unused_variables, reason = "default no-op implementations")]
pub trait SubscriptionListener: Send + Sync {
	/// A subscription has been created and is now active
	///
	/// # Errors
	/// If the listener failed to react to the new subscription
	fn on_subscribe(&self, sub: &Subscription) -> Result<(), HookError> {
		Ok(())
	}

	/// A subscription has been removed, either explicitly or because its account was removed
	///
	/// # Errors
	/// If the listener failed to react to the removal
	fn on_unsubscribe(&self, sub: &Subscription, reason: UnsubscribeReason) -> Result<(), HookError> {
		Ok(())
	}

	/// A subscription has outlived its expiry timestamp and has been removed
	///
	/// # Errors
	/// If the listener failed to react to the expiry
	fn on_expire(&self, sub: &Subscription) -> Result<(), HookError> {
		Ok(())
	}

	/// `message` matched `sub`
	///
	/// # Errors
	/// If the listener failed to process the message
	fn on_email_match(&self, sub: &Subscription, message: &EmailMessage) -> Result<(), HookError> {
		Ok(())
	}

	/// A subscribe or unsubscribe request has been rejected
	///
	/// # Errors
	/// If the listener failed to react to the error
	fn on_error(&self, error: &SubscriptionError) -> Result<(), HookError> {
		Ok(())
	}
}

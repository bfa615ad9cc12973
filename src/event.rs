/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains [`EmailEvent`] and the [`EventBus`] that fans them out to any number of consumers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
	message::EmailMessage,
	subscription::{SubscriptionId, UnsubscribeReason},
};

/// Something observable that happened inside the engine
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct EmailEvent {
	#[expect(missing_docs, reason = "self-explanatory")]
	#[serde(flatten)]
	pub kind: EmailEventKind,

	/// Subscription the event is about, if any
	pub subscription_id: Option<SubscriptionId>,

	/// Real mailbox the event is about
	pub mailbox: String,

	#[expect(missing_docs, reason = "self-explanatory")]
	pub timestamp: DateTime<Utc>,

	/// Error message with its whole source chain, for [`EmailEventKind::FetchError`]
	pub error: Option<String>,
}

#[expect(missing_docs, reason = "self-explanatory")]
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmailEventKind {
	/// A message matched the subscription
	NewEmail { message: Arc<EmailMessage> },
	FetchStart,
	FetchComplete {
		/// Messages the fetch returned, after de-duplication
		fetched: usize,
		/// (message, subscription) pairs delivered
		matched: usize,
	},
	FetchError,
	Subscribed,
	Unsubscribed { reason: UnsubscribeReason },
}

impl EmailEvent {
	fn new(kind: EmailEventKind, mailbox: &str) -> Self {
		Self {
			kind,
			subscription_id: None,
			mailbox: mailbox.to_owned(),
			timestamp: Utc::now(),
			error: None,
		}
	}

	pub(crate) fn new_email(
		mailbox: &str,
		subscription_id: SubscriptionId,
		message: Arc<EmailMessage>,
	) -> Self {
		Self {
			subscription_id: Some(subscription_id),
			..Self::new(EmailEventKind::NewEmail { message }, mailbox)
		}
	}

	pub(crate) fn fetch_start(mailbox: &str) -> Self {
		Self::new(EmailEventKind::FetchStart, mailbox)
	}

	pub(crate) fn fetch_complete(mailbox: &str, fetched: usize, matched: usize) -> Self {
		Self::new(EmailEventKind::FetchComplete { fetched, matched }, mailbox)
	}

	pub(crate) fn fetch_error(mailbox: &str, error: String) -> Self {
		Self {
			error: Some(error),
			..Self::new(EmailEventKind::FetchError, mailbox)
		}
	}

	pub(crate) fn subscribed(mailbox: &str, subscription_id: SubscriptionId) -> Self {
		Self {
			subscription_id: Some(subscription_id),
			..Self::new(EmailEventKind::Subscribed, mailbox)
		}
	}

	pub(crate) fn unsubscribed(
		mailbox: &str,
		subscription_id: SubscriptionId,
		reason: UnsubscribeReason,
	) -> Self {
		Self {
			subscription_id: Some(subscription_id),
			..Self::new(EmailEventKind::Unsubscribed { reason }, mailbox)
		}
	}
}

/// Broadcasts [`EmailEvent`]s to every current receiver.
///
/// Events emitted while nobody is listening are dropped.
/// A receiver that lags behind more than the bus capacity misses the oldest events.
#[derive(Clone, Debug)]
pub struct EventBus {
	tx: broadcast::Sender<EmailEvent>,
}

impl EventBus {
	/// Creates a bus keeping at most `capacity` unreceived events per receiver
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (tx, _rx) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	/// Receives every event emitted from now on
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<EmailEvent> {
		self.tx.subscribe()
	}

	/// Same as [`subscribe`](`Self::subscribe`) but as a [`Stream`](`futures::Stream`).
	/// Lagging is reported as an error item
	#[must_use]
	pub fn stream(&self) -> BroadcastStream<EmailEvent> {
		BroadcastStream::new(self.tx.subscribe())
	}

	pub(crate) fn emit(&self, event: EmailEvent) {
		tracing::trace!(kind = ?event.kind, mailbox = %event.mailbox, "Emitting event");

		// an error only means there are no receivers right now
		_ = self.tx.send(event);
	}
}

#[cfg(test)]
mod tests {
	use futures::StreamExt;

	use super::*;

	#[tokio::test]
	async fn fans_out_to_every_receiver() {
		let bus = EventBus::new(8);
		let mut a = bus.subscribe();
		let mut b = bus.stream();

		bus.emit(EmailEvent::fetch_start("a@gmail.com"));

		assert_eq!(
			a.recv().await.expect("event sent").kind,
			EmailEventKind::FetchStart
		);
		assert_eq!(
			b.next()
				.await
				.expect("stream open")
				.expect("not lagging")
				.mailbox,
			"a@gmail.com"
		);
	}

	#[test]
	fn emit_without_receivers_is_fine() {
		let bus = EventBus::new(1);
		bus.emit(EmailEvent::fetch_start("a@gmail.com"));
	}

	#[test]
	fn serializes_flat_with_type_tag() {
		let event = EmailEvent::fetch_complete("a@gmail.com", 3, 1);
		let json = serde_json::to_value(&event).expect("serializable");

		assert_eq!(json["type"], "fetch_complete");
		assert_eq!(json["fetched"], 3);
		assert_eq!(json["mailbox"], "a@gmail.com");
	}
}

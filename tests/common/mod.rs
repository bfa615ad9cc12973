/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Helpers shared by the integration tests

#![allow(dead_code, reason = "not every test uses every helper")]

use std::{collections::VecDeque, sync::Arc};

use mailsub::{
	Cursor, EmailEvent, EmailMessage, EventBus, Fetch, FetchBatch, FetchError, FetchRequest,
	SubscriptionManager, TokenSource, WorkerPool,
	sync::{Account, Provider},
};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, broadcast};

/// A [`Fetch`] that replays queued results and records every request it got.
///
/// With nothing queued it returns no messages and echoes the requested cursor back as covered
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
	script: Mutex<VecDeque<Result<FetchBatch, FetchError>>>,
	requests: Mutex<Vec<Recorded>>,

	/// If set, every fetch waits for a permit before returning
	gate: Option<Semaphore>,

	/// Notified every time a fetch starts
	pub entered: Notify,
}

/// A request [`ScriptedFetcher`] received
#[derive(Clone, Debug)]
pub struct Recorded {
	pub mailbox: String,
	pub folders: Vec<String>,
	pub cursor: Cursor,
	pub token: Option<String>,
}

impl ScriptedFetcher {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Every fetch blocks until [`release`](`Self::release`) is called
	pub fn gated() -> Arc<Self> {
		Arc::new(Self {
			gate: Some(Semaphore::new(0)),
			..Default::default()
		})
	}

	pub fn push_ok(&self, messages: Vec<EmailMessage>, next_cursor: Option<Cursor>) {
		self.script.lock().push_back(Ok(FetchBatch {
			messages,
			next_cursor,
		}));
	}

	pub fn push_err(&self, err: FetchError) {
		self.script.lock().push_back(Err(err));
	}

	/// Lets a single gated fetch finish
	pub fn release(&self) {
		if let Some(gate) = &self.gate {
			gate.add_permits(1);
		}
	}

	pub fn requests(&self) -> Vec<Recorded> {
		self.requests.lock().clone()
	}

	pub fn calls(&self) -> usize {
		self.requests.lock().len()
	}
}

impl Fetch for ScriptedFetcher {
	async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchBatch, FetchError> {
		self.requests.lock().push(Recorded {
			mailbox: request.mailbox.to_owned(),
			folders: request.folders.to_vec(),
			cursor: request.cursor.clone(),
			token: request.credential.map(|c| c.access_token().to_owned()),
		});
		self.entered.notify_one();

		if let Some(gate) = &self.gate {
			gate.acquire()
				.await
				.expect("the gate is never closed")
				.forget();
		}

		let next = self.script.lock().pop_front();
		next.unwrap_or_else(|| {
			Ok(FetchBatch {
				messages: Vec::new(),
				next_cursor: Some(request.cursor.clone()),
			})
		})
	}
}

pub fn message(id: &str, to: &str) -> EmailMessage {
	EmailMessage::builder()
		.id(id)
		.to(to)
		.from("Sender <sender@example.org>")
		.subject("hello")
		.build()
}

pub fn imap_account(id: &str, mailbox: &str) -> Account {
	Account {
		id: id.to_owned(),
		mailbox: mailbox.to_owned(),
		provider: Provider::Imap,
		uses_oauth2: false,
	}
}

pub fn gmail_account(id: &str, mailbox: &str) -> Account {
	Account {
		provider: Provider::Gmail,
		uses_oauth2: true,
		..imap_account(id, mailbox)
	}
}

pub fn pool<T: TokenSource>(
	fetcher: &Arc<ScriptedFetcher>,
	subscriptions: &Arc<SubscriptionManager>,
	events: &EventBus,
	tokens: T,
) -> WorkerPool<Arc<ScriptedFetcher>, T> {
	WorkerPool::builder()
		.fetcher(Arc::clone(fetcher))
		.tokens(tokens)
		.subscriptions(Arc::clone(subscriptions))
		.events(events.clone())
		.build()
}

/// Every event received so far
pub fn drain(rx: &mut broadcast::Receiver<EmailEvent>) -> Vec<EmailEvent> {
	let mut events = Vec::new();
	while let Ok(event) = rx.try_recv() {
		events.push(event);
	}

	events
}

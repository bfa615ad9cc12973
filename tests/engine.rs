/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The whole engine: a synced account delivering to subscriptions through the shared worker

mod common;

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use chrono::Utc;
use mailsub::{
	Credential, EmailEventKind, EmailFilter, Engine, EngineConfig, MemoryStore, StaticTokens,
	SubscribeRequest, SubscriptionKind, SyncConfig, SyncManagerConfig, SyncOutcome,
	subscription::{SubscriptionError, UnsubscribeReason},
};

use self::common::{ScriptedFetcher, imap_account, message};

const ACCOUNT: &str = "acc";
const MAILBOX: &str = "a@example.com";

type TestEngine = Engine<Arc<ScriptedFetcher>, StaticTokens, Arc<MemoryStore>>;

fn engine(fetcher: &Arc<ScriptedFetcher>, store: &Arc<MemoryStore>) -> TestEngine {
	Engine::builder()
		.fetcher(Arc::clone(fetcher))
		.tokens(StaticTokens::new().with_token(MAILBOX, Credential::new("secret")))
		.store(Arc::clone(store))
		.config(
			EngineConfig::builder()
				.sync(
					SyncManagerConfig::builder()
						.max_start_jitter(Duration::from_secs(60))
						.build(),
				)
				.build(),
		)
		.build()
}

fn store_with_account() -> Arc<MemoryStore> {
	let store = Arc::new(MemoryStore::new());
	store.insert(
		imap_account(ACCOUNT, MAILBOX),
		SyncConfig::builder(ACCOUNT, MAILBOX)
			.last_sync_end_time(Utc::now() - chrono::Duration::hours(1))
			.build(),
	);

	store
}

#[tokio::test]
async fn synced_mail_reaches_subscriptions() {
	let fetcher = ScriptedFetcher::new();
	let store = store_with_account();
	let engine = engine(&fetcher, &store);
	let mut rx = engine.events();

	let sub = engine
		.subscribe(
			SubscribeRequest::builder(SubscriptionKind::Poll)
				.filter(
					EmailFilter::builder()
						.address("A+alerts@Example.com")
						.subject("alert")
						.build(),
				)
				.build(),
		)
		.expect("valid request");
	assert_eq!(sub.real_mailbox.as_deref(), Some(MAILBOX));

	let mut alert = message("1", "a+alerts@example.com");
	alert.subject = Some("ALERT: disk full".to_owned());
	fetcher.push_ok(vec![alert, message("2", MAILBOX)], None);

	let report = assert_matches!(
		engine.trigger_sync(ACCOUNT).await,
		Ok(SyncOutcome::Synced(report)) => report
	);
	assert_eq!((report.fetched, report.matched), (2, 1));

	let requests = fetcher.requests();
	assert_eq!(requests[0].mailbox, MAILBOX);
	assert_eq!(requests[0].token.as_deref(), Some("secret"));

	let new_emails = common::drain(&mut rx)
		.into_iter()
		.filter_map(|e| match e.kind {
			EmailEventKind::NewEmail { message } => Some((e.subscription_id, message.id.clone())),
			_ => None,
		})
		.collect::<Vec<_>>();
	assert_eq!(new_emails, [(Some(sub.id), "1".to_owned())]);

	engine.stop().await;
}

#[tokio::test]
async fn duplicate_subscription_is_rejected() {
	let fetcher = ScriptedFetcher::new();
	let store = store_with_account();
	let engine = engine(&fetcher, &store);

	let request = |first: &str, second: &str| {
		SubscribeRequest::builder(SubscriptionKind::Poll)
			.filter(
				EmailFilter::builder()
					.address(MAILBOX)
					.folder(first)
					.folder(second)
					.build(),
			)
			.build()
	};

	let original = engine
		.subscribe(request("INBOX", "Sent"))
		.expect("valid request");
	let duplicate = engine.subscribe(request("Sent", "INBOX"));

	assert_matches!(
		duplicate,
		Err(SubscriptionError::Duplicate { existing, .. }) if existing == original.id
	);
	assert_eq!(engine.subscriptions().list().len(), 1);
}

#[tokio::test]
async fn removing_account_cancels_its_subscriptions() {
	let fetcher = ScriptedFetcher::new();
	let store = store_with_account();
	let engine = engine(&fetcher, &store);
	let mut rx = engine.events();

	engine.start().await.expect("store is readable");
	assert_eq!(engine.sync().running_accounts(), [ACCOUNT]);

	let sub = engine
		.subscribe(
			SubscribeRequest::builder(SubscriptionKind::Realtime)
				.filter(EmailFilter::builder().address(MAILBOX).build())
				.build(),
		)
		.expect("valid request");
	let other = engine
		.subscribe(
			SubscribeRequest::builder(SubscriptionKind::Poll)
				.filter(EmailFilter::builder().address("b@example.com").build())
				.build(),
		)
		.expect("valid request");

	let cancelled = engine
		.remove_account(ACCOUNT)
		.await
		.expect("store is readable");
	assert_eq!(
		cancelled.iter().map(|sub| sub.id).collect::<Vec<_>>(),
		[sub.id]
	);
	assert!(engine.sync().running_accounts().is_empty());
	assert!(engine.subscriptions().get(sub.id).is_none());
	assert!(engine.subscriptions().get(other.id).is_some());

	assert!(common::drain(&mut rx).iter().any(|e| {
		e.subscription_id == Some(sub.id)
			&& matches!(
				e.kind,
				EmailEventKind::Unsubscribed {
					reason: UnsubscribeReason::AccountRemoved
				}
			)
	}));

	engine.stop().await;
}

#[tokio::test]
async fn stop_leaves_nothing_running() {
	let fetcher = ScriptedFetcher::new();
	let store = store_with_account();
	let engine = engine(&fetcher, &store);

	engine.start().await.expect("store is readable");
	engine
		.subscribe(
			SubscribeRequest::builder(SubscriptionKind::Poll)
				.filter(EmailFilter::builder().address("b@example.com").build())
				.build(),
		)
		.expect("valid request");
	assert_eq!(engine.workers().len(), 2);

	engine.stop().await;

	assert!(engine.workers().is_empty());
	assert!(engine.sync().running_accounts().is_empty());
}

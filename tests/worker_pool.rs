/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Subscription-driven workers: their lifecycle in the pool and what their cycles deliver

mod common;

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use chrono::Utc;
use mailsub::{
	EmailEvent, EmailEventKind, EmailFetchScheduler, EmailFilter, FetchError, PoolConfig,
	SchedulerConfig, SubscribeRequest, SubscriptionKind, subscription::UnsubscribeReason,
};
use tokio::{sync::broadcast, time::timeout};

use self::common::{ScriptedFetcher, message};

const MAILBOX: &str = "a@gmail.com";
const IDLE_GRACE: Duration = Duration::from_secs(60);

fn scheduler(fetcher: &Arc<ScriptedFetcher>) -> EmailFetchScheduler<Arc<ScriptedFetcher>, ()> {
	EmailFetchScheduler::builder()
		.fetcher(Arc::clone(fetcher))
		.tokens(())
		.pool_config(
			PoolConfig::builder()
				.unsubscribe_debounce(Duration::from_secs(5))
				.build(),
		)
		.build()
}

fn poll(address: &str) -> SubscribeRequest {
	SubscribeRequest::builder(SubscriptionKind::Poll)
		.filter(EmailFilter::builder().address(address).build())
		.build()
}

/// Receives events until one satisfies `done`, returning all of them
async fn collect_until(
	rx: &mut broadcast::Receiver<EmailEvent>,
	done: impl Fn(&EmailEvent) -> bool,
) -> Vec<EmailEvent> {
	let mut events = Vec::new();

	timeout(Duration::from_secs(5), async {
		loop {
			let event = rx.recv().await.expect("the bus outlives the test");
			let is_done = done(&event);
			events.push(event);

			if is_done {
				break;
			}
		}
	})
	.await
	.expect("the expected event arrives in time");

	events
}

#[tokio::test(start_paused = true)]
async fn resubscribe_within_debounce_keeps_worker() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = scheduler(&fetcher);

	let sub = scheduler.subscribe(poll(MAILBOX)).expect("valid request");
	let worker_id = scheduler.pool().worker(MAILBOX).expect("worker started").id;

	scheduler.unsubscribe(sub.id).expect("subscription exists");
	tokio::time::sleep(Duration::from_secs(2)).await;
	scheduler.subscribe(poll(MAILBOX)).expect("valid request");

	// well past the debounce of the first unsubscribe
	tokio::time::sleep(Duration::from_secs(10)).await;

	let worker = scheduler.pool().worker(MAILBOX).expect("worker kept");
	assert_eq!(worker.id, worker_id);
	assert_eq!(worker.subscriptions, 1);

	scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unreferenced_worker_is_kept_for_idle_grace() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = scheduler(&fetcher);
	let mut rx = scheduler.events().subscribe();

	let sub = scheduler.subscribe(poll(MAILBOX)).expect("valid request");
	scheduler.unsubscribe(sub.id).expect("subscription exists");

	tokio::time::sleep(Duration::from_secs(6)).await;
	let worker = scheduler
		.pool()
		.worker(MAILBOX)
		.expect("worker is kept past the debounce");
	assert_eq!(worker.subscriptions, 0);

	tokio::time::sleep(IDLE_GRACE).await;
	assert!(scheduler.pool().workers().is_empty());

	let events = common::drain(&mut rx);
	assert_matches!(events[0].kind, EmailEventKind::Subscribed);
	assert_matches!(
		events[1].kind,
		EmailEventKind::Unsubscribed {
			reason: UnsubscribeReason::Requested
		}
	);

	scheduler.stop().await;
}

#[tokio::test]
async fn fetch_error_is_reported() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = scheduler(&fetcher);
	let mut rx = scheduler.events().subscribe();

	scheduler.subscribe(poll(MAILBOX)).expect("valid request");
	fetcher.push_err(FetchError::Provider("mailbox is locked".to_owned()));
	assert!(scheduler.trigger(MAILBOX));

	let events = collect_until(&mut rx, |e| {
		matches!(
			e.kind,
			EmailEventKind::FetchError | EmailEventKind::FetchComplete { .. }
		)
	})
	.await;

	let last = events.last().expect("at least one event");
	assert_matches!(last.kind, EmailEventKind::FetchError);
	assert_eq!(last.mailbox, MAILBOX);
	assert!(
		last.error
			.as_deref()
			.is_some_and(|e| e.contains("mailbox is locked")),
		"error message carries its source: {:?}",
		last.error
	);
	assert!(
		events
			.iter()
			.any(|e| matches!(e.kind, EmailEventKind::FetchStart)),
		"fetch start precedes the error"
	);

	scheduler.stop().await;
}

#[tokio::test]
async fn tagged_subscription_only_gets_tagged_mail() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = scheduler(&fetcher);
	let mut rx = scheduler.events().subscribe();

	let promo = scheduler
		.subscribe(poll("a+promo@gmail.com"))
		.expect("valid request");
	let plain = scheduler.subscribe(poll(MAILBOX)).expect("valid request");
	assert_eq!(promo.real_mailbox.as_deref(), Some(MAILBOX));
	assert_eq!(
		scheduler.pool().workers().len(),
		1,
		"both subscriptions share the real mailbox's worker"
	);

	fetcher.push_ok(
		vec![
			message("1", "a+promo@gmail.com"),
			message("2", "Alice <a@gmail.com>"),
		],
		None,
	);
	assert!(scheduler.trigger(MAILBOX));

	let events = collect_until(&mut rx, |e| {
		matches!(e.kind, EmailEventKind::FetchComplete { .. })
	})
	.await;

	let delivered = events
		.iter()
		.filter_map(|e| match &e.kind {
			EmailEventKind::NewEmail { message } => Some((e.subscription_id, message.id.as_str())),
			_ => None,
		})
		.collect::<Vec<_>>();

	assert_eq!(
		delivered,
		[(Some(promo.id), "1"), (Some(plain.id), "2")]
	);
	assert_matches!(
		events.last().map(|e| &e.kind),
		Some(EmailEventKind::FetchComplete {
			fetched: 2,
			matched: 2
		})
	);

	scheduler.stop().await;
}

#[tokio::test]
async fn broadcast_subscription_sees_every_mailbox() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = scheduler(&fetcher);
	let mut rx = scheduler.events().subscribe();

	let broadcast = scheduler
		.subscribe(
			SubscribeRequest::builder(SubscriptionKind::Broadcast)
				.filter(EmailFilter::builder().subject("invoice").build())
				.build(),
		)
		.expect("valid request");
	scheduler.subscribe(poll(MAILBOX)).expect("valid request");

	let invoice = mailsub::EmailMessage::builder()
		.id("1")
		.to("someone-else@example.com")
		.subject("Your invoice")
		.build();
	fetcher.push_ok(vec![invoice], None);
	assert!(scheduler.trigger(MAILBOX));

	let events = collect_until(&mut rx, |e| {
		matches!(e.kind, EmailEventKind::FetchComplete { .. })
	})
	.await;

	let matched = events
		.iter()
		.filter(|e| matches!(e.kind, EmailEventKind::NewEmail { .. }))
		.map(|e| e.subscription_id)
		.collect::<Vec<_>>();
	assert_eq!(matched, [Some(broadcast.id)]);

	scheduler.stop().await;
}

#[tokio::test]
async fn fetches_only_subscribed_folders() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = scheduler(&fetcher);
	let mut rx = scheduler.events().subscribe();

	scheduler
		.subscribe(
			SubscribeRequest::builder(SubscriptionKind::Poll)
				.filter(
					EmailFilter::builder()
						.address(MAILBOX)
						.folder("Sent")
						.folder("INBOX")
						.build(),
				)
				.build(),
		)
		.expect("valid request");
	assert!(scheduler.trigger(MAILBOX));

	collect_until(&mut rx, |e| {
		matches!(e.kind, EmailEventKind::FetchComplete { .. })
	})
	.await;

	let requests = fetcher.requests();
	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].folders, ["INBOX", "Sent"]);
	assert_matches!(requests[0].cursor, mailsub::Cursor::TimeWindow { .. });

	scheduler.stop().await;
}

#[tokio::test]
async fn stop_leaves_no_workers() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = scheduler(&fetcher);
	scheduler.start();

	scheduler.subscribe(poll("a@example.com")).expect("valid request");
	scheduler.subscribe(poll("b@example.com")).expect("valid request");
	assert_eq!(scheduler.pool().workers().len(), 2);

	scheduler.stop().await;

	assert!(scheduler.pool().workers().is_empty());
	assert!(!scheduler.trigger("a@example.com"));
}

#[tokio::test(start_paused = true)]
async fn sweep_reclaims_workers_past_idle_grace() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = EmailFetchScheduler::builder()
		.fetcher(Arc::clone(&fetcher))
		.tokens(())
		.pool_config(
			PoolConfig::builder()
				// leave reclamation to the sweep alone
				.unsubscribe_debounce(Duration::from_secs(60 * 60))
				.reclaim_interval(Duration::from_secs(10))
				.idle_grace(IDLE_GRACE)
				.build(),
		)
		.build();
	scheduler.start();

	let sub = scheduler.subscribe(poll(MAILBOX)).expect("valid request");
	scheduler.unsubscribe(sub.id).expect("subscription exists");

	tokio::time::sleep(IDLE_GRACE / 2).await;
	assert!(scheduler.pool().worker(MAILBOX).is_some());

	tokio::time::sleep(IDLE_GRACE).await;
	assert!(scheduler.pool().workers().is_empty());

	scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn sweep_skips_fetching_worker() {
	let fetcher = ScriptedFetcher::gated();
	let scheduler = EmailFetchScheduler::builder()
		.fetcher(Arc::clone(&fetcher))
		.tokens(())
		.pool_config(
			PoolConfig::builder()
				.unsubscribe_debounce(Duration::from_secs(5))
				.reclaim_interval(Duration::from_secs(10))
				.idle_grace(IDLE_GRACE)
				.build(),
		)
		.build();
	scheduler.start();
	let mut rx = scheduler.events().subscribe();

	let sub = scheduler.subscribe(poll(MAILBOX)).expect("valid request");
	assert!(scheduler.trigger(MAILBOX));
	fetcher.entered.notified().await;
	scheduler.unsubscribe(sub.id).expect("subscription exists");

	// the fetch outlives the debounce and several sweeps
	tokio::time::sleep(IDLE_GRACE * 3).await;
	let worker = scheduler
		.pool()
		.worker(MAILBOX)
		.expect("a fetching worker is never reclaimed");
	assert!(worker.fetching);

	fetcher.release();
	collect_until(&mut rx, |e| {
		matches!(e.kind, EmailEventKind::FetchComplete { .. })
	})
	.await;

	// idle from the end of the fetch on
	tokio::time::sleep(IDLE_GRACE + Duration::from_secs(20)).await;
	assert!(scheduler.pool().workers().is_empty());

	scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_aborts_fetch_past_deadline() {
	let fetcher = ScriptedFetcher::gated();
	let scheduler = EmailFetchScheduler::builder()
		.fetcher(Arc::clone(&fetcher))
		.tokens(())
		.config(
			SchedulerConfig::builder()
				.shutdown_deadline(Duration::from_secs(1))
				.build(),
		)
		.build();
	scheduler.start();

	scheduler.subscribe(poll("a@example.com")).expect("valid request");
	scheduler.subscribe(poll("b@example.com")).expect("valid request");
	assert!(scheduler.trigger("a@example.com"));
	fetcher.entered.notified().await;

	// the fetch of a@ never finishes, b@ stops right away
	timeout(Duration::from_secs(10), scheduler.stop())
		.await
		.expect("stop returns after the deadline");

	assert!(scheduler.pool().workers().is_empty());
	assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn expired_subscription_releases_worker() {
	let fetcher = ScriptedFetcher::new();
	let scheduler = EmailFetchScheduler::builder()
		.fetcher(Arc::clone(&fetcher))
		.tokens(())
		.config(
			SchedulerConfig::builder()
				.expiry_sweep_interval(Duration::from_millis(50))
				.build(),
		)
		.build();
	scheduler.start();
	let mut rx = scheduler.events().subscribe();

	let sub = scheduler
		.subscribe(
			SubscribeRequest::builder(SubscriptionKind::Poll)
				.filter(EmailFilter::builder().address(MAILBOX).build())
				.expires_at(Utc::now() + chrono::Duration::milliseconds(200))
				.build(),
		)
		.expect("valid request");

	let events = collect_until(&mut rx, |e| {
		matches!(e.kind, EmailEventKind::Unsubscribed { .. })
	})
	.await;

	let last = events.last().expect("at least one event");
	assert_eq!(last.subscription_id, Some(sub.id));
	assert_matches!(
		last.kind,
		EmailEventKind::Unsubscribed {
			reason: UnsubscribeReason::Expired
		}
	);
	assert!(scheduler.subscriptions().get(sub.id).is_none());
	assert_eq!(
		scheduler.pool().worker(MAILBOX).map(|w| w.subscriptions),
		Some(0)
	);

	scheduler.stop().await;
}

#![forbid(unsafe_code)]

use tavern_domain::{ChannelId, UserId};
use tavern_protocol::{Envelope, ServerEvent};
use tokio::sync::mpsc;

use crate::server::hub::{ChannelHub, ChannelHubConfig};
use crate::server::testkit::{Outbound, assert_no_event, recv_event};

fn hub() -> ChannelHub {
	ChannelHub::new(ChannelHubConfig::default())
}

fn queue() -> (mpsc::Sender<Envelope<ServerEvent>>, Outbound) {
	mpsc::channel(16)
}

fn marker(n: i64) -> ServerEvent {
	ServerEvent::UserOnline { id: UserId(n) }
}

#[tokio::test]
async fn publish_reaches_only_that_scope() {
	let hub = hub();
	let (tx_a, mut rx_a) = queue();
	let (tx_b, mut rx_b) = queue();

	hub.subscribe(ChannelId(1), 1, tx_a).await;
	hub.subscribe(ChannelId(2), 2, tx_b).await;

	let delivered = hub.publish(ChannelId(1), marker(10)).await;
	assert_eq!(delivered, 1);

	assert_eq!(recv_event(&mut rx_a).await, marker(10));
	assert_no_event(&mut rx_b);
}

#[tokio::test]
async fn publish_except_skips_the_actor() {
	let hub = hub();
	let (tx_a, mut rx_a) = queue();
	let (tx_b, mut rx_b) = queue();

	hub.subscribe(ChannelId(1), 1, tx_a).await;
	hub.subscribe(ChannelId(1), 2, tx_b).await;

	let delivered = hub.publish_except(ChannelId(1), 1, marker(10)).await;
	assert_eq!(delivered, 1);

	assert_no_event(&mut rx_a);
	assert_eq!(recv_event(&mut rx_b).await, marker(10));
}

#[tokio::test]
async fn unsubscribe_all_reports_left_scopes() {
	let hub = hub();
	let (tx, _rx) = queue();

	hub.subscribe(ChannelId(1), 7, tx.clone()).await;
	hub.subscribe(ChannelId(2), 7, tx).await;

	let mut left = hub.unsubscribe_all(7).await;
	left.sort();
	assert_eq!(left, vec![ChannelId(1), ChannelId(2)]);

	assert_eq!(hub.publish(ChannelId(1), marker(1)).await, 0);
	assert!(hub.unsubscribe_all(7).await.is_empty());
}

#[tokio::test]
async fn retired_scope_reaches_nobody() {
	let hub = hub();
	let (tx, mut rx) = queue();

	hub.subscribe(ChannelId(1), 1, tx).await;
	hub.retire(ChannelId(1)).await;

	assert_eq!(hub.publish(ChannelId(1), marker(1)).await, 0);
	assert_no_event(&mut rx);
}

#[tokio::test]
async fn closed_subscribers_are_pruned() {
	let hub = hub();
	let (tx, rx) = queue();

	hub.subscribe(ChannelId(1), 1, tx).await;
	drop(rx);

	assert_eq!(hub.publish(ChannelId(1), marker(1)).await, 0);
	let counts = hub.subscriber_counts().await;
	assert!(counts.is_empty(), "dead scope should be gone, got: {counts:?}");
}

#[tokio::test]
async fn full_queue_drops_without_blocking() {
	let hub = hub();
	let (tx, mut rx) = mpsc::channel(1);

	hub.subscribe(ChannelId(1), 1, tx).await;

	assert_eq!(hub.publish(ChannelId(1), marker(1)).await, 1);
	// Queue is full now; the second publish must not block or deliver.
	assert_eq!(hub.publish(ChannelId(1), marker(2)).await, 0);

	assert_eq!(recv_event(&mut rx).await, marker(1));
	assert_no_event(&mut rx);
}

#[tokio::test]
async fn resubscribe_replaces_previous_sender() {
	let hub = hub();
	let (tx_old, mut rx_old) = queue();
	let (tx_new, mut rx_new) = queue();

	hub.subscribe(ChannelId(1), 1, tx_old).await;
	hub.subscribe(ChannelId(1), 1, tx_new).await;

	assert_eq!(hub.publish(ChannelId(1), marker(1)).await, 1);
	assert_no_event(&mut rx_old);
	assert_eq!(recv_event(&mut rx_new).await, marker(1));
}

#![forbid(unsafe_code)]

use tavern_domain::UserId;
use tavern_protocol::ServerEvent;

use crate::server::testkit::{assert_no_event, connect, core, recv_envelope};

#[tokio::test]
async fn last_registration_wins() {
	let core = core();
	let user = UserId(1);

	let (first, _rx_first) = connect(&core, user, 1).await;
	let (_second, _rx_second) = connect(&core, user, 2).await;

	let current = core.registry.handle(user).await.expect("user online");
	assert_eq!(current.conn_id, 2);
	assert_eq!(core.registry.online_count().await, 1);

	// The displaced handle still exists but is no longer routable.
	assert_eq!(first.conn_id, 1);
}

#[tokio::test]
async fn stale_unregister_does_not_evict_reconnect() {
	let core = core();
	let user = UserId(1);

	let (_old, _rx_old) = connect(&core, user, 1).await;
	let (_new, _rx_new) = connect(&core, user, 2).await;

	// The old connection tears down after being displaced.
	assert!(!core.registry.unregister(user, 1).await);
	assert!(core.registry.is_online(user).await);

	assert!(core.registry.unregister(user, 2).await);
	assert!(!core.registry.is_online(user).await);
}

#[tokio::test]
async fn send_targets_one_user() {
	let core = core();
	let alice = UserId(1);
	let bob = UserId(2);

	let (_a, mut rx_a) = connect(&core, alice, 1).await;
	let (_b, mut rx_b) = connect(&core, bob, 2).await;

	assert!(core.registry.send(alice, ServerEvent::UserOnline { id: bob }).await);

	let envelope = recv_envelope(&mut rx_a).await;
	assert_eq!(envelope.event, ServerEvent::UserOnline { id: bob });
	assert!(envelope.request_id.is_empty());

	assert_no_event(&mut rx_b);
}

#[tokio::test]
async fn send_to_offline_user_is_dropped() {
	let core = core();
	assert!(!core.registry.send(UserId(9), ServerEvent::UserOnline { id: UserId(1) }).await);
}

#![forbid(unsafe_code)]

use tavern_domain::{ConversationId, Presence, UserId};
use tavern_protocol::ServerEvent;

use crate::server::channels::ChannelManager;
use crate::server::error::EventError;
use crate::server::friends::FriendManager;
use crate::server::testkit::{assert_no_event, connect, core, expect_channel_created, recv_event, seed_user};

#[tokio::test]
async fn request_then_accept_notifies_both_ends() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;
	let (_a, mut rx_a) = connect(&core, alice, 1).await;
	let (_b, mut rx_b) = connect(&core, bob, 2).await;

	friends.friend_request(alice, bob).await.unwrap();

	let conversation = match recv_event(&mut rx_b).await {
		ServerEvent::FriendRequestReceived { from } => {
			assert_eq!(from.id, alice);
			assert!(from.pending);
			from.conversation_id
		}
		other => panic!("expected friendRequestReceived, got: {other:?}"),
	};

	friends.accept_friend_request(bob, alice).await.unwrap();

	match recv_event(&mut rx_a).await {
		ServerEvent::FriendRequestAccepted { friend } => {
			assert_eq!(friend.id, bob);
			assert!(!friend.pending);
			assert_eq!(friend.conversation_id, conversation);
		}
		other => panic!("expected friendRequestAccepted, got: {other:?}"),
	}
	match recv_event(&mut rx_b).await {
		ServerEvent::FriendRequestAccepted { friend } => assert_eq!(friend.id, alice),
		other => panic!("expected friendRequestAccepted, got: {other:?}"),
	}
}

#[tokio::test]
async fn requests_are_validated() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;

	let err = friends.friend_request(alice, alice).await.unwrap_err();
	assert!(matches!(err, EventError::Validation(_)), "self request: {err:?}");

	let err = friends.friend_request(alice, UserId(99)).await.unwrap_err();
	assert!(matches!(err, EventError::NotFound(_)), "unknown recipient: {err:?}");

	friends.friend_request(alice, bob).await.unwrap();
	let err = friends.friend_request(alice, bob).await.unwrap_err();
	assert!(matches!(err, EventError::Validation(_)), "duplicate: {err:?}");

	// The reverse direction hits the same edge.
	let err = friends.friend_request(bob, alice).await.unwrap_err();
	assert!(matches!(err, EventError::Validation(_)), "reverse duplicate: {err:?}");
}

#[tokio::test]
async fn only_the_recipient_may_accept() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;

	friends.friend_request(alice, bob).await.unwrap();

	// The requester cannot accept their own request.
	let err = friends.accept_friend_request(alice, bob).await.unwrap_err();
	assert!(matches!(err, EventError::Authorization(_)), "got: {err:?}");

	friends.accept_friend_request(bob, alice).await.unwrap();

	// A second accept finds the edge no longer pending.
	let err = friends.accept_friend_request(bob, alice).await.unwrap_err();
	assert!(matches!(err, EventError::Validation(_)), "got: {err:?}");
}

#[tokio::test]
async fn decline_drops_the_edge_and_notifies_the_sender() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;
	let (_a, mut rx_a) = connect(&core, alice, 1).await;

	friends.friend_request(alice, bob).await.unwrap();
	friends.decline_friend_request(bob, alice).await.unwrap();

	assert_eq!(recv_event(&mut rx_a).await, ServerEvent::FriendRequestDeclined { id: bob });
	assert!(core.store.friend_edge(alice, bob).await.unwrap().is_none());

	// Declining leaves the pair free to try again.
	friends.friend_request(alice, bob).await.unwrap();
}

#[tokio::test]
async fn delete_friend_requires_the_matching_conversation() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;
	let (_b, mut rx_b) = connect(&core, bob, 2).await;

	friends.friend_request(alice, bob).await.unwrap();
	friends.accept_friend_request(bob, alice).await.unwrap();
	let edge = core.store.friend_edge(alice, bob).await.unwrap().expect("edge");
	// Drain the request/accept notifications.
	recv_event(&mut rx_b).await;
	recv_event(&mut rx_b).await;

	let err = friends.delete_friend(alice, bob, ConversationId(999)).await.unwrap_err();
	assert!(matches!(err, EventError::Validation(_)), "got: {err:?}");

	friends.delete_friend(alice, bob, edge.conversation_id).await.unwrap();
	assert_eq!(
		recv_event(&mut rx_b).await,
		ServerEvent::FriendDeleted {
			id: alice,
			conversation_id: edge.conversation_id,
		}
	);
	assert!(core.store.friend_edge(alice, bob).await.unwrap().is_none());
}

#[tokio::test]
async fn private_messages_echo_to_both_ends() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;
	let (_a, mut rx_a) = connect(&core, alice, 1).await;
	let (_b, mut rx_b) = connect(&core, bob, 2).await;

	friends.friend_request(alice, bob).await.unwrap();
	friends.accept_friend_request(bob, alice).await.unwrap();
	let edge = core.store.friend_edge(alice, bob).await.unwrap().expect("edge");
	recv_event(&mut rx_a).await; // accepted
	recv_event(&mut rx_b).await; // request
	recv_event(&mut rx_b).await; // accepted

	friends
		.send_private_message(alice, edge.conversation_id, "hi bob".to_string())
		.await
		.unwrap();

	for rx in [&mut rx_a, &mut rx_b] {
		match recv_event(rx).await {
			ServerEvent::PrivateMessage { message } => {
				assert_eq!(message.author_id, alice);
				assert_eq!(message.content, "hi bob");
				assert_eq!(message.conversation_id, edge.conversation_id);
			}
			other => panic!("expected privateMessage, got: {other:?}"),
		}
	}
}

#[tokio::test]
async fn pending_conversations_reject_messages() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;

	friends.friend_request(alice, bob).await.unwrap();
	let edge = core.store.friend_edge(alice, bob).await.unwrap().expect("edge");

	let err = friends
		.send_private_message(alice, edge.conversation_id, "too soon".to_string())
		.await
		.unwrap_err();
	assert!(matches!(err, EventError::Authorization(_)), "got: {err:?}");
}

#[tokio::test]
async fn history_is_participants_only() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;
	let carol = seed_user(&core, 3, "carol").await;
	let (_a, mut rx_a) = connect(&core, alice, 1).await;

	friends.friend_request(alice, bob).await.unwrap();
	friends.accept_friend_request(bob, alice).await.unwrap();
	let edge = core.store.friend_edge(alice, bob).await.unwrap().expect("edge");
	recv_event(&mut rx_a).await; // accepted

	friends
		.send_private_message(alice, edge.conversation_id, "hello".to_string())
		.await
		.unwrap();
	recv_event(&mut rx_a).await; // own echo

	let err = friends.private_history(carol, edge.conversation_id).await.unwrap_err();
	assert!(matches!(err, EventError::Authorization(_)), "got: {err:?}");

	friends.private_history(alice, edge.conversation_id).await.unwrap();
	match recv_event(&mut rx_a).await {
		ServerEvent::PrivateMessageHistory { conversation_id, messages } => {
			assert_eq!(conversation_id, edge.conversation_id);
			assert_eq!(messages.len(), 1);
		}
		other => panic!("expected privateMessageHistory, got: {other:?}"),
	}
}

#[tokio::test]
async fn presence_reaches_accepted_friends_only() {
	let core = core();
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;
	let carol = seed_user(&core, 3, "carol").await;
	let (_b, mut rx_b) = connect(&core, bob, 2).await;
	let (_c, mut rx_c) = connect(&core, carol, 3).await;

	// bob is an accepted friend; carol's request is still pending.
	friends.friend_request(alice, bob).await.unwrap();
	friends.accept_friend_request(bob, alice).await.unwrap();
	friends.friend_request(alice, carol).await.unwrap();
	recv_event(&mut rx_b).await; // request
	recv_event(&mut rx_b).await; // accepted
	recv_event(&mut rx_c).await; // request

	friends.broadcast_presence(alice, Presence::Online).await.unwrap();
	assert_eq!(recv_event(&mut rx_b).await, ServerEvent::UserOnline { id: alice });
	assert_no_event(&mut rx_c);

	friends.broadcast_presence(alice, Presence::Offline).await.unwrap();
	assert_eq!(recv_event(&mut rx_b).await, ServerEvent::UserOffline { id: alice });
	assert_no_event(&mut rx_c);
}

#[tokio::test]
async fn presence_reaches_channel_scope_members() {
	let core = core();
	let channels = ChannelManager::new(core.clone());
	let friends = FriendManager::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let bob = seed_user(&core, 2, "bob").await;
	let (a, mut rx_a) = connect(&core, alice, 1).await;
	let (b, mut rx_b) = connect(&core, bob, 2).await;

	// alice and bob share a channel but are not friends.
	channels
		.create_channel(&a, alice, "den".to_string(), Some("tavern-door".to_string()), None)
		.await
		.unwrap();
	expect_channel_created(&mut rx_a).await;
	channels.join_by_invite(&b, bob, "tavern-door").await.unwrap();
	recv_event(&mut rx_a).await; // userJoinedChannel
	expect_channel_created(&mut rx_b).await;

	friends.broadcast_presence(bob, Presence::Online).await.unwrap();
	assert_eq!(recv_event(&mut rx_a).await, ServerEvent::UserOnline { id: bob });

	friends.broadcast_presence(bob, Presence::Offline).await.unwrap();
	assert_eq!(recv_event(&mut rx_a).await, ServerEvent::UserOffline { id: bob });
}

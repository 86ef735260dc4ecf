#![forbid(unsafe_code)]

use tavern_protocol::{AckStatus, ClientEvent, Envelope, ServerEvent};

use crate::server::dispatch::MessageDispatcher;
use crate::server::testkit::{assert_no_event, connect, core, expect_channel_created, recv_envelope, seed_user};

#[tokio::test]
async fn mutating_events_get_exactly_one_correlated_ack() {
	let core = core();
	let dispatcher = MessageDispatcher::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let (handle, mut rx) = connect(&core, alice, 1).await;

	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::reply(
				"req-7",
				ClientEvent::CreateChannel {
					name: "den".to_string(),
					invite_code: None,
					avatar: None,
				},
			),
		)
		.await;

	// The channel payload lands first, then the single ack.
	expect_channel_created(&mut rx).await;

	let ack = recv_envelope(&mut rx).await;
	assert_eq!(ack.request_id, "req-7");
	match ack.event {
		ServerEvent::Ack(ack) => {
			assert_eq!(ack.status, AckStatus::Ok);
			assert!(ack.message.is_none());
		}
		other => panic!("expected ack, got: {other:?}"),
	}

	assert_no_event(&mut rx);
}

#[tokio::test]
async fn failed_mutations_ack_with_the_error_message() {
	let core = core();
	let dispatcher = MessageDispatcher::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let (handle, mut rx) = connect(&core, alice, 1).await;

	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::reply(
				"req-8",
				ClientEvent::CreateRoom {
					channel_id: tavern_domain::ChannelId(999),
					name: "plans".to_string(),
				},
			),
		)
		.await;

	let ack = recv_envelope(&mut rx).await;
	assert_eq!(ack.request_id, "req-8");
	match ack.event {
		ServerEvent::Ack(ack) => {
			assert_eq!(ack.status, AckStatus::Error);
			assert_eq!(ack.message.as_deref(), Some("unknown channel"));
		}
		other => panic!("expected ack, got: {other:?}"),
	}
}

#[tokio::test]
async fn update_user_gets_one_correlated_ack() {
	let core = core();
	let dispatcher = MessageDispatcher::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let (handle, mut rx) = connect(&core, alice, 1).await;

	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::reply(
				"req-9",
				ClientEvent::UpdateUser {
					values: tavern_protocol::UserValues {
						pseudo: "alice the brave".to_string(),
						description: "shield maiden".to_string(),
					},
					avatar: None,
				},
			),
		)
		.await;

	// No channels to fan out to; the only event is the ack.
	let ack = recv_envelope(&mut rx).await;
	assert_eq!(ack.request_id, "req-9");
	match ack.event {
		ServerEvent::Ack(ack) => assert_eq!(ack.status, AckStatus::Ok),
		other => panic!("expected ack, got: {other:?}"),
	}
	assert_no_event(&mut rx);

	// Validation failures surface through the same single ack.
	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::reply(
				"req-10",
				ClientEvent::UpdateUser {
					values: tavern_protocol::UserValues {
						pseudo: "   ".to_string(),
						description: String::new(),
					},
					avatar: None,
				},
			),
		)
		.await;

	let ack = recv_envelope(&mut rx).await;
	assert_eq!(ack.request_id, "req-10");
	match ack.event {
		ServerEvent::Ack(ack) => {
			assert_eq!(ack.status, AckStatus::Error);
			assert_eq!(ack.message.as_deref(), Some("pseudo must not be empty"));
		}
		other => panic!("expected ack, got: {other:?}"),
	}
}

#[tokio::test]
async fn fire_and_forget_failures_are_silent() {
	let core = core();
	let dispatcher = MessageDispatcher::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let (handle, mut rx) = connect(&core, alice, 1).await;

	// Queries never ack, not even on failure.
	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::event(ClientEvent::GetChannelMembers {
				channel_id: tavern_domain::ChannelId(999),
			}),
		)
		.await;

	assert_no_event(&mut rx);
}

#[tokio::test]
async fn hello_is_rejected_after_authentication() {
	let core = core();
	let dispatcher = MessageDispatcher::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let (handle, mut rx) = connect(&core, alice, 1).await;

	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::event(ClientEvent::Hello {
				token: "again".to_string(),
			}),
		)
		.await;

	// hello is not an acked event; the rejection is only logged.
	assert_no_event(&mut rx);
}

#[tokio::test]
async fn send_message_fans_out_through_the_channel_scope() {
	let core = core();
	let dispatcher = MessageDispatcher::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let (handle, mut rx) = connect(&core, alice, 1).await;

	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::reply(
				"req-1",
				ClientEvent::CreateChannel {
					name: "den".to_string(),
					invite_code: None,
					avatar: None,
				},
			),
		)
		.await;
	let channel = expect_channel_created(&mut rx).await;
	recv_envelope(&mut rx).await; // ack

	let general = channel.rooms[0].id;
	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::event(ClientEvent::SendMessage {
				room_id: general,
				content: "  round of ale  ".to_string(),
			}),
		)
		.await;

	// The author hears their own message through the scope; no ack.
	match recv_envelope(&mut rx).await.event {
		ServerEvent::Message { message } => {
			assert_eq!(message.room_id, general);
			assert_eq!(message.author_id, alice);
			assert_eq!(message.content, "round of ale");
		}
		other => panic!("expected message, got: {other:?}"),
	}
	assert_no_event(&mut rx);
}

#[tokio::test]
async fn leave_room_is_a_server_side_noop() {
	let core = core();
	let dispatcher = MessageDispatcher::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let (handle, mut rx) = connect(&core, alice, 1).await;

	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::event(ClientEvent::LeaveRoom {
				room_id: tavern_domain::RoomId(42),
			}),
		)
		.await;

	assert_no_event(&mut rx);
}

#[tokio::test]
async fn oversized_messages_are_rejected() {
	let core = core();
	let dispatcher = MessageDispatcher::new(core.clone());
	let alice = seed_user(&core, 1, "alice").await;
	let (handle, mut rx) = connect(&core, alice, 1).await;

	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::reply(
				"req-1",
				ClientEvent::CreateChannel {
					name: "den".to_string(),
					invite_code: None,
					avatar: None,
				},
			),
		)
		.await;
	let channel = expect_channel_created(&mut rx).await;
	recv_envelope(&mut rx).await; // ack

	let general = channel.rooms[0].id;
	dispatcher
		.dispatch(
			&handle,
			alice,
			Envelope::event(ClientEvent::SendMessage {
				room_id: general,
				content: "x".repeat(2001),
			}),
		)
		.await;

	// Rejected, and sendMessage carries no ack either way.
	assert_no_event(&mut rx);
	assert!(
		core.store
			.messages_page(general, 0, 10)
			.await
			.unwrap()
			.is_empty()
	);
}

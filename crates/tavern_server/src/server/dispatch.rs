#![forbid(unsafe_code)]

use std::sync::Arc;

use metrics::counter;
use tavern_domain::{RoomId, UserId};
use tavern_protocol::{Ack, ClientEvent, Envelope, ServerEvent};
use tracing::{debug, warn};

use crate::util::time::unix_ms_now;

use super::channels::ChannelManager;
use super::core::{Core, message_info, validate_content};
use super::error::EventError;
use super::friends::FriendManager;
use super::gate;
use super::registry::ConnectionHandle;
use super::rooms::RoomManager;
use super::users::UserManager;

/// Routes authenticated client events to the managers and owns the ack
/// discipline: mutating events get exactly one ack, queries and streams
/// are fire-and-forget with failures logged.
pub struct MessageDispatcher {
	core: Arc<Core>,
	channels: ChannelManager,
	rooms: RoomManager,
	friends: FriendManager,
	users: UserManager,
}

impl MessageDispatcher {
	pub fn new(core: Arc<Core>) -> Self {
		Self {
			channels: ChannelManager::new(core.clone()),
			rooms: RoomManager::new(core.clone()),
			friends: FriendManager::new(core.clone()),
			users: UserManager::new(core.clone()),
			core,
		}
	}

	pub fn friends(&self) -> &FriendManager {
		&self.friends
	}

	pub fn channels(&self) -> &ChannelManager {
		&self.channels
	}

	/// Handle one decoded envelope from an authenticated connection.
	pub async fn dispatch(&self, actor: &ConnectionHandle, actor_id: UserId, envelope: Envelope<ClientEvent>) {
		let request_id = envelope.request_id;
		let event = envelope.event;
		let name = event_name(&event);
		let acked = requires_ack(&event);

		counter!("tavern_events_total", "event" => name).increment(1);

		match self.handle(actor, actor_id, event).await {
			Ok(()) => {
				if acked {
					self.send_ack(actor, request_id, Ack::ok()).await;
				}
			}
			Err(err) => {
				match &err {
					EventError::Infrastructure(source) => {
						warn!(event = name, user = %actor_id, error = %source, "event failed");
					}
					other => {
						debug!(event = name, user = %actor_id, error = %other, "event rejected");
					}
				}
				counter!("tavern_event_errors_total", "event" => name).increment(1);

				if acked {
					self.send_ack(actor, request_id, err.to_ack()).await;
				}
			}
		}
	}

	async fn handle(&self, actor: &ConnectionHandle, actor_id: UserId, event: ClientEvent) -> Result<(), EventError> {
		match event {
			ClientEvent::Hello { .. } => Err(EventError::validation("connection is already authenticated")),

			ClientEvent::GetChannels => self.channels.list_channels(actor_id).await,
			ClientEvent::CreateChannel {
				name,
				invite_code,
				avatar,
			} => self.channels.create_channel(actor, actor_id, name, invite_code, avatar).await,
			ClientEvent::JoinChannelByInvite { invite_code } => {
				self.channels.join_by_invite(actor, actor_id, &invite_code).await
			}
			ClientEvent::UpdateChannel {
				channel_id,
				values,
				avatar,
			} => self.channels.update_channel(actor_id, channel_id, values, avatar).await,
			ClientEvent::DeleteChannel { channel_id } => self.channels.delete_channel(actor_id, channel_id).await,
			ClientEvent::LeaveChannel { channel_id } => self.channels.leave_channel(actor, actor_id, channel_id).await,
			ClientEvent::JoinChannel { channel_id } => self.channels.join_channel(actor, actor_id, channel_id).await,
			ClientEvent::GetChannelMembers { channel_id } => self.channels.member_list(actor_id, channel_id).await,
			ClientEvent::LoadMoreMembers { channel_id, offset } => {
				self.channels.more_members(actor_id, channel_id, offset).await
			}

			ClientEvent::CreateRoom { channel_id, name } => self.rooms.create_room(actor_id, channel_id, name).await,
			ClientEvent::UpdateRoom {
				channel_id,
				room_id,
				name,
				index,
			} => self.rooms.update_room(actor_id, channel_id, room_id, name, index).await,
			ClientEvent::DeleteRoom { channel_id, room_id } => {
				self.rooms.delete_room(actor_id, channel_id, room_id).await
			}
			ClientEvent::JoinRoom { room_id } => self.rooms.join_room(actor_id, room_id).await,
			// Reading stops client-side; there is no per-room subscription
			// to tear down on the server.
			ClientEvent::LeaveRoom { .. } => Ok(()),
			ClientEvent::LoadMoreMessages { room_id, offset } => {
				self.rooms.more_messages(actor_id, room_id, offset).await
			}
			ClientEvent::SendMessage { room_id, content } => self.send_room_message(actor_id, room_id, content).await,

			ClientEvent::UpdateUser { values, avatar } => self.users.update_user(actor_id, values, avatar).await,

			ClientEvent::FriendRequest { recipient_id } => self.friends.friend_request(actor_id, recipient_id).await,
			ClientEvent::AcceptFriendRequest { sender_id } => {
				self.friends.accept_friend_request(actor_id, sender_id).await
			}
			ClientEvent::DeclineFriendRequest { sender_id } => {
				self.friends.decline_friend_request(actor_id, sender_id).await
			}
			ClientEvent::DeleteFriend {
				friend_id,
				conversation_id,
			} => self.friends.delete_friend(actor_id, friend_id, conversation_id).await,
			ClientEvent::SendPrivateMessage {
				conversation_id,
				content,
			} => self.friends.send_private_message(actor_id, conversation_id, content).await,
			ClientEvent::GetPrivateMessagesHistory { conversation_id } => {
				self.friends.private_history(actor_id, conversation_id).await
			}
			ClientEvent::LoadMorePrivateMessages {
				conversation_id,
				offset,
			} => self.friends.more_private_messages(actor_id, conversation_id, offset).await,
		}
	}

	/// `sendMessage`: persist, then fan out to the room's channel scope.
	/// Clients filter by `roomId`; the author receives their own message
	/// through the scope like everyone else.
	async fn send_room_message(&self, actor_id: UserId, room_id: RoomId, content: String) -> Result<(), EventError> {
		let room = self
			.core
			.store
			.room(room_id)
			.await?
			.ok_or_else(|| EventError::not_found("unknown room"))?;
		gate::authorize_member(self.core.store.as_ref(), actor_id, room.channel_id).await?;

		let content = validate_content(&content)?;
		let message = self
			.core
			.store
			.append_message(room_id, actor_id, content, unix_ms_now())
			.await?;

		counter!("tavern_messages_total").increment(1);
		self.core
			.hub
			.publish(room.channel_id, ServerEvent::Message { message: message_info(&message) })
			.await;
		Ok(())
	}

	/// Acks are awaited, not `try_send`: losing an ack strands the client
	/// request, so backpressure here is worth the wait.
	async fn send_ack(&self, actor: &ConnectionHandle, request_id: String, ack: Ack) {
		let envelope = Envelope::reply(request_id, ServerEvent::Ack(ack));
		if actor.tx.send(envelope).await.is_err() {
			debug!(conn_id = actor.conn_id, "ack dropped: connection closed");
		}
	}
}

/// Mutating events that contract for exactly one ack.
fn requires_ack(event: &ClientEvent) -> bool {
	matches!(
		event,
		ClientEvent::CreateChannel { .. }
			| ClientEvent::JoinChannelByInvite { .. }
			| ClientEvent::UpdateChannel { .. }
			| ClientEvent::DeleteChannel { .. }
			| ClientEvent::LeaveChannel { .. }
			| ClientEvent::CreateRoom { .. }
			| ClientEvent::UpdateRoom { .. }
			| ClientEvent::DeleteRoom { .. }
			| ClientEvent::UpdateUser { .. }
			| ClientEvent::FriendRequest { .. }
			| ClientEvent::AcceptFriendRequest { .. }
	)
}

fn event_name(event: &ClientEvent) -> &'static str {
	match event {
		ClientEvent::Hello { .. } => "hello",
		ClientEvent::GetChannels => "getChannels",
		ClientEvent::CreateChannel { .. } => "createChannel",
		ClientEvent::JoinChannelByInvite { .. } => "joinChannelByInvite",
		ClientEvent::UpdateChannel { .. } => "updateChannel",
		ClientEvent::DeleteChannel { .. } => "deleteChannel",
		ClientEvent::LeaveChannel { .. } => "leaveChannel",
		ClientEvent::JoinChannel { .. } => "joinChannel",
		ClientEvent::GetChannelMembers { .. } => "getChannelMembers",
		ClientEvent::LoadMoreMembers { .. } => "loadMoreMembers",
		ClientEvent::CreateRoom { .. } => "createRoom",
		ClientEvent::UpdateRoom { .. } => "updateRoom",
		ClientEvent::DeleteRoom { .. } => "deleteRoom",
		ClientEvent::JoinRoom { .. } => "joinRoom",
		ClientEvent::LeaveRoom { .. } => "leaveRoom",
		ClientEvent::LoadMoreMessages { .. } => "loadMoreMessages",
		ClientEvent::SendMessage { .. } => "sendMessage",
		ClientEvent::UpdateUser { .. } => "updateUser",
		ClientEvent::FriendRequest { .. } => "friendRequest",
		ClientEvent::AcceptFriendRequest { .. } => "acceptFriendRequest",
		ClientEvent::DeclineFriendRequest { .. } => "declineFriendRequest",
		ClientEvent::DeleteFriend { .. } => "deleteFriend",
		ClientEvent::SendPrivateMessage { .. } => "sendPrivateMessage",
		ClientEvent::GetPrivateMessagesHistory { .. } => "getPrivateMessagesHistory",
		ClientEvent::LoadMorePrivateMessages { .. } => "loadMorePrivateMessages",
	}
}

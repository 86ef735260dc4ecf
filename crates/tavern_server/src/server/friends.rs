#![forbid(unsafe_code)]

use std::sync::Arc;

use tavern_domain::{ConversationId, FriendEdge, FriendStatus, Presence, User, UserId};
use tavern_protocol::ServerEvent;
use tracing::info;

use crate::util::time::unix_ms_now;

use super::core::{Core, private_message_info, validate_content};
use super::error::EventError;

/// Friend graph, presence fan-out and private conversations.
pub struct FriendManager {
	core: Arc<Core>,
}

impl FriendManager {
	pub fn new(core: Arc<Core>) -> Self {
		Self { core }
	}

	/// `friendRequest`: create the pending edge and its conversation, then
	/// notify the recipient if they are online.
	pub async fn friend_request(&self, actor_id: UserId, recipient_id: UserId) -> Result<(), EventError> {
		if actor_id == recipient_id {
			return Err(EventError::validation("cannot send a friend request to yourself"));
		}

		self.user(recipient_id).await?;
		if self.core.store.friend_edge(actor_id, recipient_id).await?.is_some() {
			return Err(EventError::validation("already friends or request pending"));
		}

		let now = unix_ms_now();
		let conversation = self.core.store.create_conversation(now).await?;
		let edge = FriendEdge {
			requester: actor_id,
			recipient: recipient_id,
			status: FriendStatus::Pending,
			conversation_id: conversation,
			created_at_ms: now,
		};
		self.core.store.insert_friend_edge(edge.clone()).await?;

		let actor = self.user(actor_id).await?;
		let from = self.core.friend_info(&edge, &actor, Presence::Online);
		self.core.registry.send(recipient_id, ServerEvent::FriendRequestReceived { from }).await;
		Ok(())
	}

	/// `acceptFriendRequest`: only the recipient of a pending request may
	/// accept it. Both ends learn about the new friend.
	pub async fn accept_friend_request(&self, actor_id: UserId, sender_id: UserId) -> Result<(), EventError> {
		let edge = self.pending_request_to(actor_id, sender_id).await?;
		let edge = self
			.core
			.store
			.set_friend_status(edge.requester, edge.recipient, FriendStatus::Accepted)
			.await?;

		let actor = self.user(actor_id).await?;
		let sender = self.user(sender_id).await?;

		let sender_presence = Presence::from_connected(self.core.registry.is_online(sender_id).await);
		let friend_of_sender = self.core.friend_info(&edge, &actor, Presence::Online);
		let friend_of_actor = self.core.friend_info(&edge, &sender, sender_presence);

		self.core
			.registry
			.send(sender_id, ServerEvent::FriendRequestAccepted { friend: friend_of_sender })
			.await;
		self.core
			.registry
			.send(actor_id, ServerEvent::FriendRequestAccepted { friend: friend_of_actor })
			.await;
		Ok(())
	}

	/// `declineFriendRequest`: drops the pending edge and its conversation.
	pub async fn decline_friend_request(&self, actor_id: UserId, sender_id: UserId) -> Result<(), EventError> {
		self.pending_request_to(actor_id, sender_id).await?;
		self.core.store.delete_friend_edge(actor_id, sender_id).await?;
		self.core.registry.send(sender_id, ServerEvent::FriendRequestDeclined { id: actor_id }).await;
		Ok(())
	}

	/// `deleteFriend`: either end may sever an accepted edge; the
	/// conversation and its history go with it.
	pub async fn delete_friend(
		&self,
		actor_id: UserId,
		friend_id: UserId,
		conversation_id: ConversationId,
	) -> Result<(), EventError> {
		let edge = self
			.core
			.store
			.friend_edge(actor_id, friend_id)
			.await?
			.ok_or_else(|| EventError::not_found("no such friend"))?;
		if edge.conversation_id != conversation_id {
			return Err(EventError::validation("conversation does not match this friend"));
		}

		self.core.store.delete_friend_edge(actor_id, friend_id).await?;
		info!(actor = %actor_id, friend = %friend_id, "friend deleted");
		self.core
			.registry
			.send(friend_id, ServerEvent::FriendDeleted { id: actor_id, conversation_id })
			.await;
		Ok(())
	}

	/// `sendPrivateMessage`: both ends of the conversation receive the
	/// message, the author included, so every open view stays in sync.
	pub async fn send_private_message(
		&self,
		actor_id: UserId,
		conversation_id: ConversationId,
		content: String,
	) -> Result<(), EventError> {
		let edge = self.conversation_edge(actor_id, conversation_id).await?;
		if edge.status != FriendStatus::Accepted {
			return Err(EventError::authorization("friend request not yet accepted"));
		}

		let content = validate_content(&content)?;
		let message = self
			.core
			.store
			.append_private_message(conversation_id, actor_id, content, unix_ms_now())
			.await?;

		let info = private_message_info(&message);
		let peer = edge.peer_of(actor_id);
		self.core.registry.send(peer, ServerEvent::PrivateMessage { message: info.clone() }).await;
		self.core.registry.send(actor_id, ServerEvent::PrivateMessage { message: info }).await;
		Ok(())
	}

	/// `getPrivateMessagesHistory`: newest page of the conversation.
	pub async fn private_history(&self, actor_id: UserId, conversation_id: ConversationId) -> Result<(), EventError> {
		self.conversation_edge(actor_id, conversation_id).await?;

		let messages = self
			.core
			.store
			.private_messages_page(conversation_id, 0, self.core.limits.page_size)
			.await?;
		self.core
			.registry
			.send(
				actor_id,
				ServerEvent::PrivateMessageHistory {
					conversation_id,
					messages: messages.iter().map(private_message_info).collect(),
				},
			)
			.await;
		Ok(())
	}

	/// `loadMorePrivateMessages`: older windows at the supplied offset.
	pub async fn more_private_messages(
		&self,
		actor_id: UserId,
		conversation_id: ConversationId,
		offset: u32,
	) -> Result<(), EventError> {
		self.conversation_edge(actor_id, conversation_id).await?;

		let messages = self
			.core
			.store
			.private_messages_page(conversation_id, offset, self.core.limits.page_size)
			.await?;
		self.core
			.registry
			.send(
				actor_id,
				ServerEvent::MorePrivateMessages {
					conversation_id,
					messages: messages.iter().map(private_message_info).collect(),
				},
			)
			.await;
		Ok(())
	}

	/// Tell every channel scope the user belongs to, and every accepted
	/// friend, that `user` went online or offline. Best-effort: offline
	/// friends and empty scopes simply miss the event.
	pub async fn broadcast_presence(&self, user: UserId, presence: Presence) -> Result<(), EventError> {
		let event = match presence {
			Presence::Online => ServerEvent::UserOnline { id: user },
			Presence::Offline => ServerEvent::UserOffline { id: user },
		};

		for channel in self.core.store.channels_for_user(user).await? {
			self.core.hub.publish(channel.id, event.clone()).await;
		}

		let edges = self.core.store.friends_of(user).await?;
		for edge in edges.iter().filter(|e| e.status == FriendStatus::Accepted) {
			self.core.registry.send(edge.peer_of(user), event.clone()).await;
		}
		Ok(())
	}

	async fn user(&self, id: UserId) -> Result<User, EventError> {
		self.core
			.store
			.user(id)
			.await?
			.ok_or_else(|| EventError::not_found("unknown user"))
	}

	/// The pending request sent by `sender` to `actor`, if any. Only the
	/// addressed recipient may act on a request.
	async fn pending_request_to(&self, actor_id: UserId, sender_id: UserId) -> Result<FriendEdge, EventError> {
		let edge = self
			.core
			.store
			.friend_edge(actor_id, sender_id)
			.await?
			.ok_or_else(|| EventError::not_found("no such friend request"))?;

		if edge.status != FriendStatus::Pending {
			return Err(EventError::validation("request already accepted"));
		}
		if edge.requester != sender_id || edge.recipient != actor_id {
			return Err(EventError::authorization("request was not addressed to you"));
		}
		Ok(edge)
	}

	async fn conversation_edge(&self, actor_id: UserId, conversation_id: ConversationId) -> Result<FriendEdge, EventError> {
		let edges = self.core.store.friends_of(actor_id).await?;
		edges
			.into_iter()
			.find(|e| e.conversation_id == conversation_id)
			.ok_or_else(|| EventError::authorization("not a participant of this conversation"))
	}
}

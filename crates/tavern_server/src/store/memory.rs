#![forbid(unsafe_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use tavern_domain::{
	Channel, ChannelId, ConversationId, FriendEdge, FriendStatus, InviteCode, Membership, Message, MessageId,
	PrivateMessage, Room, RoomId, User, UserId,
};
use tokio::sync::Mutex;

use super::{ChannelMember, ChannelPatch, MembersPage, NewChannel, Store, StoreError, UserPatch, window_newest_first};

/// In-process store for tests and single-node development runs.
#[derive(Default)]
pub struct MemoryStore {
	inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
	users: HashMap<UserId, User>,
	channels: HashMap<ChannelId, Channel>,
	rooms: HashMap<RoomId, Room>,
	memberships: HashMap<(UserId, ChannelId), Membership>,
	messages: HashMap<RoomId, Vec<Message>>,
	conversations: Vec<ConversationId>,
	friend_edges: HashMap<(UserId, UserId), FriendEdge>,
	private_messages: HashMap<ConversationId, Vec<PrivateMessage>>,
	next_channel_id: i64,
	next_room_id: i64,
	next_message_id: i64,
	next_conversation_id: i64,
}

impl Inner {
	fn edge_key(&self, a: UserId, b: UserId) -> Option<(UserId, UserId)> {
		if self.friend_edges.contains_key(&(a, b)) {
			Some((a, b))
		} else if self.friend_edges.contains_key(&(b, a)) {
			Some((b, a))
		} else {
			None
		}
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn upsert_user(&self, user: User) -> Result<User, StoreError> {
		let mut inner = self.inner.lock().await;
		inner.users.insert(user.id, user.clone());
		Ok(user)
	}

	async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.users.get(&id).cloned())
	}

	async fn update_user(&self, id: UserId, patch: UserPatch) -> Result<User, StoreError> {
		let mut inner = self.inner.lock().await;
		let user = inner.users.get_mut(&id).ok_or(StoreError::RowNotFound)?;
		if let Some(pseudo) = patch.pseudo {
			user.pseudo = pseudo;
		}
		if let Some(description) = patch.description {
			user.description = description;
		}
		if let Some(avatar) = patch.avatar {
			user.avatar = avatar;
		}
		Ok(user.clone())
	}

	async fn insert_channel(&self, new: NewChannel) -> Result<Channel, StoreError> {
		let mut inner = self.inner.lock().await;
		inner.next_channel_id += 1;
		let channel = Channel {
			id: ChannelId(inner.next_channel_id),
			name: new.name,
			invite_code: new.invite_code,
			avatar: new.avatar,
			member_limit: new.member_limit,
			created_at_ms: new.created_at_ms,
		};
		inner.channels.insert(channel.id, channel.clone());
		Ok(channel)
	}

	async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.channels.get(&id).cloned())
	}

	async fn channel_by_invite(&self, code: &InviteCode) -> Result<Option<Channel>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.channels.values().find(|c| &c.invite_code == code).cloned())
	}

	async fn update_channel(&self, id: ChannelId, patch: ChannelPatch) -> Result<Channel, StoreError> {
		let mut inner = self.inner.lock().await;
		let channel = inner.channels.get_mut(&id).ok_or(StoreError::RowNotFound)?;
		if let Some(name) = patch.name {
			channel.name = name;
		}
		if let Some(invite_code) = patch.invite_code {
			channel.invite_code = invite_code;
		}
		if let Some(avatar) = patch.avatar {
			channel.avatar = avatar;
		}
		Ok(channel.clone())
	}

	async fn delete_channel(&self, id: ChannelId) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.channels.remove(&id);

		let room_ids = inner
			.rooms
			.values()
			.filter(|r| r.channel_id == id)
			.map(|r| r.id)
			.collect::<Vec<_>>();
		for room_id in room_ids {
			inner.rooms.remove(&room_id);
			inner.messages.remove(&room_id);
		}

		inner.memberships.retain(|(_, channel_id), _| *channel_id != id);
		Ok(())
	}

	async fn channels_for_user(&self, user: UserId) -> Result<Vec<Channel>, StoreError> {
		let inner = self.inner.lock().await;
		let mut channels = inner
			.memberships
			.keys()
			.filter(|(user_id, _)| *user_id == user)
			.filter_map(|(_, channel_id)| inner.channels.get(channel_id).cloned())
			.collect::<Vec<_>>();
		channels.sort_by_key(|c| c.id);
		Ok(channels)
	}

	async fn insert_membership(&self, membership: Membership) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner
			.memberships
			.insert((membership.user_id, membership.channel_id), membership);
		Ok(())
	}

	async fn membership(&self, user: UserId, channel: ChannelId) -> Result<Option<Membership>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.memberships.get(&(user, channel)).copied())
	}

	async fn delete_membership(&self, user: UserId, channel: ChannelId) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.memberships.remove(&(user, channel));
		Ok(())
	}

	async fn member_count(&self, channel: ChannelId) -> Result<u32, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.memberships.keys().filter(|(_, c)| *c == channel).count() as u32)
	}

	async fn membership_count_for_user(&self, user: UserId) -> Result<u32, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.memberships.keys().filter(|(u, _)| *u == user).count() as u32)
	}

	async fn members_page(&self, channel: ChannelId, offset: u32, limit: u32) -> Result<MembersPage, StoreError> {
		let inner = self.inner.lock().await;
		let mut rows = inner
			.memberships
			.values()
			.filter(|m| m.channel_id == channel)
			.copied()
			.collect::<Vec<_>>();
		rows.sort_by_key(|m| (m.created_at_ms, m.user_id));

		let total = rows.len() as u32;
		let members = rows
			.into_iter()
			.skip(offset as usize)
			.take(limit as usize)
			.filter_map(|m| {
				inner.users.get(&m.user_id).map(|user| ChannelMember {
					user: user.clone(),
					admin: m.admin,
				})
			})
			.collect();

		Ok(MembersPage { members, total })
	}

	async fn member_ids(&self, channel: ChannelId) -> Result<Vec<UserId>, StoreError> {
		let inner = self.inner.lock().await;
		let mut ids = inner
			.memberships
			.keys()
			.filter(|(_, c)| *c == channel)
			.map(|(u, _)| *u)
			.collect::<Vec<_>>();
		ids.sort();
		Ok(ids)
	}

	async fn insert_room(&self, channel: ChannelId, name: String, index: u32, created_at_ms: i64) -> Result<Room, StoreError> {
		let mut inner = self.inner.lock().await;
		inner.next_room_id += 1;
		let room = Room {
			id: RoomId(inner.next_room_id),
			channel_id: channel,
			name,
			index,
			created_at_ms,
		};
		inner.rooms.insert(room.id, room.clone());
		Ok(room)
	}

	async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.rooms.get(&id).cloned())
	}

	async fn rooms_for_channel(&self, channel: ChannelId) -> Result<Vec<Room>, StoreError> {
		let inner = self.inner.lock().await;
		let mut rooms = inner
			.rooms
			.values()
			.filter(|r| r.channel_id == channel)
			.cloned()
			.collect::<Vec<_>>();
		rooms.sort_by_key(|r| (r.index, r.id));
		Ok(rooms)
	}

	async fn next_room_index(&self, channel: ChannelId) -> Result<u32, StoreError> {
		let inner = self.inner.lock().await;
		let max = inner
			.rooms
			.values()
			.filter(|r| r.channel_id == channel)
			.map(|r| r.index)
			.max()
			.unwrap_or(0);
		Ok(max + 1)
	}

	async fn update_room(&self, id: RoomId, name: String, index: u32) -> Result<Room, StoreError> {
		let mut inner = self.inner.lock().await;
		let room = inner.rooms.get_mut(&id).ok_or(StoreError::RowNotFound)?;
		room.name = name;
		room.index = index;
		Ok(room.clone())
	}

	async fn delete_room(&self, id: RoomId) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.rooms.remove(&id);
		inner.messages.remove(&id);
		Ok(())
	}

	async fn append_message(
		&self,
		room: RoomId,
		author: UserId,
		content: String,
		created_at_ms: i64,
	) -> Result<Message, StoreError> {
		let mut inner = self.inner.lock().await;
		inner.next_message_id += 1;
		let message = Message {
			id: MessageId(inner.next_message_id),
			room_id: room,
			author_id: author,
			content,
			created_at_ms,
		};
		inner.messages.entry(room).or_default().push(message.clone());
		Ok(message)
	}

	async fn messages_page(&self, room: RoomId, offset: u32, limit: u32) -> Result<Vec<Message>, StoreError> {
		let inner = self.inner.lock().await;
		let Some(messages) = inner.messages.get(&room) else {
			return Ok(Vec::new());
		};
		Ok(window_newest_first(messages, offset, limit))
	}

	async fn create_conversation(&self, _created_at_ms: i64) -> Result<ConversationId, StoreError> {
		let mut inner = self.inner.lock().await;
		inner.next_conversation_id += 1;
		let id = ConversationId(inner.next_conversation_id);
		inner.conversations.push(id);
		Ok(id)
	}

	async fn insert_friend_edge(&self, edge: FriendEdge) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.friend_edges.insert((edge.requester, edge.recipient), edge);
		Ok(())
	}

	async fn friend_edge(&self, a: UserId, b: UserId) -> Result<Option<FriendEdge>, StoreError> {
		let inner = self.inner.lock().await;
		let Some(key) = inner.edge_key(a, b) else {
			return Ok(None);
		};
		Ok(inner.friend_edges.get(&key).cloned())
	}

	async fn set_friend_status(
		&self,
		requester: UserId,
		recipient: UserId,
		status: FriendStatus,
	) -> Result<FriendEdge, StoreError> {
		let mut inner = self.inner.lock().await;
		let edge = inner
			.friend_edges
			.get_mut(&(requester, recipient))
			.ok_or(StoreError::RowNotFound)?;
		edge.status = status;
		Ok(edge.clone())
	}

	async fn delete_friend_edge(&self, a: UserId, b: UserId) -> Result<Option<FriendEdge>, StoreError> {
		let mut inner = self.inner.lock().await;
		let Some(key) = inner.edge_key(a, b) else {
			return Ok(None);
		};
		let edge = inner.friend_edges.remove(&key);
		if let Some(edge) = &edge {
			inner.conversations.retain(|c| *c != edge.conversation_id);
			inner.private_messages.remove(&edge.conversation_id);
		}
		Ok(edge)
	}

	async fn friends_of(&self, user: UserId) -> Result<Vec<FriendEdge>, StoreError> {
		let inner = self.inner.lock().await;
		let mut edges = inner
			.friend_edges
			.values()
			.filter(|e| e.involves(user))
			.cloned()
			.collect::<Vec<_>>();
		edges.sort_by_key(|e| (e.created_at_ms, e.requester, e.recipient));
		Ok(edges)
	}

	async fn append_private_message(
		&self,
		conversation: ConversationId,
		author: UserId,
		content: String,
		created_at_ms: i64,
	) -> Result<PrivateMessage, StoreError> {
		let mut inner = self.inner.lock().await;
		inner.next_message_id += 1;
		let message = PrivateMessage {
			id: MessageId(inner.next_message_id),
			conversation_id: conversation,
			author_id: author,
			content,
			created_at_ms,
		};
		inner.private_messages.entry(conversation).or_default().push(message.clone());
		Ok(message)
	}

	async fn private_messages_page(
		&self,
		conversation: ConversationId,
		offset: u32,
		limit: u32,
	) -> Result<Vec<PrivateMessage>, StoreError> {
		let inner = self.inner.lock().await;
		let Some(messages) = inner.private_messages.get(&conversation) else {
			return Ok(Vec::new());
		};
		Ok(window_newest_first(messages, offset, limit))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tavern_domain::AssetPath;

	fn user(id: i64) -> User {
		User {
			id: UserId(id),
			pseudo: format!("user-{id}"),
			email: format!("user-{id}@example.com"),
			description: String::new(),
			avatar: AssetPath("avatars/default.png".into()),
			created_at_ms: id,
		}
	}

	#[tokio::test]
	async fn channel_delete_cascades_rooms_and_messages() {
		let store = MemoryStore::new();
		let channel = store
			.insert_channel(NewChannel {
				name: "general".into(),
				invite_code: InviteCode::generate(),
				avatar: AssetPath("avatars/default.png".into()),
				member_limit: 100,
				created_at_ms: 0,
			})
			.await
			.unwrap();
		let room = store.insert_room(channel.id, "# General".into(), 1, 0).await.unwrap();
		store.append_message(room.id, UserId(1), "hello".into(), 1).await.unwrap();

		store.delete_channel(channel.id).await.unwrap();

		assert!(store.channel(channel.id).await.unwrap().is_none());
		assert!(store.room(room.id).await.unwrap().is_none());
		assert!(store.messages_page(room.id, 0, 50).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn members_page_orders_by_join_time() {
		let store = MemoryStore::new();
		for id in 1..=3 {
			store.upsert_user(user(id)).await.unwrap();
		}
		let channel_id = ChannelId(7);
		for (id, joined_at) in [(3, 10), (1, 20), (2, 30)] {
			store
				.insert_membership(Membership {
					user_id: UserId(id),
					channel_id,
					admin: id == 3,
					created_at_ms: joined_at,
				})
				.await
				.unwrap();
		}

		let page = store.members_page(channel_id, 0, 2).await.unwrap();
		assert_eq!(page.total, 3);
		let ids = page.members.iter().map(|m| m.user.id).collect::<Vec<_>>();
		assert_eq!(ids, vec![UserId(3), UserId(1)]);
		assert!(page.members[0].admin);
	}

	#[tokio::test]
	async fn friend_edges_resolve_in_both_orientations() {
		let store = MemoryStore::new();
		let conversation = store.create_conversation(0).await.unwrap();
		store
			.insert_friend_edge(FriendEdge {
				requester: UserId(1),
				recipient: UserId(2),
				status: FriendStatus::Pending,
				conversation_id: conversation,
				created_at_ms: 0,
			})
			.await
			.unwrap();

		assert!(store.friend_edge(UserId(2), UserId(1)).await.unwrap().is_some());

		let edge = store
			.set_friend_status(UserId(1), UserId(2), FriendStatus::Accepted)
			.await
			.unwrap();
		assert_eq!(edge.status, FriendStatus::Accepted);

		let removed = store.delete_friend_edge(UserId(2), UserId(1)).await.unwrap();
		assert!(removed.is_some());
		assert!(store.friend_edge(UserId(1), UserId(2)).await.unwrap().is_none());
		assert!(
			store
				.private_messages_page(conversation, 0, 50)
				.await
				.unwrap()
				.is_empty()
		);
	}
}

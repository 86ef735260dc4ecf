#![forbid(unsafe_code)]

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use tavern_domain::{
	AssetPath, Channel, ChannelId, ConversationId, FriendEdge, FriendStatus, InviteCode, Membership, Message,
	PrivateMessage, Room, RoomId, User, UserId,
};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("migration error: {0}")]
	Migrate(#[from] sqlx::migrate::MigrateError),
	#[error("row not found")]
	RowNotFound,
	#[error("corrupt row: {0}")]
	Corrupt(String),
}

/// One member of a channel, as listed to clients.
#[derive(Debug, Clone)]
pub struct ChannelMember {
	pub user: User,
	pub admin: bool,
}

/// A page of channel members plus the channel-wide total.
#[derive(Debug, Clone)]
pub struct MembersPage {
	pub members: Vec<ChannelMember>,
	pub total: u32,
}

/// New-channel parameters; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewChannel {
	pub name: String,
	pub invite_code: InviteCode,
	pub avatar: AssetPath,
	pub member_limit: u32,
	pub created_at_ms: i64,
}

/// Partial channel update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ChannelPatch {
	pub name: Option<String>,
	pub invite_code: Option<InviteCode>,
	pub avatar: Option<AssetPath>,
}

/// Partial user profile update.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
	pub pseudo: Option<String>,
	pub description: Option<String>,
	pub avatar: Option<AssetPath>,
}

/// Persistence seam for all chat state. Implementations must be safe to
/// share across connection tasks.
#[async_trait]
pub trait Store: Send + Sync {
	// -- users --

	async fn upsert_user(&self, user: User) -> Result<User, StoreError>;
	async fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;
	async fn update_user(&self, id: UserId, patch: UserPatch) -> Result<User, StoreError>;

	// -- channels --

	async fn insert_channel(&self, new: NewChannel) -> Result<Channel, StoreError>;
	async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError>;
	async fn channel_by_invite(&self, code: &InviteCode) -> Result<Option<Channel>, StoreError>;
	async fn update_channel(&self, id: ChannelId, patch: ChannelPatch) -> Result<Channel, StoreError>;
	/// Removes the channel and everything hanging off it (rooms, messages,
	/// memberships).
	async fn delete_channel(&self, id: ChannelId) -> Result<(), StoreError>;
	async fn channels_for_user(&self, user: UserId) -> Result<Vec<Channel>, StoreError>;

	// -- memberships --

	async fn insert_membership(&self, membership: Membership) -> Result<(), StoreError>;
	async fn membership(&self, user: UserId, channel: ChannelId) -> Result<Option<Membership>, StoreError>;
	async fn delete_membership(&self, user: UserId, channel: ChannelId) -> Result<(), StoreError>;
	async fn member_count(&self, channel: ChannelId) -> Result<u32, StoreError>;
	async fn membership_count_for_user(&self, user: UserId) -> Result<u32, StoreError>;
	/// Members ordered by join time, skipping `offset` rows.
	async fn members_page(&self, channel: ChannelId, offset: u32, limit: u32) -> Result<MembersPage, StoreError>;
	async fn member_ids(&self, channel: ChannelId) -> Result<Vec<UserId>, StoreError>;

	// -- rooms --

	async fn insert_room(&self, channel: ChannelId, name: String, index: u32, created_at_ms: i64) -> Result<Room, StoreError>;
	async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;
	/// Rooms ordered by their index.
	async fn rooms_for_channel(&self, channel: ChannelId) -> Result<Vec<Room>, StoreError>;
	async fn next_room_index(&self, channel: ChannelId) -> Result<u32, StoreError>;
	async fn update_room(&self, id: RoomId, name: String, index: u32) -> Result<Room, StoreError>;
	async fn delete_room(&self, id: RoomId) -> Result<(), StoreError>;

	// -- room messages --

	async fn append_message(
		&self,
		room: RoomId,
		author: UserId,
		content: String,
		created_at_ms: i64,
	) -> Result<Message, StoreError>;
	/// Window of messages ending `offset` rows before the newest, returned
	/// oldest-first.
	async fn messages_page(&self, room: RoomId, offset: u32, limit: u32) -> Result<Vec<Message>, StoreError>;

	// -- friends --

	async fn create_conversation(&self, created_at_ms: i64) -> Result<ConversationId, StoreError>;
	async fn insert_friend_edge(&self, edge: FriendEdge) -> Result<(), StoreError>;
	/// Edge between the pair in either orientation.
	async fn friend_edge(&self, a: UserId, b: UserId) -> Result<Option<FriendEdge>, StoreError>;
	async fn set_friend_status(
		&self,
		requester: UserId,
		recipient: UserId,
		status: FriendStatus,
	) -> Result<FriendEdge, StoreError>;
	/// Removes the edge (either orientation) and returns it if it existed.
	async fn delete_friend_edge(&self, a: UserId, b: UserId) -> Result<Option<FriendEdge>, StoreError>;
	async fn friends_of(&self, user: UserId) -> Result<Vec<FriendEdge>, StoreError>;

	// -- private messages --

	async fn append_private_message(
		&self,
		conversation: ConversationId,
		author: UserId,
		content: String,
		created_at_ms: i64,
	) -> Result<PrivateMessage, StoreError>;
	async fn private_messages_page(
		&self,
		conversation: ConversationId,
		offset: u32,
		limit: u32,
	) -> Result<Vec<PrivateMessage>, StoreError>;
}

/// The newest-first offset window, flipped oldest-first. Mirrors the SQL
/// `ORDER BY id DESC LIMIT ? OFFSET ?` shape used by the sqlite backend.
pub(crate) fn window_newest_first<T: Clone>(items: &[T], offset: u32, limit: u32) -> Vec<T> {
	let mut page = items
		.iter()
		.rev()
		.skip(offset as usize)
		.take(limit as usize)
		.cloned()
		.collect::<Vec<_>>();
	page.reverse();
	page
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn window_walks_backwards_in_pages() {
		let items = (1..=7).collect::<Vec<_>>();
		assert_eq!(window_newest_first(&items, 0, 3), vec![5, 6, 7]);
		assert_eq!(window_newest_first(&items, 3, 3), vec![2, 3, 4]);
		assert_eq!(window_newest_first(&items, 6, 3), vec![1]);
		assert_eq!(window_newest_first(&items, 9, 3), Vec::<i32>::new());
	}
}

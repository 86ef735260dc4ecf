#![forbid(unsafe_code)]

use async_trait::async_trait;
use sqlx::SqlitePool;
use tavern_domain::{
	AssetPath, Channel, ChannelId, ConversationId, FriendEdge, FriendStatus, InviteCode, Membership, Message, MessageId,
	PrivateMessage, Room, RoomId, User, UserId,
};

use super::{ChannelMember, ChannelPatch, MembersPage, NewChannel, Store, StoreError, UserPatch};

/// sqlx-backed store for production runs.
#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
}

impl SqliteStore {
	/// Connect and run pending migrations.
	pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
		let pool = SqlitePool::connect(database_url).await?;
		sqlx::migrate!("migrations/sqlite").run(&pool).await?;
		Ok(Self { pool })
	}
}

type ChannelRow = (i64, String, String, String, i64, i64);
type RoomRow = (i64, i64, String, i64, i64);
type UserRow = (i64, String, String, String, String, i64);
type MessageRow = (i64, i64, i64, String, i64);
type FriendRow = (i64, i64, String, i64, i64);

fn channel_from_row(row: ChannelRow) -> Result<Channel, StoreError> {
	let (id, name, invite_code, avatar, member_limit, created_at_ms) = row;
	Ok(Channel {
		id: ChannelId(id),
		name,
		invite_code: InviteCode::new(invite_code).map_err(|e| StoreError::Corrupt(format!("channel {id} invite: {e}")))?,
		avatar: AssetPath(avatar),
		member_limit: member_limit as u32,
		created_at_ms,
	})
}

fn room_from_row(row: RoomRow) -> Room {
	let (id, channel_id, name, index, created_at_ms) = row;
	Room {
		id: RoomId(id),
		channel_id: ChannelId(channel_id),
		name,
		index: index as u32,
		created_at_ms,
	}
}

fn user_from_row(row: UserRow) -> User {
	let (id, pseudo, email, description, avatar, created_at_ms) = row;
	User {
		id: UserId(id),
		pseudo,
		email,
		description,
		avatar: AssetPath(avatar),
		created_at_ms,
	}
}

fn friend_status_from_str(s: &str) -> Result<FriendStatus, StoreError> {
	match s {
		"pending" => Ok(FriendStatus::Pending),
		"accepted" => Ok(FriendStatus::Accepted),
		other => Err(StoreError::Corrupt(format!("friend status {other:?}"))),
	}
}

fn friend_status_str(status: FriendStatus) -> &'static str {
	match status {
		FriendStatus::Pending => "pending",
		FriendStatus::Accepted => "accepted",
	}
}

fn friend_from_row(row: FriendRow) -> Result<FriendEdge, StoreError> {
	let (requester, recipient, status, conversation_id, created_at_ms) = row;
	Ok(FriendEdge {
		requester: UserId(requester),
		recipient: UserId(recipient),
		status: friend_status_from_str(&status)?,
		conversation_id: ConversationId(conversation_id),
		created_at_ms,
	})
}

#[async_trait]
impl Store for SqliteStore {
	async fn upsert_user(&self, user: User) -> Result<User, StoreError> {
		sqlx::query(
			"INSERT INTO users (id, pseudo, email, description, avatar, created_at_ms) VALUES (?, ?, ?, ?, ?, ?) \
			ON CONFLICT(id) DO UPDATE SET pseudo = excluded.pseudo, email = excluded.email, \
			description = excluded.description, avatar = excluded.avatar",
		)
		.bind(user.id.as_i64())
		.bind(&user.pseudo)
		.bind(&user.email)
		.bind(&user.description)
		.bind(user.avatar.as_str())
		.bind(user.created_at_ms)
		.execute(&self.pool)
		.await?;
		Ok(user)
	}

	async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
		let row: Option<UserRow> =
			sqlx::query_as("SELECT id, pseudo, email, description, avatar, created_at_ms FROM users WHERE id = ?")
				.bind(id.as_i64())
				.fetch_optional(&self.pool)
				.await?;
		Ok(row.map(user_from_row))
	}

	async fn update_user(&self, id: UserId, patch: UserPatch) -> Result<User, StoreError> {
		let mut tx = self.pool.begin().await?;
		let row: Option<UserRow> =
			sqlx::query_as("SELECT id, pseudo, email, description, avatar, created_at_ms FROM users WHERE id = ?")
				.bind(id.as_i64())
				.fetch_optional(&mut *tx)
				.await?;
		let mut user = row.map(user_from_row).ok_or(StoreError::RowNotFound)?;

		if let Some(pseudo) = patch.pseudo {
			user.pseudo = pseudo;
		}
		if let Some(description) = patch.description {
			user.description = description;
		}
		if let Some(avatar) = patch.avatar {
			user.avatar = avatar;
		}

		sqlx::query("UPDATE users SET pseudo = ?, description = ?, avatar = ? WHERE id = ?")
			.bind(&user.pseudo)
			.bind(&user.description)
			.bind(user.avatar.as_str())
			.bind(id.as_i64())
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(user)
	}

	async fn insert_channel(&self, new: NewChannel) -> Result<Channel, StoreError> {
		let result = sqlx::query(
			"INSERT INTO channels (name, invite_code, avatar, member_limit, created_at_ms) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(&new.name)
		.bind(new.invite_code.as_str())
		.bind(new.avatar.as_str())
		.bind(new.member_limit as i64)
		.bind(new.created_at_ms)
		.execute(&self.pool)
		.await?;

		Ok(Channel {
			id: ChannelId(result.last_insert_rowid()),
			name: new.name,
			invite_code: new.invite_code,
			avatar: new.avatar,
			member_limit: new.member_limit,
			created_at_ms: new.created_at_ms,
		})
	}

	async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError> {
		let row: Option<ChannelRow> = sqlx::query_as(
			"SELECT id, name, invite_code, avatar, member_limit, created_at_ms FROM channels WHERE id = ?",
		)
		.bind(id.as_i64())
		.fetch_optional(&self.pool)
		.await?;
		row.map(channel_from_row).transpose()
	}

	async fn channel_by_invite(&self, code: &InviteCode) -> Result<Option<Channel>, StoreError> {
		let row: Option<ChannelRow> = sqlx::query_as(
			"SELECT id, name, invite_code, avatar, member_limit, created_at_ms FROM channels WHERE invite_code = ?",
		)
		.bind(code.as_str())
		.fetch_optional(&self.pool)
		.await?;
		row.map(channel_from_row).transpose()
	}

	async fn update_channel(&self, id: ChannelId, patch: ChannelPatch) -> Result<Channel, StoreError> {
		let mut tx = self.pool.begin().await?;
		let row: Option<ChannelRow> = sqlx::query_as(
			"SELECT id, name, invite_code, avatar, member_limit, created_at_ms FROM channels WHERE id = ?",
		)
		.bind(id.as_i64())
		.fetch_optional(&mut *tx)
		.await?;
		let mut channel = row.map(channel_from_row).transpose()?.ok_or(StoreError::RowNotFound)?;

		if let Some(name) = patch.name {
			channel.name = name;
		}
		if let Some(invite_code) = patch.invite_code {
			channel.invite_code = invite_code;
		}
		if let Some(avatar) = patch.avatar {
			channel.avatar = avatar;
		}

		sqlx::query("UPDATE channels SET name = ?, invite_code = ?, avatar = ? WHERE id = ?")
			.bind(&channel.name)
			.bind(channel.invite_code.as_str())
			.bind(channel.avatar.as_str())
			.bind(id.as_i64())
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(channel)
	}

	async fn delete_channel(&self, id: ChannelId) -> Result<(), StoreError> {
		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM messages WHERE room_id IN (SELECT id FROM rooms WHERE channel_id = ?)")
			.bind(id.as_i64())
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM rooms WHERE channel_id = ?")
			.bind(id.as_i64())
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM memberships WHERE channel_id = ?")
			.bind(id.as_i64())
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM channels WHERE id = ?")
			.bind(id.as_i64())
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(())
	}

	async fn channels_for_user(&self, user: UserId) -> Result<Vec<Channel>, StoreError> {
		let rows: Vec<ChannelRow> = sqlx::query_as(
			"SELECT c.id, c.name, c.invite_code, c.avatar, c.member_limit, c.created_at_ms \
			FROM channels c JOIN memberships m ON m.channel_id = c.id \
			WHERE m.user_id = ? ORDER BY c.id",
		)
		.bind(user.as_i64())
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(channel_from_row).collect()
	}

	async fn insert_membership(&self, membership: Membership) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO memberships (user_id, channel_id, admin, created_at_ms) VALUES (?, ?, ?, ?) \
			ON CONFLICT(user_id, channel_id) DO UPDATE SET admin = excluded.admin",
		)
		.bind(membership.user_id.as_i64())
		.bind(membership.channel_id.as_i64())
		.bind(membership.admin as i64)
		.bind(membership.created_at_ms)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn membership(&self, user: UserId, channel: ChannelId) -> Result<Option<Membership>, StoreError> {
		let row: Option<(i64, i64, i64, i64)> = sqlx::query_as(
			"SELECT user_id, channel_id, admin, created_at_ms FROM memberships WHERE user_id = ? AND channel_id = ?",
		)
		.bind(user.as_i64())
		.bind(channel.as_i64())
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.map(|(user_id, channel_id, admin, created_at_ms)| Membership {
			user_id: UserId(user_id),
			channel_id: ChannelId(channel_id),
			admin: admin != 0,
			created_at_ms,
		}))
	}

	async fn delete_membership(&self, user: UserId, channel: ChannelId) -> Result<(), StoreError> {
		sqlx::query("DELETE FROM memberships WHERE user_id = ? AND channel_id = ?")
			.bind(user.as_i64())
			.bind(channel.as_i64())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn member_count(&self, channel: ChannelId) -> Result<u32, StoreError> {
		let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memberships WHERE channel_id = ?")
			.bind(channel.as_i64())
			.fetch_one(&self.pool)
			.await?;
		Ok(count as u32)
	}

	async fn membership_count_for_user(&self, user: UserId) -> Result<u32, StoreError> {
		let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memberships WHERE user_id = ?")
			.bind(user.as_i64())
			.fetch_one(&self.pool)
			.await?;
		Ok(count as u32)
	}

	async fn members_page(&self, channel: ChannelId, offset: u32, limit: u32) -> Result<MembersPage, StoreError> {
		let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memberships WHERE channel_id = ?")
			.bind(channel.as_i64())
			.fetch_one(&self.pool)
			.await?;

		let rows: Vec<(i64, String, String, String, String, i64, i64)> = sqlx::query_as(
			"SELECT u.id, u.pseudo, u.email, u.description, u.avatar, u.created_at_ms, m.admin \
			FROM memberships m JOIN users u ON u.id = m.user_id \
			WHERE m.channel_id = ? ORDER BY m.created_at_ms, m.user_id LIMIT ? OFFSET ?",
		)
		.bind(channel.as_i64())
		.bind(limit as i64)
		.bind(offset as i64)
		.fetch_all(&self.pool)
		.await?;

		let members = rows
			.into_iter()
			.map(|(id, pseudo, email, description, avatar, created_at_ms, admin)| ChannelMember {
				user: user_from_row((id, pseudo, email, description, avatar, created_at_ms)),
				admin: admin != 0,
			})
			.collect();

		Ok(MembersPage {
			members,
			total: total as u32,
		})
	}

	async fn member_ids(&self, channel: ChannelId) -> Result<Vec<UserId>, StoreError> {
		let rows: Vec<(i64,)> = sqlx::query_as("SELECT user_id FROM memberships WHERE channel_id = ? ORDER BY user_id")
			.bind(channel.as_i64())
			.fetch_all(&self.pool)
			.await?;
		Ok(rows.into_iter().map(|(id,)| UserId(id)).collect())
	}

	async fn insert_room(&self, channel: ChannelId, name: String, index: u32, created_at_ms: i64) -> Result<Room, StoreError> {
		let result = sqlx::query("INSERT INTO rooms (channel_id, name, room_index, created_at_ms) VALUES (?, ?, ?, ?)")
			.bind(channel.as_i64())
			.bind(&name)
			.bind(index as i64)
			.bind(created_at_ms)
			.execute(&self.pool)
			.await?;

		Ok(Room {
			id: RoomId(result.last_insert_rowid()),
			channel_id: channel,
			name,
			index,
			created_at_ms,
		})
	}

	async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
		let row: Option<RoomRow> =
			sqlx::query_as("SELECT id, channel_id, name, room_index, created_at_ms FROM rooms WHERE id = ?")
				.bind(id.as_i64())
				.fetch_optional(&self.pool)
				.await?;
		Ok(row.map(room_from_row))
	}

	async fn rooms_for_channel(&self, channel: ChannelId) -> Result<Vec<Room>, StoreError> {
		let rows: Vec<RoomRow> = sqlx::query_as(
			"SELECT id, channel_id, name, room_index, created_at_ms FROM rooms WHERE channel_id = ? \
			ORDER BY room_index, id",
		)
		.bind(channel.as_i64())
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.into_iter().map(room_from_row).collect())
	}

	async fn next_room_index(&self, channel: ChannelId) -> Result<u32, StoreError> {
		let (max,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(room_index), 0) FROM rooms WHERE channel_id = ?")
			.bind(channel.as_i64())
			.fetch_one(&self.pool)
			.await?;
		Ok(max as u32 + 1)
	}

	async fn update_room(&self, id: RoomId, name: String, index: u32) -> Result<Room, StoreError> {
		let result = sqlx::query("UPDATE rooms SET name = ?, room_index = ? WHERE id = ?")
			.bind(&name)
			.bind(index as i64)
			.bind(id.as_i64())
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(StoreError::RowNotFound);
		}
		self.room(id).await?.ok_or(StoreError::RowNotFound)
	}

	async fn delete_room(&self, id: RoomId) -> Result<(), StoreError> {
		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM messages WHERE room_id = ?")
			.bind(id.as_i64())
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM rooms WHERE id = ?")
			.bind(id.as_i64())
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(())
	}

	async fn append_message(
		&self,
		room: RoomId,
		author: UserId,
		content: String,
		created_at_ms: i64,
	) -> Result<Message, StoreError> {
		let result = sqlx::query("INSERT INTO messages (room_id, author_id, content, created_at_ms) VALUES (?, ?, ?, ?)")
			.bind(room.as_i64())
			.bind(author.as_i64())
			.bind(&content)
			.bind(created_at_ms)
			.execute(&self.pool)
			.await?;

		Ok(Message {
			id: MessageId(result.last_insert_rowid()),
			room_id: room,
			author_id: author,
			content,
			created_at_ms,
		})
	}

	async fn messages_page(&self, room: RoomId, offset: u32, limit: u32) -> Result<Vec<Message>, StoreError> {
		let rows: Vec<MessageRow> = sqlx::query_as(
			"SELECT id, room_id, author_id, content, created_at_ms FROM messages WHERE room_id = ? \
			ORDER BY id DESC LIMIT ? OFFSET ?",
		)
		.bind(room.as_i64())
		.bind(limit as i64)
		.bind(offset as i64)
		.fetch_all(&self.pool)
		.await?;

		let mut messages = rows
			.into_iter()
			.map(|(id, room_id, author_id, content, created_at_ms)| Message {
				id: MessageId(id),
				room_id: RoomId(room_id),
				author_id: UserId(author_id),
				content,
				created_at_ms,
			})
			.collect::<Vec<_>>();
		messages.reverse();
		Ok(messages)
	}

	async fn create_conversation(&self, created_at_ms: i64) -> Result<ConversationId, StoreError> {
		let result = sqlx::query("INSERT INTO conversations (created_at_ms) VALUES (?)")
			.bind(created_at_ms)
			.execute(&self.pool)
			.await?;
		Ok(ConversationId(result.last_insert_rowid()))
	}

	async fn insert_friend_edge(&self, edge: FriendEdge) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO friend_edges (requester, recipient, status, conversation_id, created_at_ms) \
			VALUES (?, ?, ?, ?, ?)",
		)
		.bind(edge.requester.as_i64())
		.bind(edge.recipient.as_i64())
		.bind(friend_status_str(edge.status))
		.bind(edge.conversation_id.as_i64())
		.bind(edge.created_at_ms)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn friend_edge(&self, a: UserId, b: UserId) -> Result<Option<FriendEdge>, StoreError> {
		let row: Option<FriendRow> = sqlx::query_as(
			"SELECT requester, recipient, status, conversation_id, created_at_ms FROM friend_edges \
			WHERE (requester = ? AND recipient = ?) OR (requester = ? AND recipient = ?)",
		)
		.bind(a.as_i64())
		.bind(b.as_i64())
		.bind(b.as_i64())
		.bind(a.as_i64())
		.fetch_optional(&self.pool)
		.await?;
		row.map(friend_from_row).transpose()
	}

	async fn set_friend_status(
		&self,
		requester: UserId,
		recipient: UserId,
		status: FriendStatus,
	) -> Result<FriendEdge, StoreError> {
		let result = sqlx::query("UPDATE friend_edges SET status = ? WHERE requester = ? AND recipient = ?")
			.bind(friend_status_str(status))
			.bind(requester.as_i64())
			.bind(recipient.as_i64())
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(StoreError::RowNotFound);
		}
		self.friend_edge(requester, recipient).await?.ok_or(StoreError::RowNotFound)
	}

	async fn delete_friend_edge(&self, a: UserId, b: UserId) -> Result<Option<FriendEdge>, StoreError> {
		let Some(edge) = self.friend_edge(a, b).await? else {
			return Ok(None);
		};

		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM friend_edges WHERE requester = ? AND recipient = ?")
			.bind(edge.requester.as_i64())
			.bind(edge.recipient.as_i64())
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM private_messages WHERE conversation_id = ?")
			.bind(edge.conversation_id.as_i64())
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM conversations WHERE id = ?")
			.bind(edge.conversation_id.as_i64())
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(Some(edge))
	}

	async fn friends_of(&self, user: UserId) -> Result<Vec<FriendEdge>, StoreError> {
		let rows: Vec<FriendRow> = sqlx::query_as(
			"SELECT requester, recipient, status, conversation_id, created_at_ms FROM friend_edges \
			WHERE requester = ? OR recipient = ? ORDER BY created_at_ms, requester, recipient",
		)
		.bind(user.as_i64())
		.bind(user.as_i64())
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(friend_from_row).collect()
	}

	async fn append_private_message(
		&self,
		conversation: ConversationId,
		author: UserId,
		content: String,
		created_at_ms: i64,
	) -> Result<PrivateMessage, StoreError> {
		let result = sqlx::query(
			"INSERT INTO private_messages (conversation_id, author_id, content, created_at_ms) VALUES (?, ?, ?, ?)",
		)
		.bind(conversation.as_i64())
		.bind(author.as_i64())
		.bind(&content)
		.bind(created_at_ms)
		.execute(&self.pool)
		.await?;

		Ok(PrivateMessage {
			id: MessageId(result.last_insert_rowid()),
			conversation_id: conversation,
			author_id: author,
			content,
			created_at_ms,
		})
	}

	async fn private_messages_page(
		&self,
		conversation: ConversationId,
		offset: u32,
		limit: u32,
	) -> Result<Vec<PrivateMessage>, StoreError> {
		let rows: Vec<MessageRow> = sqlx::query_as(
			"SELECT id, conversation_id, author_id, content, created_at_ms FROM private_messages \
			WHERE conversation_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
		)
		.bind(conversation.as_i64())
		.bind(limit as i64)
		.bind(offset as i64)
		.fetch_all(&self.pool)
		.await?;

		let mut messages = rows
			.into_iter()
			.map(|(id, conversation_id, author_id, content, created_at_ms)| PrivateMessage {
				id: MessageId(id),
				conversation_id: ConversationId(conversation_id),
				author_id: UserId(author_id),
				content,
				created_at_ms,
			})
			.collect::<Vec<_>>();
		messages.reverse();
		Ok(messages)
	}
}

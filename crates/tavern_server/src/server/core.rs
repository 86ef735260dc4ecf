#![forbid(unsafe_code)]

use std::sync::Arc;

use tavern_domain::{
	AvatarUrl, Channel, DEFAULT_CHANNELS_PER_USER, DEFAULT_MEMBER_LIMIT, DEFAULT_PAGE_SIZE, FriendEdge, FriendStatus,
	Message, Presence, PrivateMessage, Room, User,
};
use tavern_protocol::{ChannelSummary, FriendInfo, MemberProfile, MessageInfo, PrivateMessageInfo, RoomInfo};

use crate::media::{AvatarKind, MediaError, MediaPipeline};
use crate::store::Store;
use crate::util::time::unix_ms_now;

use super::error::EventError;

use super::hub::ChannelHub;
use super::registry::ConnectionRegistry;

/// Operational limits, overridable through configuration.
#[derive(Debug, Clone)]
pub struct Limits {
	pub channels_per_user: u32,
	pub member_limit: u32,
	pub page_size: u32,
}

impl Default for Limits {
	fn default() -> Self {
		Self {
			channels_per_user: DEFAULT_CHANNELS_PER_USER,
			member_limit: DEFAULT_MEMBER_LIMIT,
			page_size: DEFAULT_PAGE_SIZE,
		}
	}
}

/// Shared collaborators handed to every manager and connection task.
pub struct Core {
	pub store: Arc<dyn Store>,
	pub registry: Arc<ConnectionRegistry>,
	pub hub: ChannelHub,
	pub media: Arc<dyn MediaPipeline>,
	pub limits: Limits,
	/// Public base URL avatars are served under.
	pub avatar_base: String,
}

impl Core {
	/// Persist an uploaded avatar; bad uploads become validation errors,
	/// storage faults stay internal.
	pub async fn store_avatar(&self, kind: AvatarKind, data: &str) -> Result<tavern_domain::AssetPath, EventError> {
		self.media.store_avatar(kind, data).await.map_err(|err| match err {
			MediaError::Io(_) => EventError::Infrastructure(err.into()),
			client_fault => EventError::validation(client_fault.to_string()),
		})
	}

	/// Cache-busted avatar URL for a channel.
	pub fn channel_avatar_url(&self, channel: &Channel) -> String {
		AvatarUrl::channel(&self.avatar_base, channel.id, unix_ms_now())
	}

	/// Cache-busted avatar URL for a user.
	pub fn user_avatar_url(&self, user: &User) -> String {
		AvatarUrl::user(&self.avatar_base, user.id, unix_ms_now())
	}

	pub fn channel_summary(&self, channel: &Channel, rooms: &[Room]) -> ChannelSummary {
		ChannelSummary {
			id: channel.id,
			name: channel.name.clone(),
			invite_code: channel.invite_code.as_str().to_string(),
			avatar_url: self.channel_avatar_url(channel),
			rooms: rooms.iter().map(room_info).collect(),
		}
	}

	/// Public member payload. Deliberately excludes the email column.
	pub fn member_profile(&self, user: &User, admin: bool, presence: Presence) -> MemberProfile {
		MemberProfile {
			id: user.id,
			pseudo: user.pseudo.clone(),
			description: user.description.clone(),
			avatar_url: self.user_avatar_url(user),
			status: presence,
			admin,
		}
	}

	pub fn friend_info(&self, edge: &FriendEdge, peer: &User, presence: Presence) -> FriendInfo {
		FriendInfo {
			id: peer.id,
			pseudo: peer.pseudo.clone(),
			avatar_url: self.user_avatar_url(peer),
			status: presence,
			pending: edge.status == FriendStatus::Pending,
			conversation_id: edge.conversation_id,
		}
	}
}

/// Longest accepted message body, in characters.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Trim and bound a message body before it is stored or fanned out.
pub fn validate_content(content: &str) -> Result<String, super::error::EventError> {
	let content = content.trim();
	if content.is_empty() {
		return Err(super::error::EventError::validation("message must not be empty"));
	}
	if content.chars().count() > MAX_MESSAGE_LEN {
		return Err(super::error::EventError::validation(format!(
			"message must be at most {MAX_MESSAGE_LEN} characters"
		)));
	}
	Ok(content.to_string())
}

pub fn room_info(room: &Room) -> RoomInfo {
	RoomInfo {
		id: room.id,
		channel_id: room.channel_id,
		name: room.name.clone(),
		index: room.index,
	}
}

pub fn message_info(message: &Message) -> MessageInfo {
	MessageInfo {
		id: message.id,
		room_id: message.room_id,
		author_id: message.author_id,
		content: message.content.clone(),
		sent_at_ms: message.created_at_ms,
	}
}

pub fn private_message_info(message: &PrivateMessage) -> PrivateMessageInfo {
	PrivateMessageInfo {
		id: message.id,
		conversation_id: message.conversation_id,
		author_id: message.author_id,
		content: message.content.clone(),
		sent_at_ms: message.created_at_ms,
	}
}

#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-channel member limit.
pub const DEFAULT_MEMBER_LIMIT: u32 = 3000;

/// Default number of channels a single user may belong to.
pub const DEFAULT_CHANNELS_PER_USER: u32 = 10;

/// Default page size for member and message pagination.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Name of the room created with every new channel.
pub const GENERAL_ROOM_NAME: &str = "# General";

/// Ordering index of the default room.
pub const GENERAL_ROOM_INDEX: u32 = 1;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid numeric id: {0}")]
	InvalidNumber(String),
}

macro_rules! numeric_id {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub i64);

		impl $name {
			pub const fn as_i64(self) -> i64 {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let s = s.trim();
				if s.is_empty() {
					return Err(ParseIdError::Empty);
				}
				s.parse::<i64>()
					.map($name)
					.map_err(|_| ParseIdError::InvalidNumber(s.to_string()))
			}
		}
	};
}

numeric_id!(
	/// Authenticated user identifier.
	UserId
);
numeric_id!(
	/// Channel (community) identifier; also names the broadcast scope.
	ChannelId
);
numeric_id!(
	/// Room identifier within a channel.
	RoomId
);
numeric_id!(
	/// Monotonic message identifier, used as the pagination sequence.
	MessageId
);
numeric_id!(
	/// Private conversation identifier shared by a friend pair.
	ConversationId
);

/// Shareable token resolving to a channel for join purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteCode(String);

impl InviteCode {
	/// Create a non-empty invite code.
	pub fn new(code: impl Into<String>) -> Result<Self, ParseIdError> {
		let code = code.into();
		if code.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(code))
	}

	/// Generate a random invite code for channels created without one.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for InviteCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for InviteCode {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		InviteCode::new(s.trim().to_string())
	}
}

/// Storage path of a processed avatar asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetPath(pub String);

impl AssetPath {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for AssetPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Whether a user currently has a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
	Online,
	Offline,
}

impl Presence {
	pub const fn as_str(self) -> &'static str {
		match self {
			Presence::Online => "online",
			Presence::Offline => "offline",
		}
	}

	pub const fn from_connected(connected: bool) -> Self {
		if connected { Presence::Online } else { Presence::Offline }
	}
}

impl fmt::Display for Presence {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A named community with its own membership, rooms and admin set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
	pub id: ChannelId,
	pub name: String,
	pub invite_code: InviteCode,
	pub avatar: AssetPath,
	pub member_limit: u32,
	pub created_at_ms: i64,
}

/// A sub-conversation within a channel, holding ordered messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
	pub id: RoomId,
	pub channel_id: ChannelId,
	pub name: String,
	/// Ordering index, unique per channel.
	pub index: u32,
	pub created_at_ms: i64,
}

/// The authoritative (user, channel) relation carrying the admin flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
	pub user_id: UserId,
	pub channel_id: ChannelId,
	pub admin: bool,
	pub created_at_ms: i64,
}

/// Full user record as stored. `email` is sensitive and must never be
/// included in member listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub id: UserId,
	pub pseudo: String,
	pub email: String,
	pub description: String,
	pub avatar: AssetPath,
	pub created_at_ms: i64,
}

/// A chat message in a channel room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub room_id: RoomId,
	pub author_id: UserId,
	pub content: String,
	pub created_at_ms: i64,
}

/// A message in a private conversation between friends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
	pub id: MessageId,
	pub conversation_id: ConversationId,
	pub author_id: UserId,
	pub content: String,
	pub created_at_ms: i64,
}

/// State of a friend edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
	Pending,
	Accepted,
}

/// Pairwise friend relation. `requester` sent the request; the edge is
/// symmetric once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendEdge {
	pub requester: UserId,
	pub recipient: UserId,
	pub status: FriendStatus,
	pub conversation_id: ConversationId,
	pub created_at_ms: i64,
}

impl FriendEdge {
	/// The other end of the edge, from `user`'s point of view.
	pub fn peer_of(&self, user: UserId) -> UserId {
		if self.requester == user { self.recipient } else { self.requester }
	}

	/// Whether `user` is one of the two endpoints.
	pub fn involves(&self, user: UserId) -> bool {
		self.requester == user || self.recipient == user
	}
}

/// Avatar URL helpers. The embedded timestamp defeats client-side caching
/// after an avatar change; it is not a security property.
pub struct AvatarUrl;

impl AvatarUrl {
	/// URL for a channel avatar, e.g. `<base>/channel/7/1700000000000/avatar`.
	pub fn channel(base: &str, id: ChannelId, now_ms: i64) -> String {
		format!("{}/channel/{}/{}/avatar", base.trim_end_matches('/'), id, now_ms)
	}

	/// URL for a user avatar, e.g. `<base>/user/7/1700000000000/avatar`.
	pub fn user(base: &str, id: UserId, now_ms: i64) -> String {
		format!("{}/user/{}/{}/avatar", base.trim_end_matches('/'), id, now_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn numeric_ids_parse_and_display() {
		assert_eq!("42".parse::<UserId>().unwrap(), UserId(42));
		assert_eq!(" 7 ".parse::<ChannelId>().unwrap(), ChannelId(7));
		assert_eq!(RoomId(19).to_string(), "19");
	}

	#[test]
	fn rejects_bad_ids() {
		assert_eq!("".parse::<UserId>().unwrap_err(), ParseIdError::Empty);
		assert!(matches!(
			"abc".parse::<ChannelId>().unwrap_err(),
			ParseIdError::InvalidNumber(_)
		));
	}

	#[test]
	fn invite_codes_are_non_empty() {
		assert!(InviteCode::new("   ").is_err());
		assert!(!InviteCode::generate().as_str().is_empty());
	}

	#[test]
	fn friend_edge_peer_resolution() {
		let edge = FriendEdge {
			requester: UserId(1),
			recipient: UserId(2),
			status: FriendStatus::Accepted,
			conversation_id: ConversationId(9),
			created_at_ms: 0,
		};

		assert_eq!(edge.peer_of(UserId(1)), UserId(2));
		assert_eq!(edge.peer_of(UserId(2)), UserId(1));
		assert!(edge.involves(UserId(1)));
		assert!(!edge.involves(UserId(3)));
	}

	#[test]
	fn avatar_urls_embed_timestamp() {
		let url = AvatarUrl::channel("http://localhost:8080/avatars/", ChannelId(3), 1234);
		assert_eq!(url, "http://localhost:8080/avatars/channel/3/1234/avatar");

		let url = AvatarUrl::user("http://localhost:8080/avatars", UserId(5), 99);
		assert_eq!(url, "http://localhost:8080/avatars/user/5/99/avatar");
	}
}

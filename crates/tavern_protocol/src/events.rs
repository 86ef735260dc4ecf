#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tavern_domain::{ChannelId, ConversationId, MessageId, Presence, RoomId, UserId};

/// Envelope carried in every frame, both directions.
///
/// `request_id` correlates a mutating request with its single ack; it is
/// empty on server-initiated events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<E> {
	pub version: u32,

	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub request_id: String,

	#[serde(flatten)]
	pub event: E,
}

impl<E> Envelope<E> {
	/// Server-initiated envelope with no request correlation.
	pub fn event(event: E) -> Self {
		Self {
			version: crate::version::PROTOCOL_MAJOR,
			request_id: String::new(),
			event,
		}
	}

	/// Envelope answering the request identified by `request_id`.
	pub fn reply(request_id: impl Into<String>, event: E) -> Self {
		Self {
			version: crate::version::PROTOCOL_MAJOR,
			request_id: request_id.into(),
			event,
		}
	}
}

/// Uniform ack payload for request/response events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
	pub status: AckStatus,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl Ack {
	pub fn ok() -> Self {
		Self {
			status: AckStatus::Ok,
			message: None,
		}
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self {
			status: AckStatus::Error,
			message: Some(message.into()),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
	Ok,
	Error,
}

/// Mutable channel fields for `updateChannel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelValues {
	pub name: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub invite_code: Option<String>,
}

/// Mutable profile fields for `updateUser`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserValues {
	pub pseudo: String,

	#[serde(default)]
	pub description: String,
}

/// Client-to-server events. Variant names are the wire event names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
	/// Handshake; must be the first envelope on a new connection.
	Hello {
		token: String,
	},

	GetChannels,
	#[serde(rename_all = "camelCase")]
	CreateChannel {
		name: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		invite_code: Option<String>,
		/// Base64-encoded raw image bytes, already sized by the client.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		avatar: Option<String>,
	},
	#[serde(rename_all = "camelCase")]
	JoinChannelByInvite {
		invite_code: String,
	},
	#[serde(rename_all = "camelCase")]
	UpdateChannel {
		channel_id: ChannelId,
		values: ChannelValues,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		avatar: Option<String>,
	},
	#[serde(rename_all = "camelCase")]
	DeleteChannel {
		channel_id: ChannelId,
	},
	#[serde(rename_all = "camelCase")]
	LeaveChannel {
		channel_id: ChannelId,
	},

	/// Admission into a channel's broadcast scope.
	#[serde(rename_all = "camelCase")]
	JoinChannel {
		channel_id: ChannelId,
	},

	#[serde(rename_all = "camelCase")]
	GetChannelMembers {
		channel_id: ChannelId,
	},
	#[serde(rename_all = "camelCase")]
	LoadMoreMembers {
		channel_id: ChannelId,
		offset: u32,
	},

	#[serde(rename_all = "camelCase")]
	CreateRoom {
		channel_id: ChannelId,
		name: String,
	},
	#[serde(rename_all = "camelCase")]
	UpdateRoom {
		channel_id: ChannelId,
		room_id: RoomId,
		name: String,
		index: u32,
	},
	#[serde(rename_all = "camelCase")]
	DeleteRoom {
		channel_id: ChannelId,
		room_id: RoomId,
	},
	#[serde(rename_all = "camelCase")]
	JoinRoom {
		room_id: RoomId,
	},
	#[serde(rename_all = "camelCase")]
	LeaveRoom {
		room_id: RoomId,
	},
	#[serde(rename_all = "camelCase")]
	LoadMoreMessages {
		room_id: RoomId,
		offset: u32,
	},
	#[serde(rename_all = "camelCase")]
	SendMessage {
		room_id: RoomId,
		content: String,
	},

	#[serde(rename_all = "camelCase")]
	UpdateUser {
		values: UserValues,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		avatar: Option<String>,
	},

	#[serde(rename_all = "camelCase")]
	FriendRequest {
		recipient_id: UserId,
	},
	#[serde(rename_all = "camelCase")]
	AcceptFriendRequest {
		sender_id: UserId,
	},
	#[serde(rename_all = "camelCase")]
	DeclineFriendRequest {
		sender_id: UserId,
	},
	#[serde(rename_all = "camelCase")]
	DeleteFriend {
		friend_id: UserId,
		conversation_id: ConversationId,
	},
	#[serde(rename_all = "camelCase")]
	SendPrivateMessage {
		conversation_id: ConversationId,
		content: String,
	},
	#[serde(rename_all = "camelCase")]
	GetPrivateMessagesHistory {
		conversation_id: ConversationId,
	},
	#[serde(rename_all = "camelCase")]
	LoadMorePrivateMessages {
		conversation_id: ConversationId,
		offset: u32,
	},
}

/// Channel payload sent to clients, avatar URL already cache-busted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
	pub id: ChannelId,
	pub name: String,
	pub invite_code: String,
	pub avatar_url: String,
	pub rooms: Vec<RoomInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
	pub id: RoomId,
	pub channel_id: ChannelId,
	pub name: String,
	pub index: u32,
}

/// Member payload: public profile fields only, never email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
	pub id: UserId,
	pub pseudo: String,
	pub description: String,
	pub avatar_url: String,
	pub status: Presence,
	pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
	pub id: MessageId,
	pub room_id: RoomId,
	pub author_id: UserId,
	pub content: String,
	pub sent_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessageInfo {
	pub id: MessageId,
	pub conversation_id: ConversationId,
	pub author_id: UserId,
	pub content: String,
	pub sent_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendInfo {
	pub id: UserId,
	pub pseudo: String,
	pub avatar_url: String,
	pub status: Presence,
	pub pending: bool,
	pub conversation_id: ConversationId,
}

/// Server-to-client events, broadcast or targeted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
	#[serde(rename_all = "camelCase")]
	Welcome {
		server_name: String,
		server_time_unix_ms: i64,
		max_frame_bytes: u32,
	},

	Ack(Ack),

	Channels {
		channels: Vec<ChannelSummary>,
	},
	ChannelCreated {
		channel: ChannelSummary,
	},
	ChannelUpdated {
		channel: ChannelSummary,
	},
	ChannelDeleted {
		id: ChannelId,
	},
	UserJoinedChannel {
		member: MemberProfile,
	},
	UserLeftChannel {
		id: UserId,
	},

	#[serde(rename_all = "camelCase")]
	MemberList {
		users: Vec<MemberProfile>,
		total_count: u32,
	},
	MoreMembers {
		users: Vec<MemberProfile>,
	},

	#[serde(rename_all = "camelCase")]
	RoomList {
		channel_id: ChannelId,
		rooms: Vec<RoomInfo>,
	},
	#[serde(rename_all = "camelCase")]
	RoomDeleted {
		channel_id: ChannelId,
		room_id: RoomId,
	},

	#[serde(rename_all = "camelCase")]
	MessageHistory {
		room_id: RoomId,
		messages: Vec<MessageInfo>,
	},
	#[serde(rename_all = "camelCase")]
	MoreMessages {
		room_id: RoomId,
		messages: Vec<MessageInfo>,
	},
	Message {
		message: MessageInfo,
	},

	UserOnline {
		id: UserId,
	},
	UserOffline {
		id: UserId,
	},
	UserUpdated {
		member: MemberProfile,
	},

	FriendRequestReceived {
		from: FriendInfo,
	},
	FriendRequestAccepted {
		friend: FriendInfo,
	},
	FriendRequestDeclined {
		id: UserId,
	},
	#[serde(rename_all = "camelCase")]
	FriendDeleted {
		id: UserId,
		conversation_id: ConversationId,
	},
	PrivateMessage {
		message: PrivateMessageInfo,
	},
	#[serde(rename_all = "camelCase")]
	PrivateMessageHistory {
		conversation_id: ConversationId,
		messages: Vec<PrivateMessageInfo>,
	},
	#[serde(rename_all = "camelCase")]
	MorePrivateMessages {
		conversation_id: ConversationId,
		messages: Vec<PrivateMessageInfo>,
	},
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::version::PROTOCOL_MAJOR;

	#[test]
	fn client_event_wire_names_are_camel_case() {
		let env = Envelope {
			version: PROTOCOL_MAJOR,
			request_id: "r-1".to_string(),
			event: ClientEvent::JoinChannelByInvite {
				invite_code: "abc".to_string(),
			},
		};

		let json = serde_json::to_value(&env).unwrap();
		assert_eq!(json["event"], "joinChannelByInvite");
		assert_eq!(json["requestId"], "r-1");
		assert_eq!(json["data"]["inviteCode"], "abc");
	}

	#[test]
	fn unit_events_need_no_data() {
		let parsed: Envelope<ClientEvent> =
			serde_json::from_str(r#"{"version":1,"event":"getChannels"}"#).expect("parse");
		assert_eq!(parsed.event, ClientEvent::GetChannels);
		assert!(parsed.request_id.is_empty());
	}

	#[test]
	fn ack_shape_matches_contract() {
		let ok = serde_json::to_value(Ack::ok()).unwrap();
		assert_eq!(ok, serde_json::json!({"status": "ok"}));

		let err = serde_json::to_value(Ack::error("channel full")).unwrap();
		assert_eq!(err, serde_json::json!({"status": "error", "message": "channel full"}));
	}

	#[test]
	fn server_event_roundtrip() {
		let ev = ServerEvent::MemberList {
			users: vec![MemberProfile {
				id: UserId(4),
				pseudo: "ada".to_string(),
				description: String::new(),
				avatar_url: "/avatars/user/4/1/avatar".to_string(),
				status: Presence::Online,
				admin: true,
			}],
			total_count: 1,
		};

		let json = serde_json::to_string(&Envelope {
			version: PROTOCOL_MAJOR,
			request_id: String::new(),
			event: ev.clone(),
		})
		.unwrap();
		assert!(json.contains(r#""event":"memberList""#));
		assert!(json.contains(r#""totalCount":1"#));
		assert!(!json.contains("email"));

		let back: Envelope<ServerEvent> = serde_json::from_str(&json).unwrap();
		assert_eq!(back.event, ev);
	}

	#[test]
	fn unknown_event_is_rejected() {
		let res: Result<Envelope<ClientEvent>, _> =
			serde_json::from_str(r#"{"version":1,"event":"dropAllTables"}"#);
		assert!(res.is_err());
	}
}

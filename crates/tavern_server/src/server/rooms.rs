#![forbid(unsafe_code)]

use std::sync::Arc;

use tavern_domain::{ChannelId, GENERAL_ROOM_INDEX, Room, RoomId, UserId};
use tavern_protocol::ServerEvent;
use tracing::info;

use crate::util::time::unix_ms_now;

use super::channels::validate_name;
use super::core::{Core, message_info, room_info};
use super::error::EventError;
use super::gate;

/// Room lifecycle and room message history.
pub struct RoomManager {
	core: Arc<Core>,
}

impl RoomManager {
	pub fn new(core: Arc<Core>) -> Self {
		Self { core }
	}

	/// `createRoom` (admin): append a room at the next free index and
	/// re-broadcast the channel's room list.
	pub async fn create_room(&self, actor_id: UserId, channel_id: ChannelId, name: String) -> Result<(), EventError> {
		gate::authorize_admin(self.core.store.as_ref(), actor_id, channel_id).await?;

		let name = validate_name(&name)?;
		let index = self.core.store.next_room_index(channel_id).await?;
		let room = self.core.store.insert_room(channel_id, name, index, unix_ms_now()).await?;

		info!(channel = %channel_id, room = %room.id, "room created");
		self.broadcast_room_list(channel_id).await
	}

	/// `updateRoom` (admin): rename or reorder a room.
	pub async fn update_room(
		&self,
		actor_id: UserId,
		channel_id: ChannelId,
		room_id: RoomId,
		name: String,
		index: u32,
	) -> Result<(), EventError> {
		gate::authorize_admin(self.core.store.as_ref(), actor_id, channel_id).await?;
		self.room_in_channel(room_id, channel_id).await?;

		let name = validate_name(&name)?;
		if index == 0 {
			return Err(EventError::validation("room index must be positive"));
		}

		self.core.store.update_room(room_id, name, index).await?;
		self.broadcast_room_list(channel_id).await
	}

	/// `deleteRoom` (admin): every channel keeps its default room.
	pub async fn delete_room(&self, actor_id: UserId, channel_id: ChannelId, room_id: RoomId) -> Result<(), EventError> {
		gate::authorize_admin(self.core.store.as_ref(), actor_id, channel_id).await?;
		let room = self.room_in_channel(room_id, channel_id).await?;

		if room.index == GENERAL_ROOM_INDEX {
			return Err(EventError::validation("the default room cannot be deleted"));
		}

		self.core.store.delete_room(room_id).await?;
		self.core.hub.publish(channel_id, ServerEvent::RoomDeleted { channel_id, room_id }).await;
		Ok(())
	}

	/// `joinRoom`: the actor starts reading a room; reply with the newest
	/// page of its history.
	pub async fn join_room(&self, actor_id: UserId, room_id: RoomId) -> Result<(), EventError> {
		let room = self.room(room_id).await?;
		gate::authorize_member(self.core.store.as_ref(), actor_id, room.channel_id).await?;

		let messages = self.core.store.messages_page(room_id, 0, self.core.limits.page_size).await?;
		self.core
			.registry
			.send(
				actor_id,
				ServerEvent::MessageHistory {
					room_id,
					messages: messages.iter().map(message_info).collect(),
				},
			)
			.await;
		Ok(())
	}

	/// `loadMoreMessages`: older windows as the client scrolls back.
	pub async fn more_messages(&self, actor_id: UserId, room_id: RoomId, offset: u32) -> Result<(), EventError> {
		let room = self.room(room_id).await?;
		gate::authorize_member(self.core.store.as_ref(), actor_id, room.channel_id).await?;

		let messages = self
			.core
			.store
			.messages_page(room_id, offset, self.core.limits.page_size)
			.await?;
		self.core
			.registry
			.send(
				actor_id,
				ServerEvent::MoreMessages {
					room_id,
					messages: messages.iter().map(message_info).collect(),
				},
			)
			.await;
		Ok(())
	}

	async fn broadcast_room_list(&self, channel_id: ChannelId) -> Result<(), EventError> {
		let rooms = self.core.store.rooms_for_channel(channel_id).await?;
		self.core
			.hub
			.publish(
				channel_id,
				ServerEvent::RoomList {
					channel_id,
					rooms: rooms.iter().map(room_info).collect(),
				},
			)
			.await;
		Ok(())
	}

	async fn room(&self, room_id: RoomId) -> Result<Room, EventError> {
		self.core
			.store
			.room(room_id)
			.await?
			.ok_or_else(|| EventError::not_found("unknown room"))
	}

	async fn room_in_channel(&self, room_id: RoomId, channel_id: ChannelId) -> Result<Room, EventError> {
		let room = self.room(room_id).await?;
		if room.channel_id != channel_id {
			return Err(EventError::validation("room does not belong to this channel"));
		}
		Ok(room)
	}
}

#![forbid(unsafe_code)]

use std::sync::Arc;

use tavern_domain::{
	AssetPath, ChannelId, GENERAL_ROOM_INDEX, GENERAL_ROOM_NAME, InviteCode, Membership, Presence, UserId,
};
use tavern_protocol::{ChannelValues, ServerEvent};
use tracing::info;

use crate::media::AvatarKind;
use crate::util::time::unix_ms_now;

use super::core::Core;
use super::error::EventError;
use super::gate;
use super::registry::ConnectionHandle;

/// Longest accepted channel name.
pub const MAX_NAME_LEN: usize = 64;

/// Channel lifecycle and membership listing.
pub struct ChannelManager {
	core: Arc<Core>,
}

impl ChannelManager {
	pub fn new(core: Arc<Core>) -> Self {
		Self { core }
	}

	/// `getChannels`: the actor's channels with their rooms, as one event.
	pub async fn list_channels(&self, actor: UserId) -> Result<(), EventError> {
		let channels = self.core.store.channels_for_user(actor).await?;
		let mut summaries = Vec::with_capacity(channels.len());
		for channel in &channels {
			let rooms = self.core.store.rooms_for_channel(channel.id).await?;
			summaries.push(self.core.channel_summary(channel, &rooms));
		}

		self.core.registry.send(actor, ServerEvent::Channels { channels: summaries }).await;
		Ok(())
	}

	/// `createChannel`: the creator becomes the sole member and admin, and
	/// the channel starts with its default room.
	pub async fn create_channel(
		&self,
		actor: &ConnectionHandle,
		actor_id: UserId,
		name: String,
		invite_code: Option<String>,
		avatar: Option<String>,
	) -> Result<(), EventError> {
		let name = validate_name(&name)?;

		let joined = self.core.store.membership_count_for_user(actor_id).await?;
		if joined >= self.core.limits.channels_per_user {
			return Err(EventError::validation(format!(
				"you cannot belong to more than {} channels",
				self.core.limits.channels_per_user
			)));
		}

		let invite_code = match invite_code {
			Some(code) => {
				let code = InviteCode::new(code).map_err(|_| EventError::validation("invite code must not be empty"))?;
				if self.core.store.channel_by_invite(&code).await?.is_some() {
					return Err(EventError::validation("invite code already in use"));
				}
				code
			}
			None => InviteCode::generate(),
		};

		let avatar = self.resolve_avatar(AvatarKind::Channel, avatar.as_deref()).await?;
		let now = unix_ms_now();

		let channel = self
			.core
			.store
			.insert_channel(crate::store::NewChannel {
				name,
				invite_code,
				avatar,
				member_limit: self.core.limits.member_limit,
				created_at_ms: now,
			})
			.await?;

		self.core
			.store
			.insert_membership(Membership {
				user_id: actor_id,
				channel_id: channel.id,
				admin: true,
				created_at_ms: now,
			})
			.await?;

		let general = self
			.core
			.store
			.insert_room(channel.id, GENERAL_ROOM_NAME.to_string(), GENERAL_ROOM_INDEX, now)
			.await?;

		self.core.hub.subscribe(channel.id, actor.conn_id, actor.tx.clone()).await;

		info!(channel = %channel.id, creator = %actor_id, "channel created");
		let summary = self.core.channel_summary(&channel, std::slice::from_ref(&general));
		self.core.registry.send(actor_id, ServerEvent::ChannelCreated { channel: summary }).await;
		Ok(())
	}

	/// `joinChannelByInvite`: resolve the code, enforce limits, admit the
	/// connection and announce the new member to the scope.
	pub async fn join_by_invite(
		&self,
		actor: &ConnectionHandle,
		actor_id: UserId,
		invite_code: &str,
	) -> Result<(), EventError> {
		let code = InviteCode::new(invite_code).map_err(|_| EventError::validation("invite code must not be empty"))?;
		let channel = self
			.core
			.store
			.channel_by_invite(&code)
			.await?
			.ok_or_else(|| EventError::authorization("unknown invite code"))?;

		if self.core.store.membership(actor_id, channel.id).await?.is_some() {
			return Err(EventError::authorization("already a member of this channel"));
		}

		let members = self.core.store.member_count(channel.id).await?;
		if members >= channel.member_limit {
			return Err(EventError::authorization("channel is full"));
		}

		let joined = self.core.store.membership_count_for_user(actor_id).await?;
		if joined >= self.core.limits.channels_per_user {
			return Err(EventError::validation(format!(
				"you cannot belong to more than {} channels",
				self.core.limits.channels_per_user
			)));
		}

		let now = unix_ms_now();
		self.core
			.store
			.insert_membership(Membership {
				user_id: actor_id,
				channel_id: channel.id,
				admin: false,
				created_at_ms: now,
			})
			.await?;

		self.core.hub.subscribe(channel.id, actor.conn_id, actor.tx.clone()).await;

		let user = self
			.core
			.store
			.user(actor_id)
			.await?
			.ok_or_else(|| EventError::not_found("unknown user"))?;
		let member = self.core.member_profile(&user, false, Presence::Online);
		self.core
			.hub
			.publish_except(channel.id, actor.conn_id, ServerEvent::UserJoinedChannel { member })
			.await;

		let rooms = self.core.store.rooms_for_channel(channel.id).await?;
		let summary = self.core.channel_summary(&channel, &rooms);
		self.core.registry.send(actor_id, ServerEvent::ChannelCreated { channel: summary }).await;
		Ok(())
	}

	/// `joinChannel`: session-scoped admission into the broadcast scope of
	/// a channel the actor is already a member of.
	pub async fn join_channel(
		&self,
		actor: &ConnectionHandle,
		actor_id: UserId,
		channel_id: ChannelId,
	) -> Result<(), EventError> {
		gate::authorize_member(self.core.store.as_ref(), actor_id, channel_id).await?;
		self.core.hub.subscribe(channel_id, actor.conn_id, actor.tx.clone()).await;

		let rooms = self.core.store.rooms_for_channel(channel_id).await?;
		self.core
			.registry
			.send(
				actor_id,
				ServerEvent::RoomList {
					channel_id,
					rooms: rooms.iter().map(super::core::room_info).collect(),
				},
			)
			.await;
		Ok(())
	}

	/// `updateChannel` (admin): rename, rotate invite code, replace avatar.
	pub async fn update_channel(
		&self,
		actor_id: UserId,
		channel_id: ChannelId,
		values: ChannelValues,
		avatar: Option<String>,
	) -> Result<(), EventError> {
		gate::authorize_admin(self.core.store.as_ref(), actor_id, channel_id).await?;

		let name = validate_name(&values.name)?;
		let invite_code = match values.invite_code {
			Some(code) => {
				let code = InviteCode::new(code).map_err(|_| EventError::validation("invite code must not be empty"))?;
				if let Some(existing) = self.core.store.channel_by_invite(&code).await? {
					if existing.id != channel_id {
						return Err(EventError::validation("invite code already in use"));
					}
				}
				Some(code)
			}
			None => None,
		};

		let avatar = match avatar {
			Some(data) => Some(self.resolve_avatar(AvatarKind::Channel, Some(&data)).await?),
			None => None,
		};

		let channel = self
			.core
			.store
			.update_channel(
				channel_id,
				crate::store::ChannelPatch {
					name: Some(name),
					invite_code,
					avatar,
				},
			)
			.await?;

		let rooms = self.core.store.rooms_for_channel(channel_id).await?;
		let summary = self.core.channel_summary(&channel, &rooms);
		self.core.hub.publish(channel_id, ServerEvent::ChannelUpdated { channel: summary }).await;
		Ok(())
	}

	/// `deleteChannel` (admin): announce to the scope first, then retire
	/// the scope and drop the rows. Subscribers must hear about the
	/// deletion; nothing published after `retire` reaches them.
	pub async fn delete_channel(&self, actor_id: UserId, channel_id: ChannelId) -> Result<(), EventError> {
		gate::authorize_admin(self.core.store.as_ref(), actor_id, channel_id).await?;

		let avatar = self.core.store.channel(channel_id).await?.map(|c| c.avatar);

		self.core.hub.publish(channel_id, ServerEvent::ChannelDeleted { id: channel_id }).await;
		self.core.hub.retire(channel_id).await;
		self.core.store.delete_channel(channel_id).await?;

		if let Some(avatar) = avatar {
			self.core.media.remove_asset(&avatar).await;
		}

		info!(channel = %channel_id, actor = %actor_id, "channel deleted");
		Ok(())
	}

	/// `leaveChannel`: drop membership and scope admission, announce the
	/// departure to remaining subscribers.
	pub async fn leave_channel(
		&self,
		actor: &ConnectionHandle,
		actor_id: UserId,
		channel_id: ChannelId,
	) -> Result<(), EventError> {
		gate::authorize_member(self.core.store.as_ref(), actor_id, channel_id).await?;

		self.core.store.delete_membership(actor_id, channel_id).await?;
		self.core.hub.unsubscribe(channel_id, actor.conn_id).await;
		self.core.hub.publish(channel_id, ServerEvent::UserLeftChannel { id: actor_id }).await;
		Ok(())
	}

	/// `getChannelMembers`: first page plus the channel-wide total.
	pub async fn member_list(&self, actor_id: UserId, channel_id: ChannelId) -> Result<(), EventError> {
		gate::authorize_member(self.core.store.as_ref(), actor_id, channel_id).await?;

		let (users, total) = self.member_page(channel_id, 0).await?;
		self.core
			.registry
			.send(actor_id, ServerEvent::MemberList { users, total_count: total })
			.await;
		Ok(())
	}

	/// `loadMoreMembers`: subsequent pages at the client-supplied offset.
	pub async fn more_members(&self, actor_id: UserId, channel_id: ChannelId, offset: u32) -> Result<(), EventError> {
		gate::authorize_member(self.core.store.as_ref(), actor_id, channel_id).await?;

		let (users, _) = self.member_page(channel_id, offset).await?;
		self.core.registry.send(actor_id, ServerEvent::MoreMembers { users }).await;
		Ok(())
	}

	async fn member_page(
		&self,
		channel_id: ChannelId,
		offset: u32,
	) -> Result<(Vec<tavern_protocol::MemberProfile>, u32), EventError> {
		let page = self
			.core
			.store
			.members_page(channel_id, offset, self.core.limits.page_size)
			.await?;

		let mut users = Vec::with_capacity(page.members.len());
		for member in &page.members {
			let presence = Presence::from_connected(self.core.registry.is_online(member.user.id).await);
			users.push(self.core.member_profile(&member.user, member.admin, presence));
		}

		Ok((users, page.total))
	}

	async fn resolve_avatar(&self, kind: AvatarKind, data: Option<&str>) -> Result<AssetPath, EventError> {
		match data {
			None => Ok(self.core.media.default_asset()),
			Some(data) => self.core.store_avatar(kind, data).await,
		}
	}
}

pub(super) fn validate_name(name: &str) -> Result<String, EventError> {
	let name = name.trim();
	if name.is_empty() {
		return Err(EventError::validation("name must not be empty"));
	}
	if name.chars().count() > MAX_NAME_LEN {
		return Err(EventError::validation(format!("name must be at most {MAX_NAME_LEN} characters")));
	}
	Ok(name.to_string())
}

#![forbid(unsafe_code)]

use std::sync::Arc;

use tavern_domain::{Presence, UserId};
use tavern_protocol::{ServerEvent, UserValues};

use crate::media::AvatarKind;
use crate::store::UserPatch;

use super::error::EventError;

use super::core::Core;

/// Profile updates, propagated to every channel the user is visible in.
pub struct UserManager {
	core: Arc<Core>,
}

impl UserManager {
	pub fn new(core: Arc<Core>) -> Self {
		Self { core }
	}

	/// `updateUser`: apply the profile change and re-announce the member
	/// in each of the user's channels. The admin flag is per channel, so
	/// each scope gets its own payload.
	pub async fn update_user(&self, actor_id: UserId, values: UserValues, avatar: Option<String>) -> Result<(), EventError> {
		let pseudo = values.pseudo.trim();
		if pseudo.is_empty() {
			return Err(EventError::validation("pseudo must not be empty"));
		}

		let avatar = match avatar {
			Some(data) => Some(self.core.store_avatar(AvatarKind::User, &data).await?),
			None => None,
		};

		let user = self
			.core
			.store
			.update_user(
				actor_id,
				UserPatch {
					pseudo: Some(pseudo.to_string()),
					description: Some(values.description),
					avatar,
				},
			)
			.await
			.map_err(|err| match err {
				crate::store::StoreError::RowNotFound => EventError::not_found("unknown user"),
				other => other.into(),
			})?;

		for channel in self.core.store.channels_for_user(actor_id).await? {
			let Some(membership) = self.core.store.membership(actor_id, channel.id).await? else {
				continue;
			};
			let member = self.core.member_profile(&user, membership.admin, Presence::Online);
			self.core.hub.publish(channel.id, ServerEvent::UserUpdated { member }).await;
		}
		Ok(())
	}
}

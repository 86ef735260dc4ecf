#![forbid(unsafe_code)]

use tavern_domain::{ChannelId, Membership, UserId};

use crate::store::Store;

use super::error::EventError;

/// Authorize `user` as a member of `channel`, failing closed: any lookup
/// failure denies access. Every channel-scoped operation passes through
/// here before touching state.
pub async fn authorize_member(store: &dyn Store, user: UserId, channel: ChannelId) -> Result<Membership, EventError> {
	match store.membership(user, channel).await? {
		Some(membership) => Ok(membership),
		None => {
			if store.channel(channel).await?.is_none() {
				Err(EventError::not_found("unknown channel"))
			} else {
				Err(EventError::authorization("not a member of this channel"))
			}
		}
	}
}

/// Authorize `user` as an administrator of `channel`. The admin flag is
/// re-read from the store on every call; it is never cached on the
/// connection.
pub async fn authorize_admin(store: &dyn Store, user: UserId, channel: ChannelId) -> Result<Membership, EventError> {
	let membership = authorize_member(store, user, channel).await?;
	if !membership.admin {
		return Err(EventError::authorization("administrator privileges required"));
	}
	Ok(membership)
}

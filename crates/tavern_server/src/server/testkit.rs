#![forbid(unsafe_code)]

//! Shared fixtures for the server test modules: an in-memory `Core` and
//! fake connections whose outbound queues the tests read directly.

use std::sync::Arc;
use std::time::Duration;

use tavern_domain::{AssetPath, User, UserId};
use tavern_protocol::{ChannelSummary, Envelope, ServerEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::timeout;

use crate::media::DisabledMedia;
use crate::store::MemoryStore;

use super::core::{Core, Limits};
use super::hub::{ChannelHub, ChannelHubConfig};
use super::registry::{ConnectionHandle, ConnectionRegistry};

pub(super) type Outbound = mpsc::Receiver<Envelope<ServerEvent>>;

pub(super) fn core() -> Arc<Core> {
	core_with_limits(Limits::default())
}

pub(super) fn core_with_limits(limits: Limits) -> Arc<Core> {
	Arc::new(Core {
		store: Arc::new(MemoryStore::new()),
		registry: Arc::new(ConnectionRegistry::new()),
		hub: ChannelHub::new(ChannelHubConfig::default()),
		media: Arc::new(DisabledMedia),
		limits,
		avatar_base: "http://localhost:8080".to_string(),
	})
}

pub(super) async fn seed_user(core: &Core, id: i64, pseudo: &str) -> UserId {
	core.store
		.upsert_user(User {
			id: UserId(id),
			pseudo: pseudo.to_string(),
			email: format!("{pseudo}@example.com"),
			description: String::new(),
			avatar: AssetPath("avatars/default.png".to_string()),
			created_at_ms: 0,
		})
		.await
		.expect("seed user");
	UserId(id)
}

/// Register a fake connection for `user` and hand back its outbound queue.
pub(super) async fn connect(core: &Core, user: UserId, conn_id: u64) -> (ConnectionHandle, Outbound) {
	let (tx, rx) = mpsc::channel(32);
	let handle = ConnectionHandle { conn_id, tx };
	core.registry.register(user, handle.clone()).await;
	(handle, rx)
}

pub(super) async fn recv_envelope(rx: &mut Outbound) -> Envelope<ServerEvent> {
	timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected an event within timeout")
		.expect("channel open")
}

pub(super) async fn recv_event(rx: &mut Outbound) -> ServerEvent {
	recv_envelope(rx).await.event
}

pub(super) fn assert_no_event(rx: &mut Outbound) {
	match rx.try_recv() {
		Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
		Ok(envelope) => panic!("expected no event, got: {:?}", envelope.event),
	}
}

/// Pull the `channelCreated` payload a create or invite join sends back
/// to the actor.
pub(super) async fn expect_channel_created(rx: &mut Outbound) -> ChannelSummary {
	match recv_event(rx).await {
		ServerEvent::ChannelCreated { channel } => channel,
		other => panic!("expected channelCreated, got: {other:?}"),
	}
}

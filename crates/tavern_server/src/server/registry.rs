#![forbid(unsafe_code)]

use std::collections::HashMap;

use metrics::gauge;
use tavern_domain::UserId;
use tavern_protocol::{Envelope, ServerEvent};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Outbound queue of a single live connection.
pub type OutboundTx = mpsc::Sender<Envelope<ServerEvent>>;

/// A live connection as seen by the rest of the server.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
	/// Distinguishes this connection from a reconnect by the same user.
	pub conn_id: u64,
	pub tx: OutboundTx,
}

/// The user-to-connection map. At most one live connection per user;
/// a new registration displaces the old one (last wins).
#[derive(Default)]
pub struct ConnectionRegistry {
	inner: Mutex<HashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a connection for `user`, returning the handle it displaced
	/// if the user was already connected elsewhere.
	pub async fn register(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
		let mut inner = self.inner.lock().await;
		let displaced = inner.insert(user, handle);
		gauge!("tavern_online_users").set(inner.len() as f64);
		if displaced.is_some() {
			debug!(user = %user, "registry: displaced previous connection");
		}
		displaced
	}

	/// Remove `user`'s entry, but only if it still belongs to `conn_id`.
	/// A stale disconnect racing a reconnect must not evict the new
	/// connection.
	pub async fn unregister(&self, user: UserId, conn_id: u64) -> bool {
		let mut inner = self.inner.lock().await;
		let current = inner.get(&user).map(|h| h.conn_id);
		if current == Some(conn_id) {
			inner.remove(&user);
			gauge!("tavern_online_users").set(inner.len() as f64);
			true
		} else {
			false
		}
	}

	pub async fn handle(&self, user: UserId) -> Option<ConnectionHandle> {
		let inner = self.inner.lock().await;
		inner.get(&user).cloned()
	}

	pub async fn is_online(&self, user: UserId) -> bool {
		let inner = self.inner.lock().await;
		inner.contains_key(&user)
	}

	pub async fn online_count(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.len()
	}

	/// Fire-and-forget delivery to one user. Returns false if the user is
	/// offline or their queue is full; the event is dropped either way.
	pub async fn send(&self, user: UserId, event: ServerEvent) -> bool {
		let handle = {
			let inner = self.inner.lock().await;
			inner.get(&user).cloned()
		};

		let Some(handle) = handle else {
			return false;
		};

		match handle.tx.try_send(Envelope::event(event)) {
			Ok(()) => true,
			Err(err) => {
				metrics::counter!("tavern_registry_dropped_events").increment(1);
				debug!(user = %user, %err, "registry: dropped targeted event");
				false
			}
		}
	}
}

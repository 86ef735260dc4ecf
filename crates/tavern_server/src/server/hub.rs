#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tavern_domain::ChannelId;
use tavern_protocol::{Envelope, ServerEvent};
use tokio::sync::Mutex;
use tracing::debug;

use super::registry::OutboundTx;

/// Per-channel broadcast scopes. Each subscriber is a live connection's
/// outbound queue; delivery is best-effort `try_send`, never blocking a
/// publish on a slow consumer.
#[derive(Clone)]
pub struct ChannelHub {
	inner: Arc<Mutex<Inner>>,
	cfg: ChannelHubConfig,
}

#[derive(Debug, Clone)]
pub struct ChannelHubConfig {
	pub debug_logs: bool,
}

impl Default for ChannelHubConfig {
	fn default() -> Self {
		Self { debug_logs: false }
	}
}

#[derive(Default)]
struct Inner {
	scopes: HashMap<ChannelId, Scope>,
}

#[derive(Default)]
struct Scope {
	subscribers: HashMap<u64, OutboundTx>,
}

impl Scope {
	fn prune_closed(&mut self) {
		self.subscribers.retain(|_, tx| !tx.is_closed());
	}
}

impl ChannelHub {
	pub fn new(cfg: ChannelHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Admit a connection into a channel's scope. Re-subscribing replaces
	/// the previous sender for that connection.
	pub async fn subscribe(&self, channel: ChannelId, conn_id: u64, tx: OutboundTx) {
		let mut inner = self.inner.lock().await;
		let scope = inner.scopes.entry(channel).or_default();
		scope.prune_closed();
		scope.subscribers.insert(conn_id, tx);

		if self.cfg.debug_logs {
			debug!(channel = %channel, conn_id, subs = scope.subscribers.len(), "hub: subscribed");
		}
	}

	pub async fn unsubscribe(&self, channel: ChannelId, conn_id: u64) {
		let mut inner = self.inner.lock().await;
		if let Some(scope) = inner.scopes.get_mut(&channel) {
			scope.subscribers.remove(&conn_id);
			if scope.subscribers.is_empty() {
				inner.scopes.remove(&channel);
			}
		}
	}

	/// Remove a connection from every scope it is in; returns the channels
	/// it was subscribed to. Called on disconnect.
	pub async fn unsubscribe_all(&self, conn_id: u64) -> Vec<ChannelId> {
		let mut inner = self.inner.lock().await;
		let mut left = Vec::new();
		inner.scopes.retain(|channel, scope| {
			if scope.subscribers.remove(&conn_id).is_some() {
				left.push(*channel);
			}
			!scope.subscribers.is_empty()
		});
		left
	}

	/// Drop a channel's scope entirely. Called when the channel is deleted;
	/// any event published afterwards reaches nobody.
	pub async fn retire(&self, channel: ChannelId) {
		let mut inner = self.inner.lock().await;
		inner.scopes.remove(&channel);
	}

	/// Broadcast to every subscriber of the scope. Returns the number of
	/// queues the event was placed on.
	pub async fn publish(&self, channel: ChannelId, event: ServerEvent) -> usize {
		self.publish_filtered(channel, None, event).await
	}

	/// Broadcast to the scope, skipping one connection (typically the
	/// actor, who gets an ack or a targeted payload instead).
	pub async fn publish_except(&self, channel: ChannelId, except_conn_id: u64, event: ServerEvent) -> usize {
		self.publish_filtered(channel, Some(except_conn_id), event).await
	}

	async fn publish_filtered(&self, channel: ChannelId, except: Option<u64>, event: ServerEvent) -> usize {
		let mut inner = self.inner.lock().await;
		let Some(scope) = inner.scopes.get_mut(&channel) else {
			return 0;
		};

		scope.prune_closed();
		if scope.subscribers.is_empty() {
			inner.scopes.remove(&channel);
			return 0;
		}

		let envelope = Envelope::event(event);
		let mut delivered = 0usize;
		let mut dropped = 0u64;

		for (conn_id, tx) in scope.subscribers.iter() {
			if Some(*conn_id) == except {
				continue;
			}

			match tx.try_send(envelope.clone()) {
				Ok(()) => delivered += 1,
				Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => dropped += 1,
				Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		scope.prune_closed();
		if scope.subscribers.is_empty() {
			inner.scopes.remove(&channel);
		}

		if dropped > 0 {
			counter!("tavern_hub_dropped_events").increment(dropped);
			if self.cfg.debug_logs {
				debug!(channel = %channel, dropped, "hub: dropped due to full subscriber queues");
			}
		}

		delivered
	}

	/// Snapshot of live subscriber counts per channel.
	pub async fn subscriber_counts(&self) -> HashMap<ChannelId, usize> {
		let inner = self.inner.lock().await;
		inner
			.scopes
			.iter()
			.map(|(channel, scope)| {
				let live = scope.subscribers.values().filter(|tx| !tx.is_closed()).count();
				(*channel, live)
			})
			.collect()
	}
}

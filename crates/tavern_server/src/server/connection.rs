#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use tavern_domain::Presence;
use tavern_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, encode_frame};
use tavern_protocol::{Ack, ClientEvent, Envelope, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::util::time::unix_ms_now;

use super::auth::verify_hmac_token;
use super::core::Core;
use super::dispatch::MessageDispatcher;
use super::registry::ConnectionHandle;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: u32,

	/// Outbound queue depth; broadcasts beyond this are dropped.
	pub outbound_queue_capacity: usize,

	pub auth_hmac_secret: String,

	pub server_name: String,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE as u32,
			outbound_queue_capacity: 256,
			auth_hmac_secret: String::new(),
			server_name: format!("tavern-server/{}", env!("CARGO_PKG_VERSION")),
		}
	}
}

/// Drive one QUIC connection from handshake to teardown.
///
/// The first inbound envelope must be `hello`; everything after runs
/// through the dispatcher under the authenticated identity.
pub async fn handle_connection(
	conn_id: u64,
	connection: quinn::Connection,
	core: Arc<Core>,
	dispatcher: Arc<MessageDispatcher>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("tavern_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("tavern_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (mut send, mut recv) = connection.accept_bi().await.context("accept bidirectional stream")?;

	let max_frame = settings.max_frame_bytes as usize;
	let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Envelope<ClientEvent>>();
	let reader_task = tokio::spawn(async move {
		let mut buf = bytes::BytesMut::with_capacity(16 * 1024);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("stream read failed")),
			};

			metrics::counter!("tavern_bytes_in_total").increment(n as u64);
			buf.extend_from_slice(&tmp[..n]);

			loop {
				match tavern_protocol::try_decode_frame_from_buffer::<Envelope<ClientEvent>>(&mut buf, max_frame) {
					Ok(Some(envelope)) => {
						metrics::counter!("tavern_envelopes_in_total").increment(1);

						if ctrl_tx.send(envelope).is_err() {
							return Ok(());
						}
					}
					Ok(None) => break,
					Err(e) => {
						metrics::counter!("tavern_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode frame"));
					}
				}
			}
		}
	});

	// Handshake: the very first envelope carries the token.
	let hello = ctrl_rx.recv().await.ok_or_else(|| anyhow!("connection closed before hello"))?;
	let ClientEvent::Hello { token } = hello.event else {
		metrics::counter!("tavern_handshake_failures_total").increment(1);
		send_event(&mut send, ServerEvent::Ack(Ack::error("expected hello")), max_frame).await.ok();
		return Err(anyhow!("first envelope was not hello"));
	};

	let claims = match verify_hmac_token(token.trim(), &settings.auth_hmac_secret) {
		Ok(claims) => claims,
		Err(e) => {
			metrics::counter!("tavern_handshake_failures_total").increment(1);
			warn!(conn_id, error = %e, "auth token rejected");
			send_event(&mut send, ServerEvent::Ack(Ack::error("invalid auth token")), max_frame).await.ok();
			return Ok(());
		}
	};

	let user_id = claims.user_id();
	if core.store.user(user_id).await?.is_none() {
		warn!(conn_id, user = %user_id, "token valid but user unknown");
		send_event(&mut send, ServerEvent::Ack(Ack::error("unknown user")), max_frame).await.ok();
		return Ok(());
	}

	info!(conn_id, user = %user_id, "connection authenticated");
	metrics::counter!("tavern_hello_total").increment(1);

	// Outbound path: a single writer task owns the send half; everything
	// else reaches this connection through the queue.
	let (out_tx, mut out_rx) = mpsc::channel::<Envelope<ServerEvent>>(settings.outbound_queue_capacity);
	let writer_task = tokio::spawn(async move {
		while let Some(envelope) = out_rx.recv().await {
			let frame = match encode_frame(&envelope, max_frame) {
				Ok(f) => f,
				Err(e) => {
					warn!(conn_id, error = %e, "failed to encode outbound frame");
					continue;
				}
			};

			metrics::counter!("tavern_envelopes_out_total").increment(1);
			metrics::counter!("tavern_bytes_out_total").increment(frame.len() as u64);

			if let Err(e) = send.write_all(&frame).await {
				debug!(conn_id, error = %e, "stream write failed");
				return;
			}
		}
	});

	let handle = ConnectionHandle {
		conn_id,
		tx: out_tx.clone(),
	};

	// Last wins: a reconnect displaces the previous registration. The
	// displaced transport is left to die on its own; its teardown no-ops
	// because its conn_id no longer matches.
	if let Some(displaced) = core.registry.register(user_id, handle.clone()).await {
		info!(conn_id, user = %user_id, displaced_conn = displaced.conn_id, "displaced previous connection");
	}

	let welcome = ServerEvent::Welcome {
		server_name: settings.server_name.clone(),
		server_time_unix_ms: unix_ms_now(),
		max_frame_bytes: settings.max_frame_bytes,
	};
	out_tx.send(Envelope::event(welcome)).await.ok();

	if let Err(e) = dispatcher.friends().broadcast_presence(user_id, Presence::Online).await {
		warn!(conn_id, user = %user_id, error = %e, "presence broadcast failed");
	}

	// Initial sync: the client starts from its channel list.
	if let Err(e) = dispatcher.channels().list_channels(user_id).await {
		warn!(conn_id, user = %user_id, error = %e, "initial channel list failed");
	}

	while let Some(envelope) = ctrl_rx.recv().await {
		dispatcher.dispatch(&handle, user_id, envelope).await;
	}

	// Teardown order matters: only the current registration removes the
	// user, but this connection always leaves its broadcast scopes.
	let was_current = core.registry.unregister(user_id, conn_id).await;
	core.hub.unsubscribe_all(conn_id).await;

	if was_current {
		if let Err(e) = dispatcher.friends().broadcast_presence(user_id, Presence::Offline).await {
			warn!(conn_id, user = %user_id, error = %e, "presence broadcast failed");
		}
	}

	drop(handle);
	drop(out_tx);

	let _ = writer_task.await;
	let _ = reader_task.await;

	info!(conn_id, user = %user_id, "connection closed");
	Ok(())
}

async fn send_event(send: &mut quinn::SendStream, event: ServerEvent, max_frame: usize) -> anyhow::Result<()> {
	let frame = encode_frame(&Envelope::event(event), max_frame)?;
	send.write_all(&frame).await.context("stream write")?;
	Ok(())
}

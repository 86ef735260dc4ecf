#![forbid(unsafe_code)]

mod config;
mod media;
mod quic;
mod server;
mod store;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::media::{DisabledMedia, LocalMedia, MediaPipeline};
use crate::quic::config::QuicServerConfig;
use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::core::{Core, Limits};
use crate::server::dispatch::MessageDispatcher;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::hub::{ChannelHub, ChannelHubConfig};
use crate::server::registry::ConnectionRegistry;
use crate::store::{MemoryStore, SqliteStore, Store};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: tavern_server [--bind host:port]\n\
\n\
Options:\n\
\t--bind    QUIC bind address (default: 127.0.0.1:18310)\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind = "127.0.0.1:18310".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	bind.parse::<SocketAddr>().unwrap_or_else(|e| {
		eprintln!("invalid bind address {bind:?}: {e}");
		usage_and_exit();
	})
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tavern_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("tavern_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let Some(auth_hmac_secret) = server_cfg.server.auth_hmac_secret.clone() else {
		return Err(anyhow::anyhow!(
			"auth_hmac_secret is required (set [server] auth_hmac_secret or TAVERN_AUTH_HMAC_SECRET)"
		));
	};

	let store: Arc<dyn Store> = if server_cfg.persistence.enabled {
		let Some(database_url) = server_cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};
		info!(%database_url, "connecting persistent store");
		Arc::new(SqliteStore::connect(database_url).await?)
	} else {
		warn!("persistence disabled; all state is in memory and lost on restart");
		Arc::new(MemoryStore::new())
	};

	let media: Arc<dyn MediaPipeline> = if server_cfg.media.enabled {
		let Some(root) = server_cfg.media.root.clone() else {
			return Err(anyhow::anyhow!("media enabled but no media root configured"));
		};
		info!(root = %root.display(), "avatar uploads enabled");
		Arc::new(LocalMedia::new(root))
	} else {
		Arc::new(DisabledMedia)
	};

	let defaults = Limits::default();
	let limits = Limits {
		channels_per_user: server_cfg.limits.channels_per_user.unwrap_or(defaults.channels_per_user),
		member_limit: server_cfg.limits.member_limit.unwrap_or(defaults.member_limit),
		page_size: server_cfg.limits.page_size.unwrap_or(defaults.page_size),
	};

	let avatar_base = server_cfg
		.server
		.avatar_base_url
		.clone()
		.unwrap_or_else(|| format!("http://{bind_addr}"));

	let registry = Arc::new(ConnectionRegistry::new());
	let hub = ChannelHub::new(ChannelHubConfig::default());
	let core = Arc::new(Core {
		store,
		registry: Arc::clone(&registry),
		hub: hub.clone(),
		media,
		limits,
		avatar_base,
	});
	let dispatcher = Arc::new(MessageDispatcher::new(Arc::clone(&core)));

	let health_state = HealthState::new(Arc::clone(&registry), hub.clone());
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let quic_cfg = QuicServerConfig::dev(bind_addr);
	let endpoint = if let (Some(cert_path), Some(key_path)) = (
		server_cfg.server.tls_cert_path.as_deref(),
		server_cfg.server.tls_key_path.as_deref(),
	) {
		info!(cert = %cert_path.display(), key = %key_path.display(), "loading TLS cert/key");
		quic_cfg.bind_endpoint_with_tls(cert_path, key_path)?
	} else {
		let (endpoint, server_cert_der) = quic_cfg.bind_dev_endpoint()?;
		info!(
			bind = %bind_addr,
			cert_der_len = server_cert_der.len(),
			"tavern_server: QUIC endpoint ready (dev self-signed cert)"
		);
		endpoint
	};

	let conn_settings = ConnectionSettings {
		auth_hmac_secret: auth_hmac_secret.expose().to_string(),
		..ConnectionSettings::default()
	};

	health_state.mark_ready();

	let next_conn_id = AtomicU64::new(1);

	loop {
		let Some(connecting) = endpoint.accept().await else {
			break;
		};

		let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
		metrics::counter!("tavern_connections_total").increment(1);

		let core = Arc::clone(&core);
		let dispatcher = Arc::clone(&dispatcher);
		let conn_settings = conn_settings.clone();

		tokio::spawn(async move {
			match connecting.await {
				Ok(connection) => {
					info!(conn_id, remote = %connection.remote_address(), "accepted connection");
					if let Err(e) = handle_connection(conn_id, connection, core, dispatcher, conn_settings).await {
						warn!(conn_id, error = %e, "connection handler exited with error");
					}
				}
				Err(e) => {
					warn!(conn_id, error = %e, "failed to establish QUIC connection");
				}
			}
		});
	}

	Ok(())
}

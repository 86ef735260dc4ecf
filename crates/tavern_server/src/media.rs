#![forbid(unsafe_code)]

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tavern_domain::AssetPath;
use thiserror::Error;

/// Largest accepted avatar after base64 decoding.
pub const MAX_AVATAR_BYTES: usize = 1024 * 1024;

/// Asset stored when no upload is provided.
pub const DEFAULT_AVATAR: &str = "avatars/default.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarKind {
	Channel,
	User,
}

impl AvatarKind {
	fn dir(self) -> &'static str {
		match self {
			AvatarKind::Channel => "channel",
			AvatarKind::User => "user",
		}
	}
}

#[derive(Debug, Error)]
pub enum MediaError {
	#[error("avatar is not valid base64")]
	InvalidEncoding,
	#[error("avatar exceeds {MAX_AVATAR_BYTES} bytes")]
	TooLarge,
	#[error("avatar is not a supported image format")]
	UnsupportedFormat,
	#[error("failed to persist avatar")]
	Io(#[from] std::io::Error),
}

impl MediaError {
	/// Whether the client sent bad input, as opposed to a server fault.
	pub fn is_client_fault(&self) -> bool {
		!matches!(self, MediaError::Io(_))
	}
}

/// Decodes, validates and persists uploaded avatars.
#[async_trait]
pub trait MediaPipeline: Send + Sync {
	async fn store_avatar(&self, kind: AvatarKind, data_base64: &str) -> Result<AssetPath, MediaError>;

	/// Best-effort removal of a stored asset. The default asset is
	/// shared and never removed.
	async fn remove_asset(&self, path: &AssetPath) {
		let _ = path;
	}

	/// Placeholder used when no avatar is uploaded.
	fn default_asset(&self) -> AssetPath {
		AssetPath(DEFAULT_AVATAR.to_string())
	}
}

/// Writes avatars under a local directory, one file per upload.
pub struct LocalMedia {
	root: PathBuf,
}

impl LocalMedia {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}
}

#[async_trait]
impl MediaPipeline for LocalMedia {
	async fn store_avatar(&self, kind: AvatarKind, data_base64: &str) -> Result<AssetPath, MediaError> {
		let bytes = STANDARD.decode(data_base64.trim()).map_err(|_| MediaError::InvalidEncoding)?;
		if bytes.len() > MAX_AVATAR_BYTES {
			return Err(MediaError::TooLarge);
		}

		let ext = sniff_image_ext(&bytes).ok_or(MediaError::UnsupportedFormat)?;
		let name = format!("{}.{ext}", uuid::Uuid::new_v4().simple());
		let dir = self.root.join(kind.dir());
		tokio::fs::create_dir_all(&dir).await?;
		tokio::fs::write(dir.join(&name), &bytes).await?;

		Ok(AssetPath(format!("{}/{}", kind.dir(), name)))
	}

	async fn remove_asset(&self, path: &AssetPath) {
		if path.as_str() == DEFAULT_AVATAR {
			return;
		}

		if let Err(e) = tokio::fs::remove_file(self.root.join(path.as_str())).await {
			tracing::debug!(asset = path.as_str(), error = %e, "failed to remove asset");
		}
	}
}

/// No-op pipeline; every upload resolves to the default asset. Used when
/// media storage is switched off in configuration.
pub struct DisabledMedia;

#[async_trait]
impl MediaPipeline for DisabledMedia {
	async fn store_avatar(&self, _kind: AvatarKind, _data_base64: &str) -> Result<AssetPath, MediaError> {
		Ok(self.default_asset())
	}
}

fn sniff_image_ext(bytes: &[u8]) -> Option<&'static str> {
	if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
		Some("png")
	} else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
		Some("jpg")
	} else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
		Some("gif")
	} else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
		Some("webp")
	} else {
		None
	}
}

#![forbid(unsafe_code)]

use tavern_protocol::Ack;
use thiserror::Error;

use crate::store::StoreError;

/// Failure taxonomy for inbound events.
///
/// Every variant maps to exactly one error ack; none of them leaves
/// partial broadcasts behind.
#[derive(Debug, Error)]
pub enum EventError {
	/// Payload failed semantic validation before any handler logic ran.
	#[error("{0}")]
	Validation(String),

	/// Actor is not allowed to perform the operation.
	#[error("{0}")]
	Authorization(String),

	/// Referenced channel/room/user/conversation does not exist.
	#[error("{0}")]
	NotFound(String),

	/// Data store or media pipeline failure; surfaced generically.
	#[error("internal error")]
	Infrastructure(#[source] anyhow::Error),
}

impl EventError {
	pub fn validation(msg: impl Into<String>) -> Self {
		Self::Validation(msg.into())
	}

	pub fn authorization(msg: impl Into<String>) -> Self {
		Self::Authorization(msg.into())
	}

	pub fn not_found(msg: impl Into<String>) -> Self {
		Self::NotFound(msg.into())
	}

	/// Ack payload for this error. Infrastructure details never reach
	/// the client.
	pub fn to_ack(&self) -> Ack {
		match self {
			EventError::Infrastructure(_) => Ack::error("internal error"),
			other => Ack::error(other.to_string()),
		}
	}
}

impl From<StoreError> for EventError {
	fn from(err: StoreError) -> Self {
		EventError::Infrastructure(err.into())
	}
}

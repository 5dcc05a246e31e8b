use std::io;
use std::sync::Arc;
use std::time::Duration;

use pyhint_protocol::RequestKind;

use crate::config::ConfigError;
use crate::session::SessionId;

/// Result alias for client operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Client errors.
///
/// Cloneable so one failure can be handed to every waiter of a shared start
/// and to every pending request of a crashed worker.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The worker's configuration cannot produce a backend.
	#[error("configuration error: {0}")]
	Config(Arc<ConfigError>),
	/// The daemon process could not be started.
	#[error("failed to spawn daemon `{command}`: {reason}")]
	Spawn { command: String, reason: String },
	/// The transport went away before the request was answered.
	#[error("service stopped")]
	ServiceStopped,
	/// No answer within the allotted time.
	#[error("{0} request timed out")]
	Timeout(RequestKind),
	/// A previous construction failed with the same configuration.
	#[error("worker for session {session} is unusable: {reason}")]
	Unusable { session: SessionId, reason: String },
	/// The session's workers keep crashing; rebuilding is paused.
	#[error("worker for session {session} keeps crashing; retrying in {retry_in:?}")]
	Backoff { session: SessionId, retry_in: Duration },
	/// The daemon sent something that is not a valid answer.
	#[error("protocol error: {0}")]
	Protocol(String),
	#[error("{0}")]
	Io(Arc<io::Error>),
	#[error("deserialization failed: {0}")]
	Json(Arc<serde_json::Error>),
}

impl Error {
	/// Errors the user should see in the status bar rather than only in logs.
	pub fn is_user_visible(&self) -> bool {
		matches!(self, Error::Config(_) | Error::Spawn { .. } | Error::Unusable { .. } | Error::Backoff { .. })
	}
}

impl From<io::Error> for Error {
	fn from(err: io::Error) -> Self {
		Error::Io(Arc::new(err))
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Json(Arc::new(err))
	}
}

impl From<ConfigError> for Error {
	fn from(err: ConfigError) -> Self {
		Error::Config(Arc::new(err))
	}
}

impl From<pyhint_protocol::Error> for Error {
	fn from(err: pyhint_protocol::Error) -> Self {
		match err {
			pyhint_protocol::Error::Json(err) => err.into(),
			pyhint_protocol::Error::Io(err) => err.into(),
			pyhint_protocol::Error::Protocol(msg) => Error::Protocol(msg),
			other => Error::Protocol(other.to_string()),
		}
	}
}

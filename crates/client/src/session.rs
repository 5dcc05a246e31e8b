use std::fmt;
use std::sync::Arc;

/// Opaque identifier of an editor window; stable for the window's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for SessionId {
	fn from(value: &str) -> Self {
		Self(value.into())
	}
}

impl From<String> for SessionId {
	fn from(value: String) -> Self {
		Self(value.into())
	}
}

impl From<u64> for SessionId {
	fn from(value: u64) -> Self {
		Self(value.to_string().into())
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Identifier of a view (buffer pane) inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

impl fmt::Display for ViewId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "view:{}", self.0)
	}
}

/// Identity of one worker instance: the session it serves plus a generation.
///
/// A rebuilt worker for the same session gets a fresh generation, so stale
/// handles can be told apart from the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId {
	pub session: SessionId,
	pub generation: u64,
}

impl fmt::Display for WorkerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}", self.session, self.generation)
	}
}

//! Ways of getting a request to an analyzer and its answer back.
//!
//! A transport only moves messages. Answers are routed through the worker's
//! [`CorrelationTable`](crate::correlation::CorrelationTable), which every
//! transport is constructed with.

mod in_process;
mod subprocess;

use async_trait::async_trait;
use pyhint_protocol::WireRequest;

pub use in_process::InProcessTransport;
pub use subprocess::{CommandSpec, DAEMON_LOG_TARGET, SubprocessTransport};

use crate::Result;

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
	Running,
	/// Shut down on request.
	Stopped,
	/// Went away on its own: the daemon exited or its pipes broke.
	Crashed,
}

impl TransportStatus {
	pub fn is_running(self) -> bool {
		matches!(self, Self::Running)
	}
}

/// Message path between a worker and its analyzer.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Hands `request` to the analyzer. Never blocks on the analysis itself.
	///
	/// The request must already be registered in the correlation table. An
	/// error means the request was not sent and nothing will resolve it.
	fn submit(&self, request: WireRequest) -> Result<()>;

	/// Current lifecycle state.
	fn status(&self) -> TransportStatus;

	fn is_alive(&self) -> bool {
		self.status().is_running()
	}

	/// Stops the transport. Idempotent.
	///
	/// Requests still in flight are failed with
	/// [`Error::ServiceStopped`](crate::Error::ServiceStopped).
	async fn shutdown(&self);
}

//! Editor side of pyhint.
//!
//! Each editor window is a session. The [`SessionRegistry`] owns one
//! [`Worker`] per session, built lazily from the session's
//! [`ClientConfig`] and rebuilt when that configuration changes or the worker
//! dies. A worker pairs a [`Transport`] (analysis on a serial executor in this
//! process, or a daemon subprocess speaking newline-delimited JSON) with a
//! [`Multiplexer`] that tags each request with a correlation id and a
//! [`CorrelationTable`] that routes each answer to exactly one callback.
//!
//! Callbacks run on the editor's UI thread through a
//! [`Dispatcher`](pyhint_worker::Dispatcher). [`PyHint`] is the facade the
//! editor talks to; completion queries go through a per-session
//! [`CompletionGuard`] that debounces keystrokes and drops stale answers.

mod completion;
mod config;
mod correlation;
mod editor;
mod environment;
mod error;
mod multiplexer;
mod registry;
mod session;
mod transport;
mod worker;

pub use completion::{CompletionGuard, Cursor, GuardState, Query, rank_completions};
pub use config::{ClientConfig, ConfigError, CrashBackoff, SubprocessConfig, TransportConfig};
pub use correlation::{Callback, CorrelationTable, Outcome, Pending};
pub use editor::{PyHint, StatusSink, ViewState, to_relative_path};
pub use environment::{Environment, PathContext, ResolvedEnvironment, assemble_sys_path, expand_path};
pub use error::{Error, Result};
pub use multiplexer::{Multiplexer, RequestData};
pub use registry::SessionRegistry;
pub use session::{SessionId, ViewId, WorkerId};
pub use transport::{
	CommandSpec, DAEMON_LOG_TARGET, InProcessTransport, SubprocessTransport, Transport, TransportStatus,
};
pub use worker::{AnalyzerFactory, CorrelationHandle, DefaultLauncher, Worker, WorkerLauncher};

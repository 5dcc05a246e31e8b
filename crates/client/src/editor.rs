//! Editor-facing entry points.
//!
//! Nothing here returns an error to the editor. Every request ends in its
//! callback, on the UI thread, with either a result or an empty value;
//! failures are logged, and the ones a user can act on are shown once per
//! session through the [`StatusSink`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use pyhint_protocol::{Location, Payload, RequestKind};
use pyhint_worker::{Dispatcher, TaskClass, spawn};

use crate::Error;
use crate::completion::{CompletionGuard, Cursor, Query, rank_completions};
use crate::config::ClientConfig;
use crate::multiplexer::RequestData;
use crate::registry::SessionRegistry;
use crate::session::{SessionId, ViewId};

/// Snapshot of the view a request is made from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
	pub session: SessionId,
	pub view: ViewId,
	/// Whole document text.
	pub text: String,
	/// Cursor as a character offset into `text`.
	pub cursor: usize,
	/// `None` for unsaved buffers.
	pub path: Option<PathBuf>,
}

impl ViewState {
	/// 1-based line and 0-based character column of the cursor.
	pub fn line_column(&self) -> (u32, u32) {
		let mut line = 1u32;
		let mut column = 0u32;
		for ch in self.text.chars().take(self.cursor) {
			if ch == '\n' {
				line += 1;
				column = 0;
			} else {
				column += 1;
			}
		}
		(line, column)
	}

	pub fn request_data(&self) -> RequestData {
		let (line, offset) = self.line_column();
		RequestData {
			source: self.text.clone(),
			line,
			offset,
			filename: self
				.path
				.as_deref()
				.map(|path| path.to_string_lossy().into_owned())
				.unwrap_or_default(),
		}
	}

	fn completion_cursor(&self) -> Cursor {
		Cursor::new(self.view, self.cursor)
	}
}

/// Where user-visible failures go, typically the editor's status bar.
pub trait StatusSink: Send + Sync {
	fn show_status(&self, session: &SessionId, message: &str);
}

impl<F> StatusSink for F
where
	F: Fn(&SessionId, &str) + Send + Sync,
{
	fn show_status(&self, session: &SessionId, message: &str) {
		self(session, message)
	}
}

/// Logs failures and shows user-visible ones once per session.
#[derive(Clone, Default)]
struct Reporter {
	sink: Option<Arc<dyn StatusSink>>,
	reported: Arc<Mutex<HashSet<SessionId>>>,
}

impl Reporter {
	fn report(&self, session: &SessionId, kind: RequestKind, err: &Error) {
		if !err.is_user_visible() {
			tracing::debug!(session = %session, kind = %kind, error = %err, "request failed");
			return;
		}
		if !self.reported.lock().insert(session.clone()) {
			tracing::debug!(session = %session, kind = %kind, error = %err, "request failed (already reported)");
			return;
		}
		tracing::warn!(session = %session, kind = %kind, error = %err, "request failed");
		if let Some(sink) = &self.sink {
			sink.show_status(session, &format!("pyhint: {err}"));
		}
	}

	fn forget(&self, session: &SessionId) {
		self.reported.lock().remove(session);
	}
}

type CompletionReadyHook = Arc<dyn Fn(&SessionId, Cursor) + Send + Sync + 'static>;

/// The editor plugin's core: turns view snapshots into worker requests and
/// results back into UI callbacks.
pub struct PyHint {
	registry: Arc<SessionRegistry>,
	dispatcher: Dispatcher,
	default_config: Arc<ClientConfig>,
	configs: RwLock<HashMap<SessionId, Arc<ClientConfig>>>,
	guards: Mutex<HashMap<SessionId, CompletionGuard>>,
	reporter: Reporter,
	ready_hook: Option<CompletionReadyHook>,
}

impl std::fmt::Debug for PyHint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PyHint")
			.field("registry", &self.registry)
			.field("sessions", &self.configs.read().len())
			.finish_non_exhaustive()
	}
}

impl PyHint {
	pub fn new(registry: Arc<SessionRegistry>, dispatcher: Dispatcher, default_config: ClientConfig) -> Self {
		Self {
			registry,
			dispatcher,
			default_config: Arc::new(default_config),
			configs: RwLock::new(HashMap::new()),
			guards: Mutex::new(HashMap::new()),
			reporter: Reporter::default(),
			ready_hook: None,
		}
	}

	pub fn with_status_sink(mut self, sink: impl StatusSink + 'static) -> Self {
		self.reporter.sink = Some(Arc::new(sink));
		self
	}

	/// Sets the hook run on the UI thread when completions for a cursor are
	/// ready; the editor re-opens its popup from it.
	pub fn with_completion_ready_hook(mut self, hook: impl Fn(&SessionId, Cursor) + Send + Sync + 'static) -> Self {
		self.ready_hook = Some(Arc::new(hook));
		self
	}

	pub fn registry(&self) -> &Arc<SessionRegistry> {
		&self.registry
	}

	/// Replaces a session's configuration. Its worker is rebuilt on next use.
	pub fn set_session_config(&self, session: &SessionId, config: ClientConfig) {
		let config = Arc::new(config);
		let previous = self.configs.write().insert(session.clone(), Arc::clone(&config));
		if previous.is_some_and(|previous| previous == config) {
			return;
		}
		tracing::debug!(session = %session, "session configuration changed");
		if let Some(guard) = self.guards.lock().remove(session) {
			guard.reset();
		}
		self.reporter.forget(session);
	}

	/// Forgets a session and retires its worker.
	pub fn close_session(&self, session: &SessionId) {
		self.configs.write().remove(session);
		if let Some(guard) = self.guards.lock().remove(session) {
			guard.reset();
		}
		self.reporter.forget(session);
		self.registry.invalidate(session);
	}

	fn config_for(&self, session: &SessionId) -> Arc<ClientConfig> {
		self.configs
			.read()
			.get(session)
			.cloned()
			.unwrap_or_else(|| Arc::clone(&self.default_config))
	}

	fn guard_for(&self, session: &SessionId) -> CompletionGuard {
		let mut guards = self.guards.lock();
		if let Some(guard) = guards.get(session) {
			return guard.clone();
		}

		let mut guard = CompletionGuard::new(self.config_for(session).completion_debounce());
		if let Some(hook) = &self.ready_hook {
			let hook = Arc::clone(hook);
			let session = session.clone();
			guard = guard.with_ready_hook(move |cursor| hook(&session, cursor));
		}
		guards.insert(session.clone(), guard.clone());
		guard
	}

	/// Completion query from the editor's popup.
	///
	/// Returns [`Query::Pending`] while the answer is being computed; the
	/// ready hook fires when a repeated query at the same cursor will return
	/// the ranked items.
	pub fn request_completion(&self, view: &ViewState) -> Query {
		let guard = self.guard_for(&view.session);
		let session = view.session.clone();
		let view_id = view.view;
		let data = view.request_data();
		let config = self.config_for(&session);
		let registry = Arc::clone(&self.registry);
		let dispatcher = self.dispatcher.clone();
		let reporter = self.reporter.clone();
		let responder = guard.clone();

		let query = guard.query(view.completion_cursor(), move |generation| {
			spawn(TaskClass::Interactive, async move {
				match registry.get_or_create_worker(&session, config).await {
					Ok(worker) => {
						worker.request_with_callback(RequestKind::Autocomplete, data, Some(view_id), move |outcome| match outcome {
							Ok(Some(Payload::Completions(items))) => {
								responder.on_response(generation, items);
							}
							Ok(_) => {
								responder.on_response(generation, Vec::new());
							}
							Err(err) => {
								reporter.report(&session, RequestKind::Autocomplete, &err);
								responder.on_failure(generation);
							}
						});
					}
					Err(err) => {
						dispatcher.run_on_ui_thread(move || {
							reporter.report(&session, RequestKind::Autocomplete, &err);
							responder.on_failure(generation);
						});
					}
				}
			});
		});

		match query {
			Query::Ready(mut items) => {
				rank_completions(&mut items, &view.text);
				Query::Ready(items)
			}
			Query::Pending => Query::Pending,
		}
	}

	/// Definition locations of the name under the cursor.
	pub fn request_goto(&self, view: &ViewState, callback: impl FnOnce(Vec<Location>) + Send + 'static) {
		self.request(view, RequestKind::Goto, locations, callback);
	}

	/// Usage locations of the name under the cursor.
	pub fn request_usages(&self, view: &ViewState, callback: impl FnOnce(Vec<Location>) + Send + 'static) {
		self.request(view, RequestKind::Usages, locations, callback);
	}

	pub fn request_docstring(&self, view: &ViewState, callback: impl FnOnce(Option<String>) + Send + 'static) {
		self.request(view, RequestKind::Docstring, text, callback);
	}

	/// One-line signature of the callable under the cursor.
	pub fn request_signature(&self, view: &ViewState, callback: impl FnOnce(Option<String>) + Send + 'static) {
		self.request(view, RequestKind::Signature, text, callback);
	}

	/// Parameter snippet for the call being typed, e.g. `${1:a}, b=${2:2}`.
	///
	/// Answers `None` without asking the worker when argument completion is off.
	pub fn request_funcargs(&self, view: &ViewState, callback: impl FnOnce(Option<String>) + Send + 'static) {
		if !self.config_for(&view.session).complete_funcargs.is_enabled() {
			tracing::trace!(session = %view.session, "argument completion disabled; skipping funcargs");
			self.dispatcher.run_on_ui_thread(move || callback(None));
			return;
		}
		self.request(view, RequestKind::Funcargs, text, callback);
	}

	fn request<T, C>(&self, view: &ViewState, kind: RequestKind, extract: fn(Payload) -> Option<T>, callback: C)
	where
		T: Default + Send + 'static,
		C: FnOnce(T) + Send + 'static,
	{
		let session = view.session.clone();
		let view_id = view.view;
		let data = view.request_data();
		let config = self.config_for(&session);
		let registry = Arc::clone(&self.registry);
		let dispatcher = self.dispatcher.clone();
		let reporter = self.reporter.clone();

		spawn(TaskClass::Interactive, async move {
			match registry.get_or_create_worker(&session, config).await {
				Ok(worker) => {
					worker.request_with_callback(kind, data, Some(view_id), move |outcome| {
						let value = match outcome {
							Ok(Some(payload)) => extract(payload).unwrap_or_default(),
							Ok(None) => T::default(),
							Err(err) => {
								reporter.report(&session, kind, &err);
								T::default()
							}
						};
						callback(value);
					});
				}
				Err(err) => {
					dispatcher.run_on_ui_thread(move || {
						reporter.report(&session, kind, &err);
						callback(T::default());
					});
				}
			}
		});
	}
}

fn locations(payload: Payload) -> Option<Vec<Location>> {
	match payload {
		Payload::Locations(locations) => Some(locations),
		_ => None,
	}
}

fn text(payload: Payload) -> Option<Option<String>> {
	match payload {
		Payload::Text(text) if !text.is_empty() => Some(Some(text)),
		_ => None,
	}
}

/// Shows `path` relative to the first project folder containing it.
///
/// Paths outside every folder come back unchanged.
pub fn to_relative_path(path: &str, folders: &[PathBuf]) -> String {
	let candidate = Path::new(path);
	folders
		.iter()
		.find_map(|folder| candidate.strip_prefix(folder).ok())
		.filter(|relative| !relative.as_os_str().is_empty())
		.map(|relative| relative.to_string_lossy().into_owned())
		.unwrap_or_else(|| path.to_owned())
}

#[cfg(test)]
mod tests;

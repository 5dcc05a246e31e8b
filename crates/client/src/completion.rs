//! Completion staleness guard with debounce.
//!
//! The editor's completion query is synchronous and must return at once, so
//! completion is a two-phase handshake: the first query at a cursor
//! dispatches a request and answers [`Query::Pending`]; when the answer lands
//! the guard becomes ready and fires its ready hook so the editor can query
//! again, and that second query at the same cursor takes the cached items.
//!
//! Every new cursor bumps a generation. An answer carrying an older
//! generation is stale and is dropped without touching the UI. Requests are
//! never cancelled in flight; only their results are discarded.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pyhint_protocol::Completion;
use pyhint_worker::{TaskClass, spawn};
use tokio_util::sync::CancellationToken;

use crate::session::ViewId;

/// Where a completion was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor {
	pub view: ViewId,
	/// Character offset in the view's buffer.
	pub offset: usize,
}

impl Cursor {
	pub fn new(view: ViewId, offset: usize) -> Self {
		Self { view, offset }
	}
}

/// Guard state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GuardState {
	#[default]
	Idle,
	/// One request outstanding for this cursor.
	Awaiting(Cursor),
	/// Answer cached until the popup consumes it.
	Ready(Cursor, Vec<Completion>),
}

/// Answer to [`CompletionGuard::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
	/// Nothing to show yet; the ready hook fires when there is.
	Pending,
	Ready(Vec<Completion>),
}

type ReadyHook = Arc<dyn Fn(Cursor) + Send + Sync + 'static>;

#[derive(Default)]
struct Inner {
	state: GuardState,
	generation: u64,
	debounce: Option<CancellationToken>,
}

/// Per-session completion state machine.
///
/// Cheap to clone; clones share state. Meant to be driven from the UI thread.
#[derive(Clone)]
pub struct CompletionGuard {
	inner: Arc<Mutex<Inner>>,
	debounce: Duration,
	ready_hook: Option<ReadyHook>,
}

impl std::fmt::Debug for CompletionGuard {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.inner.lock();
		f.debug_struct("CompletionGuard")
			.field("state", &inner.state)
			.field("generation", &inner.generation)
			.field("debounce", &self.debounce)
			.finish_non_exhaustive()
	}
}

impl CompletionGuard {
	pub fn new(debounce: Duration) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			debounce,
			ready_hook: None,
		}
	}

	/// Sets the hook run when an answer makes the guard ready.
	pub fn with_ready_hook(mut self, hook: impl Fn(Cursor) + Send + Sync + 'static) -> Self {
		self.ready_hook = Some(Arc::new(hook));
		self
	}

	/// Asks for completions at `cursor`.
	///
	/// Takes the cached items if they were computed for `cursor`. Otherwise
	/// supersedes whatever was pending and schedules `dispatch` after the
	/// debounce delay; a newer query before the delay elapses cancels it, so
	/// a burst of keystrokes dispatches once. `dispatch` receives the
	/// generation to hand back to [`on_response`](Self::on_response).
	pub fn query(&self, cursor: Cursor, dispatch: impl FnOnce(u64) + Send + 'static) -> Query {
		let (generation, token) = {
			let mut inner = self.inner.lock();
			if matches!(&inner.state, GuardState::Ready(ready, _) if *ready == cursor)
				&& let GuardState::Ready(_, items) = std::mem::take(&mut inner.state)
			{
				tracing::trace!(view = %cursor.view, offset = cursor.offset, items = items.len(), "completion consumed");
				return Query::Ready(items);
			}
			if matches!(&inner.state, GuardState::Awaiting(awaiting) if *awaiting == cursor) {
				return Query::Pending;
			}

			inner.generation = inner.generation.wrapping_add(1);
			inner.state = GuardState::Awaiting(cursor);
			if let Some(previous) = inner.debounce.take() {
				previous.cancel();
			}
			let token = CancellationToken::new();
			inner.debounce = Some(token.clone());
			(inner.generation, token)
		};

		tracing::trace!(view = %cursor.view, offset = cursor.offset, generation, "completion requested");
		if self.debounce.is_zero() {
			dispatch(generation);
			return Query::Pending;
		}

		let delay = self.debounce;
		spawn(TaskClass::Interactive, async move {
			tokio::select! {
				_ = token.cancelled() => {}
				_ = tokio::time::sleep(delay) => dispatch(generation),
			}
		});
		Query::Pending
	}

	/// Delivers the answer for `generation`.
	///
	/// Returns false and drops `items` if a newer query has superseded it.
	pub fn on_response(&self, generation: u64, items: Vec<Completion>) -> bool {
		let cursor = {
			let mut inner = self.inner.lock();
			let GuardState::Awaiting(cursor) = inner.state else {
				tracing::debug!(generation, "completion answer arrived while not awaiting; discarding");
				return false;
			};
			if generation != inner.generation {
				tracing::debug!(generation, current = inner.generation, "discarding stale completion answer");
				return false;
			}
			inner.debounce = None;
			inner.state = GuardState::Ready(cursor, items);
			cursor
		};

		if let Some(hook) = &self.ready_hook {
			hook(cursor);
		}
		true
	}

	/// Abandons the request for `generation` after a failed answer.
	pub fn on_failure(&self, generation: u64) -> bool {
		let mut inner = self.inner.lock();
		if generation != inner.generation || !matches!(inner.state, GuardState::Awaiting(_)) {
			return false;
		}
		inner.debounce = None;
		inner.state = GuardState::Idle;
		true
	}

	/// Drops any pending or cached completion.
	pub fn reset(&self) {
		let mut inner = self.inner.lock();
		if let Some(token) = inner.debounce.take() {
			token.cancel();
		}
		inner.generation = inner.generation.wrapping_add(1);
		inner.state = GuardState::Idle;
	}

	pub fn state(&self) -> GuardState {
		self.inner.lock().state.clone()
	}

	pub fn generation(&self) -> u64 {
		self.inner.lock().generation
	}
}

/// Orders completions the way the popup shows them.
///
/// Items whose insert text occurs more often in `buffer` come first, then
/// items with fewer leading or trailing underscores, then alphabetically.
pub fn rank_completions(items: &mut [Completion], buffer: &str) {
	items.sort_by_cached_key(|item| {
		let insert = item.insert.as_str();
		let frequency = buffer.matches(insert).count();
		let underscores = insert.len() - insert.trim_matches('_').len();
		(Reverse(frequency), underscores, insert.to_owned())
	});
}

#[cfg(test)]
mod tests;

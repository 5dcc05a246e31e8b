//! Pending requests keyed by correlation token.
//!
//! Every entry is removed under the table lock before its callback runs, so a
//! token is consumed at most once no matter how many threads race to answer it
//! (a duplicate response, a crash sweep and a timeout sweep can all arrive
//! together). Callbacks always run outside the lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pyhint_protocol::{CorrelationId, Payload, RequestKind, WireResponse};
use tokio::sync::Notify;

use crate::session::{SessionId, ViewId};
use crate::{Error, Result};

/// What a request ends with: a payload, an empty answer, or a failure.
pub type Outcome = Result<Option<Payload>>;

/// Invoked exactly once with a request's outcome.
pub type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// A request waiting for its answer.
pub struct Pending {
	pub kind: RequestKind,
	pub session: SessionId,
	pub view: Option<ViewId>,
	pub created: Instant,
	pub callback: Callback,
}

impl Pending {
	pub fn new(kind: RequestKind, session: SessionId, view: Option<ViewId>, callback: Callback) -> Self {
		Self {
			kind,
			session,
			view,
			created: Instant::now(),
			callback,
		}
	}
}

impl std::fmt::Debug for Pending {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Pending")
			.field("kind", &self.kind)
			.field("session", &self.session)
			.field("view", &self.view)
			.field("created", &self.created)
			.finish_non_exhaustive()
	}
}

/// Correlation table of one worker.
#[derive(Debug, Default)]
pub struct CorrelationTable {
	entries: Mutex<HashMap<CorrelationId, Pending>>,
	idle: Notify,
}

impl CorrelationTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `pending` under `id`.
	///
	/// A token collision replaces the older entry and fails it, so neither
	/// callback is lost.
	pub fn register(&self, id: CorrelationId, pending: Pending) {
		let replaced = self.entries.lock().insert(id.clone(), pending);
		if let Some(old) = replaced {
			tracing::warn!(correlation = %id, "correlation token reused; failing the older request");
			(old.callback)(Err(Error::Protocol(format!("correlation token {id} reused"))));
		}
	}

	/// Removes the entry for `id` and hands it `outcome`.
	///
	/// Returns false, and drops `outcome`, if the token is unknown: already
	/// answered, swept, or never issued here.
	pub fn resolve(&self, id: &CorrelationId, outcome: Outcome) -> bool {
		let Some(pending) = self.take(id) else {
			tracing::trace!(correlation = %id, "no pending request for response; dropping");
			return false;
		};
		(pending.callback)(outcome);
		true
	}

	/// Routes a daemon response to its request.
	///
	/// A payload whose shape does not match the registered kind resolves the
	/// request with a protocol error.
	pub fn complete(&self, response: WireResponse) -> bool {
		let Some(pending) = self.take(&response.uuid) else {
			tracing::trace!(correlation = %response.uuid, kind = %response.kind, "no pending request for response; dropping");
			return false;
		};

		let outcome = match response.payload {
			Some(payload) if !payload.fits(pending.kind) || response.kind != pending.kind => {
				tracing::warn!(
					correlation = %response.uuid,
					expected = %pending.kind,
					got = %response.kind,
					"response does not match its request"
				);
				Err(Error::Protocol(format!("expected a {} answer, got {}", pending.kind, response.kind)))
			}
			payload => Ok(payload),
		};
		(pending.callback)(outcome);
		true
	}

	/// Fails every pending request with `error`. Returns how many were failed.
	pub fn fail_all(&self, error: Error) -> usize {
		let drained: Vec<(CorrelationId, Pending)> = {
			let mut entries = self.entries.lock();
			entries.drain().collect()
		};
		self.idle.notify_waiters();

		let count = drained.len();
		for (id, pending) in drained {
			tracing::debug!(correlation = %id, kind = %pending.kind, error = %error, "failing pending request");
			(pending.callback)(Err(error.clone()));
		}
		count
	}

	/// Fails requests older than `ttl` with a timeout. Returns how many were swept.
	pub fn sweep(&self, ttl: Duration) -> usize {
		let now = Instant::now();
		let expired: Vec<(CorrelationId, Pending)> = {
			let mut entries = self.entries.lock();
			let ids: Vec<CorrelationId> = entries
				.iter()
				.filter(|(_, pending)| now.saturating_duration_since(pending.created) >= ttl)
				.map(|(id, _)| id.clone())
				.collect();
			ids.into_iter()
				.filter_map(|id| entries.remove(&id).map(|pending| (id, pending)))
				.collect()
		};
		if !expired.is_empty() && self.is_empty() {
			self.idle.notify_waiters();
		}

		let count = expired.len();
		for (id, pending) in expired {
			tracing::warn!(correlation = %id, kind = %pending.kind, session = %pending.session, "sweeping orphaned request");
			(pending.callback)(Err(Error::Timeout(pending.kind)));
		}
		count
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Waits until no request is pending.
	pub async fn wait_idle(&self) {
		loop {
			let notified = self.idle.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			if self.is_empty() {
				return;
			}
			notified.await;
		}
	}

	fn take(&self, id: &CorrelationId) -> Option<Pending> {
		let mut entries = self.entries.lock();
		let pending = entries.remove(id);
		if pending.is_some() && entries.is_empty() {
			self.idle.notify_waiters();
		}
		pending
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use pyhint_protocol::{Completion, Location};

	use super::*;

	type Seen = Arc<parking_lot::Mutex<Vec<Outcome>>>;

	fn recording(seen: &Seen) -> Callback {
		let seen = Arc::clone(seen);
		Box::new(move |outcome| seen.lock().push(outcome))
	}

	fn pending(kind: RequestKind, callback: Callback) -> Pending {
		Pending::new(kind, SessionId::from("w1"), None, callback)
	}

	fn goto_response(id: &CorrelationId, line: u32) -> WireResponse {
		WireResponse::new(id.clone(), RequestKind::Goto, Some(Payload::Locations(vec![Location::new("", line, 1)])))
	}

	#[test]
	fn responses_reach_only_their_own_request() {
		let table = CorrelationTable::new();
		let (first, second) = (CorrelationId::new(), CorrelationId::new());
		let first_seen = Seen::default();
		let second_seen = Seen::default();
		table.register(first.clone(), pending(RequestKind::Goto, recording(&first_seen)));
		table.register(second.clone(), pending(RequestKind::Goto, recording(&second_seen)));

		assert!(table.complete(goto_response(&second, 2)));
		assert!(table.complete(goto_response(&first, 1)));

		let first_seen = first_seen.lock();
		let second_seen = second_seen.lock();
		assert!(matches!(&first_seen[..], [Ok(Some(Payload::Locations(l)))] if l[0].line == 1));
		assert!(matches!(&second_seen[..], [Ok(Some(Payload::Locations(l)))] if l[0].line == 2));
	}

	#[test]
	fn duplicate_response_is_a_no_op() {
		let table = CorrelationTable::new();
		let id = CorrelationId::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&calls);
		table.register(
			id.clone(),
			pending(
				RequestKind::Goto,
				Box::new(move |_| {
					counter.fetch_add(1, Ordering::SeqCst);
				}),
			),
		);

		assert!(table.complete(goto_response(&id, 1)));
		assert!(!table.complete(goto_response(&id, 1)));
		assert!(!table.resolve(&id, Ok(None)));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn concurrent_resolution_delivers_once() {
		let table = Arc::new(CorrelationTable::new());
		let id = CorrelationId::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&calls);
		table.register(
			id.clone(),
			pending(
				RequestKind::Docstring,
				Box::new(move |_| {
					counter.fetch_add(1, Ordering::SeqCst);
				}),
			),
		);

		let threads: Vec<_> = (0..8)
			.map(|i| {
				let table = Arc::clone(&table);
				let id = id.clone();
				std::thread::spawn(move || {
					if i % 2 == 0 {
						table.resolve(&id, Ok(Some(Payload::Text("doc".into()))));
					} else {
						table.fail_all(Error::ServiceStopped);
					}
				})
			})
			.collect();
		for thread in threads {
			thread.join().unwrap();
		}

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(table.is_empty());
	}

	#[test]
	fn unknown_tokens_are_dropped_silently() {
		let table = CorrelationTable::new();
		assert!(!table.complete(goto_response(&CorrelationId::from("nobody"), 1)));
	}

	#[test]
	fn mismatched_payload_is_a_protocol_error() {
		let table = CorrelationTable::new();
		let id = CorrelationId::new();
		let seen = Seen::default();
		table.register(id.clone(), pending(RequestKind::Autocomplete, recording(&seen)));

		table.complete(goto_response(&id, 1));

		assert!(matches!(&seen.lock()[..], [Err(Error::Protocol(_))]));
	}

	#[test]
	fn null_payload_is_an_empty_answer() {
		let table = CorrelationTable::new();
		let id = CorrelationId::new();
		let seen = Seen::default();
		table.register(id.clone(), pending(RequestKind::Autocomplete, recording(&seen)));

		table.complete(WireResponse::new(id, RequestKind::Autocomplete, None));

		assert!(matches!(&seen.lock()[..], [Ok(None)]));
	}

	#[test]
	fn fail_all_fails_every_entry_once() {
		let table = CorrelationTable::new();
		let seen = Seen::default();
		for _ in 0..2 {
			table.register(CorrelationId::new(), pending(RequestKind::Usages, recording(&seen)));
		}

		assert_eq!(table.fail_all(Error::ServiceStopped), 2);
		assert_eq!(table.fail_all(Error::ServiceStopped), 0);
		let seen = seen.lock();
		assert_eq!(seen.len(), 2);
		assert!(seen.iter().all(|o| matches!(o, Err(Error::ServiceStopped))));
	}

	#[test]
	fn sweep_only_fails_old_entries() {
		let table = CorrelationTable::new();
		let seen = Seen::default();
		let mut old = pending(RequestKind::Autocomplete, recording(&seen));
		old.created = Instant::now() - Duration::from_secs(60);
		table.register(CorrelationId::new(), old);
		table.register(CorrelationId::new(), pending(RequestKind::Autocomplete, recording(&seen)));

		assert_eq!(table.sweep(Duration::from_secs(30)), 1);
		assert_eq!(table.len(), 1);
		assert!(matches!(&seen.lock()[..], [Err(Error::Timeout(RequestKind::Autocomplete))]));
	}

	#[tokio::test]
	async fn wait_idle_returns_once_drained() {
		let table = Arc::new(CorrelationTable::new());
		let id = CorrelationId::new();
		table.register(id.clone(), pending(RequestKind::Signature, Box::new(|_| {})));

		let waiter = tokio::spawn({
			let table = Arc::clone(&table);
			async move { table.wait_idle().await }
		});
		tokio::task::yield_now().await;
		assert!(!waiter.is_finished());

		table.resolve(&id, Ok(Some(Payload::Completions(vec![Completion::new("a", "a")]))));
		waiter.await.unwrap();
	}
}

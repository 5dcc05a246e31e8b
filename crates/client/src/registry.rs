//! Session registry.
//!
//! Maps each editor session to at most one worker. Workers are built lazily
//! on first use, rebuilt when the session's configuration changes or the
//! worker dies, and retired (not killed) when replaced so requests already
//! dispatched to them can finish.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use pyhint_worker::{GenerationClock, TaskClass, spawn};
use tokio::sync::{Mutex, watch};

use crate::config::ClientConfig;
use crate::session::{SessionId, WorkerId};
use crate::transport::TransportStatus;
use crate::worker::{Worker, WorkerLauncher};
use crate::{Error, Result};

type SharedStart = Option<Arc<Result<Arc<Worker>>>>;
type InFlightMap = Arc<Mutex<HashMap<SessionId, Arc<InFlightStart>>>>;

/// What a session currently maps to.
enum Slot {
	Live(Arc<Worker>),
	/// Construction failed for `config`; not retried until the config changes
	/// or the session is invalidated.
	Unusable { config: Arc<ClientConfig>, reason: String },
}

#[derive(Default)]
struct RegistryState {
	slots: HashMap<SessionId, Slot>,
	/// Recent crash times per session, oldest first.
	crashes: HashMap<SessionId, VecDeque<Instant>>,
}

/// Tracking state for a worker construction in progress.
struct InFlightStart {
	config: Arc<ClientConfig>,
	tx: watch::Sender<SharedStart>,
	rx: watch::Receiver<SharedStart>,
}

/// Registry of per-session workers.
///
/// # Concurrency
///
/// - `state`: `RwLock` over the session map; never held across an await
/// - `inflight`: async `Mutex` gate so only one construction per session runs
///   at a time; concurrent callers wait on the leader's `watch` channel
pub struct SessionRegistry {
	launcher: Arc<dyn WorkerLauncher>,
	state: RwLock<RegistryState>,
	inflight: InFlightMap,
	generations: GenerationClock,
}

impl std::fmt::Debug for SessionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionRegistry")
			.field("sessions", &self.state.read().slots.len())
			.field("generation", &self.generations.current())
			.finish_non_exhaustive()
	}
}

/// Outcome of looking at a session's current slot.
enum Existing {
	Reuse(Arc<Worker>),
	Build,
}

impl SessionRegistry {
	pub fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
		Self {
			launcher,
			state: RwLock::new(RegistryState::default()),
			inflight: Arc::new(Mutex::new(HashMap::new())),
			generations: GenerationClock::new(),
		}
	}

	/// Returns the session's worker, building one if needed.
	///
	/// An existing worker is reused when it is alive and was built from an
	/// equal configuration. Otherwise it is replaced; the old worker is
	/// retired in the background and its in-flight requests still complete.
	/// Concurrent callers for one session share a single construction.
	///
	/// # Errors
	///
	/// - [`Error::Unusable`] if construction already failed for this configuration
	/// - [`Error::Backoff`] if the session's workers keep crashing
	/// - whatever the launcher reports for a fresh construction failure
	pub async fn get_or_create_worker(&self, session: &SessionId, config: Arc<ClientConfig>) -> Result<Arc<Worker>> {
		loop {
			// 1. Fast path
			if let Existing::Reuse(worker) = self.check_existing(session, &config)? {
				return Ok(worker);
			}
			self.check_backoff(session, &config)?;

			// 2. Leader election
			let (inflight, is_leader) = {
				let mut inflight_map = self.inflight.lock().await;
				if let Some(f) = inflight_map.get(session) {
					(Arc::clone(f), false)
				} else {
					let (tx, rx) = watch::channel(None);
					let f = Arc::new(InFlightStart {
						config: Arc::clone(&config),
						tx,
						rx,
					});
					inflight_map.insert(session.clone(), Arc::clone(&f));
					(f, true)
				}
			};

			if !is_leader {
				// 3a. Wait for the leader, then take its result only if it was
				// built for the same configuration.
				let result = wait_for_leader(&inflight).await;
				match &*result {
					Ok(worker) if *inflight.config == *config && worker.is_alive() => return Ok(Arc::clone(worker)),
					Err(err) if *inflight.config == *config => return Err(err.clone()),
					_ => {
						tokio::task::yield_now().await;
						continue;
					}
				}
			}

			// 3b. Leader work
			let guard = StartGuard::new(session.clone(), Arc::clone(&self.inflight), inflight);

			// Re-check state after winning the election to prevent a double build
			match self.check_existing(session, &config) {
				Ok(Existing::Build) => {}
				Ok(Existing::Reuse(worker)) => return guard.complete(Ok(worker)),
				Err(err) => return guard.complete(Err(err)),
			}

			let id = WorkerId {
				session: session.clone(),
				generation: self.generations.next(),
			};
			tracing::info!(session = %session, worker = %id, "building worker");

			let result = match self.launcher.launch(id.clone(), Arc::clone(&config)).await {
				Ok(worker) => {
					let worker = Arc::new(worker);
					let replaced = self.state.write().slots.insert(session.clone(), Slot::Live(Arc::clone(&worker)));
					if let Some(Slot::Live(old)) = replaced {
						retire(old);
					}
					Ok(worker)
				}
				Err(err) => {
					tracing::error!(session = %session, worker = %id, error = %err, "worker construction failed");
					if matches!(err, Error::Config(_) | Error::Spawn { .. }) {
						self.state.write().slots.insert(
							session.clone(),
							Slot::Unusable {
								config: Arc::clone(&config),
								reason: err.to_string(),
							},
						);
					}
					Err(err)
				}
			};
			return guard.complete(result);
		}
	}

	/// Drops the session's mapping and crash history.
	///
	/// The next [`get_or_create_worker`](Self::get_or_create_worker) builds
	/// fresh. A live worker is retired in the background. Returns whether the
	/// session had a mapping.
	pub fn invalidate(&self, session: &SessionId) -> bool {
		let removed = {
			let mut state = self.state.write();
			state.crashes.remove(session);
			state.slots.remove(session)
		};
		match removed {
			Some(Slot::Live(worker)) => {
				tracing::info!(session = %session, worker = %worker.id(), "invalidating session");
				retire(worker);
				true
			}
			Some(Slot::Unusable { .. }) => true,
			None => false,
		}
	}

	/// The session's live worker, if any. Never builds one.
	pub fn get(&self, session: &SessionId) -> Option<Arc<Worker>> {
		match self.state.read().slots.get(session) {
			Some(Slot::Live(worker)) if worker.is_alive() => Some(Arc::clone(worker)),
			_ => None,
		}
	}

	/// Fails requests older than each worker's orphan TTL. Returns how many were swept.
	pub fn sweep_orphans(&self) -> usize {
		let workers: Vec<Arc<Worker>> = self
			.state
			.read()
			.slots
			.values()
			.filter_map(|slot| match slot {
				Slot::Live(worker) => Some(Arc::clone(worker)),
				Slot::Unusable { .. } => None,
			})
			.collect();

		let swept: usize = workers.iter().map(|worker| worker.sweep()).sum();
		if swept > 0 {
			tracing::warn!(swept, "swept orphaned requests");
		}
		swept
	}

	/// Shuts down every worker and forgets every session.
	pub async fn shutdown_all(&self) -> Vec<WorkerId> {
		let slots = {
			let mut state = self.state.write();
			state.crashes.clear();
			std::mem::take(&mut state.slots)
		};

		let mut ids = Vec::new();
		for slot in slots.into_values() {
			if let Slot::Live(worker) = slot {
				worker.shutdown().await;
				ids.push(worker.id().clone());
			}
		}
		tracing::info!(workers = ids.len(), "all workers shut down");
		ids
	}

	/// Number of sessions with a live or unusable mapping.
	pub fn session_count(&self) -> usize {
		self.state.read().slots.len()
	}

	fn check_existing(&self, session: &SessionId, config: &Arc<ClientConfig>) -> Result<Existing> {
		{
			let state = self.state.read();
			match state.slots.get(session) {
				None => return Ok(Existing::Build),
				Some(Slot::Live(worker)) if worker.is_alive() && **worker.config() == **config => {
					return Ok(Existing::Reuse(Arc::clone(worker)));
				}
				Some(Slot::Unusable { config: failed, reason }) if **failed == **config => {
					return Err(Error::Unusable {
						session: session.clone(),
						reason: reason.clone(),
					});
				}
				Some(_) => {}
			}
		}

		let removed = {
			let mut state = self.state.write();
			let removed = state.slots.remove(session);
			if let Some(Slot::Live(worker)) = &removed
				&& worker.status() == TransportStatus::Crashed
			{
				state.crashes.entry(session.clone()).or_default().push_back(Instant::now());
			}
			removed
		};
		if let Some(Slot::Live(worker)) = removed {
			if worker.is_alive() {
				tracing::info!(session = %session, worker = %worker.id(), "configuration changed; replacing worker");
			} else {
				tracing::warn!(session = %session, worker = %worker.id(), status = ?worker.status(), "worker died; rebuilding");
			}
			retire(worker);
		}
		Ok(Existing::Build)
	}

	fn check_backoff(&self, session: &SessionId, config: &ClientConfig) -> Result<()> {
		let backoff = config.crash_backoff;
		let window = backoff.window();
		let now = Instant::now();

		let mut state = self.state.write();
		let Some(crashes) = state.crashes.get_mut(session) else {
			return Ok(());
		};
		while crashes.front().is_some_and(|t| now.saturating_duration_since(*t) >= window) {
			crashes.pop_front();
		}
		if crashes.len() as u64 <= u64::from(backoff.max_restarts) {
			return Ok(());
		}

		let oldest = crashes.front().copied().unwrap_or(now);
		let retry_in = window.saturating_sub(now.saturating_duration_since(oldest));
		tracing::warn!(session = %session, crashes = crashes.len(), ?retry_in, "worker crash loop; backing off");
		Err(Error::Backoff {
			session: session.clone(),
			retry_in,
		})
	}
}

async fn wait_for_leader(inflight: &InFlightStart) -> Arc<Result<Arc<Worker>>> {
	let mut rx = inflight.rx.clone();
	loop {
		let result = {
			let borrow = rx.borrow();
			borrow.as_ref().cloned()
		};
		if let Some(res) = result {
			return res;
		}
		if rx.changed().await.is_err() {
			return Arc::new(Err(Error::Protocol("worker construction abandoned".into())));
		}
	}
}

/// Lets a replaced worker drain in the background, or stops a dead one.
fn retire(worker: Arc<Worker>) {
	spawn(TaskClass::Background, async move {
		if worker.is_alive() {
			worker.retire().await;
		} else {
			worker.shutdown().await;
		}
	});
}

/// Guard that un-wedges the inflight map if the leader fails or is cancelled.
struct StartGuard {
	session: SessionId,
	inflight_map: InFlightMap,
	inflight: Arc<InFlightStart>,
	completed: bool,
}

impl StartGuard {
	fn new(session: SessionId, inflight_map: InFlightMap, inflight: Arc<InFlightStart>) -> Self {
		Self {
			session,
			inflight_map,
			inflight,
			completed: false,
		}
	}

	fn complete(mut self, res: Result<Arc<Worker>>) -> Result<Arc<Worker>> {
		self.completed = true;

		// 1) publish result to waiters (sync, no await points)
		let _ = self.inflight.tx.send(Some(Arc::new(res.clone())));

		// 2) remove the inflight entry, deferring if the map is busy
		remove_inflight(&self.inflight_map, self.session.clone());

		res
	}
}

impl Drop for StartGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}

		// Leader exited early: unblock waiters and allow a retry.
		let _ = self
			.inflight
			.tx
			.send(Some(Arc::new(Err(Error::Protocol("worker construction cancelled".into())))));
		remove_inflight(&self.inflight_map, self.session.clone());
	}
}

fn remove_inflight(inflight_map: &InFlightMap, session: SessionId) {
	if let Ok(mut map) = inflight_map.try_lock() {
		map.remove(&session);
		return;
	}
	let inflight_map = Arc::clone(inflight_map);
	spawn(TaskClass::Background, async move {
		inflight_map.lock().await.remove(&session);
	});
}

//! Session-scoped handle to an analysis backend.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use async_trait::async_trait;
use pyhint_analysis::Analyzer;
use pyhint_protocol::{CorrelationId, RequestKind};
use pyhint_worker::{Dispatcher, TaskClass, join_error_panic_message, spawn, spawn_blocking};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ConfigError, TransportConfig};
use crate::correlation::{CorrelationTable, Outcome};
use crate::environment::{PathContext, ResolvedEnvironment};
use crate::multiplexer::{Multiplexer, RequestData};
use crate::session::{ViewId, WorkerId};
use crate::transport::{CommandSpec, InProcessTransport, SubprocessTransport, Transport, TransportStatus};
use crate::{Error, Result};

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(50);

/// Awaitable answer to one [`Worker::request`].
#[derive(Debug)]
pub struct CorrelationHandle {
	id: CorrelationId,
	kind: RequestKind,
	rx: oneshot::Receiver<Outcome>,
}

impl CorrelationHandle {
	pub fn id(&self) -> &CorrelationId {
		&self.id
	}

	pub fn kind(&self) -> RequestKind {
		self.kind
	}

	/// Waits for the outcome. Never hangs past the worker's own teardown.
	pub async fn wait(self) -> Outcome {
		self.rx.await.unwrap_or(Err(Error::ServiceStopped))
	}
}

/// One analysis backend configuration plus the transport that reaches it.
///
/// Configuration is resolved once at construction and reused for every
/// request. A worker never fails as a whole because one analysis failed;
/// it only dies with its transport.
pub struct Worker {
	id: WorkerId,
	config: Arc<ClientConfig>,
	environment: Option<ResolvedEnvironment>,
	mux: Multiplexer,
	dispatcher: Dispatcher,
	sweeper: CancellationToken,
}

impl std::fmt::Debug for Worker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Worker")
			.field("id", &self.id)
			.field("mux", &self.mux)
			.finish_non_exhaustive()
	}
}

impl Worker {
	pub fn new(
		id: WorkerId,
		config: Arc<ClientConfig>,
		environment: Option<ResolvedEnvironment>,
		table: Arc<CorrelationTable>,
		transport: Arc<dyn Transport>,
		dispatcher: Dispatcher,
	) -> Self {
		let sweeper = spawn_sweeper(id.clone(), Arc::clone(&table), config.orphan_ttl());
		let mux = Multiplexer::new(id.session.clone(), table, transport);
		Self {
			id,
			config,
			environment,
			mux,
			dispatcher,
			sweeper,
		}
	}

	pub fn id(&self) -> &WorkerId {
		&self.id
	}

	pub fn config(&self) -> &Arc<ClientConfig> {
		&self.config
	}

	/// Resolved interpreter and search path; `None` for an explicit daemon command.
	pub fn environment(&self) -> Option<&ResolvedEnvironment> {
		self.environment.as_ref()
	}

	/// Sends a request and returns a handle to await its outcome.
	pub fn request(&self, kind: RequestKind, data: RequestData) -> CorrelationHandle {
		let (tx, rx) = oneshot::channel();
		let id = self.mux.send(
			kind,
			data,
			None,
			Box::new(move |outcome| {
				let _ = tx.send(outcome);
			}),
		);
		CorrelationHandle { id, kind, rx }
	}

	/// Sends a request whose outcome is delivered to `callback` on the UI thread.
	///
	/// Callbacks of one worker run in the order their answers arrived.
	pub fn request_with_callback(
		&self,
		kind: RequestKind,
		data: RequestData,
		view: Option<ViewId>,
		callback: impl FnOnce(Outcome) + Send + 'static,
	) -> CorrelationId {
		let dispatcher = self.dispatcher.clone();
		self.mux.send(
			kind,
			data,
			view,
			Box::new(move |outcome| {
				dispatcher.run_on_ui_thread(move || callback(outcome));
			}),
		)
	}

	/// Awaits the outcome for at most the configured request timeout.
	pub async fn request_timeout(&self, kind: RequestKind, data: RequestData) -> Outcome {
		let handle = self.request(kind, data);
		let id = handle.id.clone();
		match tokio::time::timeout(self.config.request_timeout(), handle.wait()).await {
			Ok(outcome) => outcome,
			Err(_) => {
				tracing::debug!(worker = %self.id, correlation = %id, kind = %kind, "request timed out; answer will be dropped");
				Err(Error::Timeout(kind))
			}
		}
	}

	/// Blocks the calling thread for at most `timeout`.
	///
	/// A late answer is absorbed by the correlation table and dropped. Must not
	/// be called from inside an async task.
	pub fn request_blocking(&self, kind: RequestKind, data: RequestData, timeout: Duration) -> Outcome {
		let (tx, rx) = mpsc::sync_channel(1);
		let id = self.mux.send(
			kind,
			data,
			None,
			Box::new(move |outcome| {
				let _ = tx.send(outcome);
			}),
		);
		match rx.recv_timeout(timeout) {
			Ok(outcome) => outcome,
			Err(RecvTimeoutError::Timeout) => {
				tracing::debug!(worker = %self.id, correlation = %id, kind = %kind, ?timeout, "blocking request timed out");
				Err(Error::Timeout(kind))
			}
			Err(RecvTimeoutError::Disconnected) => Err(Error::ServiceStopped),
		}
	}

	pub fn is_alive(&self) -> bool {
		self.mux.transport().is_alive()
	}

	pub fn status(&self) -> TransportStatus {
		self.mux.transport().status()
	}

	/// Requests still waiting for an answer.
	pub fn pending(&self) -> usize {
		self.mux.table().len()
	}

	/// Fails requests older than the configured orphan TTL.
	pub fn sweep(&self) -> usize {
		self.mux.table().sweep(self.config.orphan_ttl())
	}

	/// Stops the transport; pending requests fail with [`Error::ServiceStopped`].
	pub async fn shutdown(&self) {
		tracing::info!(worker = %self.id, pending = self.pending(), "shutting down worker");
		self.sweeper.cancel();
		self.mux.transport().shutdown().await;
	}

	/// Lets in-flight requests finish, bounded by the orphan TTL, then shuts down.
	pub async fn retire(&self) {
		if tokio::time::timeout(self.config.orphan_ttl(), self.mux.table().wait_idle())
			.await
			.is_err()
		{
			tracing::warn!(worker = %self.id, pending = self.pending(), "retired worker still busy; stopping anyway");
		}
		self.shutdown().await;
	}
}

impl Drop for Worker {
	fn drop(&mut self) {
		self.sweeper.cancel();
	}
}

/// Fails requests older than `ttl` every half TTL until cancelled.
///
/// A daemon that is alive but silent never answers, so without this its
/// entries and their callbacks would wait forever.
fn spawn_sweeper(worker: WorkerId, table: Arc<CorrelationTable>, ttl: Duration) -> CancellationToken {
	let token = CancellationToken::new();
	let cancelled = token.clone();
	let period = (ttl / 2).max(MIN_SWEEP_PERIOD);
	spawn(TaskClass::Background, async move {
		let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
		ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = cancelled.cancelled() => break,
				_ = ticks.tick() => {
					let swept = table.sweep(ttl);
					if swept > 0 {
						tracing::warn!(worker = %worker, swept, "swept orphaned requests");
					}
				}
			}
		}
		tracing::trace!(worker = %worker, "orphan sweeper stopped");
	});
	token
}

/// Builds workers for the session registry.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
	async fn launch(&self, id: WorkerId, config: Arc<ClientConfig>) -> Result<Worker>;
}

/// Builds the in-process analyzer for a worker.
pub trait AnalyzerFactory: Send + Sync {
	fn build(&self, config: &ClientConfig, environment: &ResolvedEnvironment) -> Result<Arc<dyn Analyzer>, ConfigError>;
}

impl<F> AnalyzerFactory for F
where
	F: Fn(&ClientConfig, &ResolvedEnvironment) -> Result<Arc<dyn Analyzer>, ConfigError> + Send + Sync,
{
	fn build(&self, config: &ClientConfig, environment: &ResolvedEnvironment) -> Result<Arc<dyn Analyzer>, ConfigError> {
		self(config, environment)
	}
}

/// Resolves the environment off the calling thread, then starts the
/// configured transport.
#[derive(Clone)]
pub struct DefaultLauncher {
	dispatcher: Dispatcher,
	analyzers: Option<Arc<dyn AnalyzerFactory>>,
}

impl std::fmt::Debug for DefaultLauncher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DefaultLauncher")
			.field("dispatcher", &self.dispatcher)
			.field("in_process", &self.analyzers.is_some())
			.finish()
	}
}

impl DefaultLauncher {
	/// A launcher that can only start daemon workers.
	pub fn new(dispatcher: Dispatcher) -> Self {
		Self { dispatcher, analyzers: None }
	}

	/// Enables the in-process transport with analyzers built by `factory`.
	pub fn with_analyzers(mut self, factory: impl AnalyzerFactory + 'static) -> Self {
		self.analyzers = Some(Arc::new(factory));
		self
	}

	async fn resolve_environment(config: &Arc<ClientConfig>) -> Result<ResolvedEnvironment> {
		let config = Arc::clone(config);
		spawn_blocking(TaskClass::Background, move || {
			let ctx = PathContext::from_config(&config);
			ResolvedEnvironment::discover(&config, &ctx)
		})
		.await
		.map_err(|err| {
			let reason = join_error_panic_message(err).unwrap_or_else(|| "environment discovery cancelled".into());
			Error::from(ConfigError::Backend(reason))
		})?
		.map_err(Error::from)
	}
}

#[async_trait]
impl WorkerLauncher for DefaultLauncher {
	async fn launch(&self, id: WorkerId, config: Arc<ClientConfig>) -> Result<Worker> {
		let table = Arc::new(CorrelationTable::new());
		let (environment, transport): (Option<ResolvedEnvironment>, Arc<dyn Transport>) = match &config.transport {
			TransportConfig::InProcess => {
				let factory = self.analyzers.as_ref().ok_or(ConfigError::NoAnalyzer)?;
				let environment = Self::resolve_environment(&config).await?;
				let analyzer = factory.build(&config, &environment)?;
				let transport = InProcessTransport::new(id.clone(), config.worker_threads, analyzer, Arc::clone(&table))?;
				(Some(environment), Arc::new(transport))
			}
			TransportConfig::Subprocess(subprocess) if subprocess.command.is_some() => {
				let spec = CommandSpec::for_daemon(&config, &ResolvedEnvironment::fixed("", Vec::new()), subprocess)?;
				(None, Arc::new(SubprocessTransport::spawn(id.clone(), &spec, Arc::clone(&table))?))
			}
			TransportConfig::Subprocess(subprocess) => {
				let environment = Self::resolve_environment(&config).await?;
				let spec = CommandSpec::for_daemon(&config, &environment, subprocess)?;
				let transport = SubprocessTransport::spawn(id.clone(), &spec, Arc::clone(&table))?;
				(Some(environment), Arc::new(transport))
			}
		};

		tracing::info!(worker = %id, transport = ?transport.status(), "worker started");
		Ok(Worker::new(id, config, environment, table, transport, self.dispatcher.clone()))
	}
}

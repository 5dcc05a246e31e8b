//! Daemon child process speaking line-delimited JSON.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pyhint_protocol::{Inbound, LogLevel, LogRecord, WireRequest, read_line, write_line};
use pyhint_worker::{TaskClass, runtime_handle, spawn};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Transport, TransportStatus};
use crate::config::{ClientConfig, ConfigError, SubprocessConfig};
use crate::correlation::CorrelationTable;
use crate::environment::ResolvedEnvironment;
use crate::session::WorkerId;
use crate::{Error, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Target under which daemon log records are re-emitted.
pub const DAEMON_LOG_TARGET: &str = "pyhint::daemon";

/// Program, arguments and working directory of a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
	pub program: PathBuf,
	pub args: Vec<String>,
	pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
	pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
			current_dir: None,
		}
	}

	/// Builds the daemon command line for a worker.
	///
	/// An explicit `command` wins. Otherwise the interpreter runs `script` as
	/// `interp -B script -p <project> [-e <extra>]... -f <mode>`, followed by
	/// any configured `args`.
	pub fn for_daemon(config: &ClientConfig, environment: &ResolvedEnvironment, subprocess: &SubprocessConfig) -> Result<Self, ConfigError> {
		let mut spec = if let Some(command) = &subprocess.command {
			Self::new(command, subprocess.args.iter().cloned())
		} else if let Some(script) = &subprocess.script {
			let mut args = vec![
				"-B".to_owned(),
				script.to_string_lossy().into_owned(),
				"-p".to_owned(),
				config.project_name.clone().unwrap_or_default(),
			];
			for extra in &environment.extra_paths {
				args.push("-e".to_owned());
				args.push(extra.to_string_lossy().into_owned());
			}
			args.push("-f".to_owned());
			args.push(config.complete_funcargs.as_flag().to_owned());
			args.extend(subprocess.args.iter().cloned());
			Self::new(&environment.environment.interpreter, args)
		} else {
			return Err(ConfigError::NoDaemonCommand);
		};
		spec.current_dir = config.project_root.clone().filter(|root| root.is_dir());
		Ok(spec)
	}

	/// Shell-like rendering for logs and error messages.
	pub fn display(&self) -> String {
		std::iter::once(self.program.to_string_lossy().into_owned())
			.chain(self.args.iter().cloned())
			.collect::<Vec<_>>()
			.join(" ")
	}
}

#[derive(Debug)]
struct Lifecycle {
	status: Mutex<TransportStatus>,
	stopping: AtomicBool,
}

impl Lifecycle {
	/// Records that the daemon's output ended and returns the resulting status.
	fn finish(&self) -> TransportStatus {
		let mut status = self.status.lock();
		if status.is_running() {
			*status = if self.stopping.load(Ordering::SeqCst) {
				TransportStatus::Stopped
			} else {
				TransportStatus::Crashed
			};
		}
		*status
	}
}

/// A daemon child process.
///
/// Requests go to the child's stdin through a writer task; a reader task
/// routes stdout responses into the correlation table and a third task turns
/// stderr log records into `tracing` events. When stdout closes every
/// pending request is failed with [`Error::ServiceStopped`].
pub struct SubprocessTransport {
	worker: WorkerId,
	command: String,
	table: Arc<CorrelationTable>,
	lifecycle: Arc<Lifecycle>,
	outbound: Mutex<Option<mpsc::UnboundedSender<WireRequest>>>,
	child: Mutex<Option<Child>>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SubprocessTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SubprocessTransport")
			.field("worker", &self.worker)
			.field("command", &self.command)
			.field("status", &self.status())
			.finish_non_exhaustive()
	}
}

impl SubprocessTransport {
	/// Starts the daemon and its I/O tasks.
	pub fn spawn(worker: WorkerId, spec: &CommandSpec, table: Arc<CorrelationTable>) -> Result<Self> {
		let command = spec.display();
		tracing::info!(worker = %worker, command = %command, "starting daemon");

		let _runtime = runtime_handle().enter();
		let mut cmd = Command::new(&spec.program);
		cmd.args(&spec.args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(dir) = &spec.current_dir {
			cmd.current_dir(dir);
		}

		let spawn_error = |reason: String| Error::Spawn {
			command: command.clone(),
			reason,
		};
		let mut child = cmd.spawn().map_err(|e| spawn_error(e.to_string()))?;
		let stdin = child.stdin.take().ok_or_else(|| spawn_error("failed to capture stdin".into()))?;
		let stdout = child.stdout.take().ok_or_else(|| spawn_error("failed to capture stdout".into()))?;
		let stderr = child.stderr.take().ok_or_else(|| spawn_error("failed to capture stderr".into()))?;

		let lifecycle = Arc::new(Lifecycle {
			status: Mutex::new(TransportStatus::Running),
			stopping: AtomicBool::new(false),
		});
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

		let tasks = vec![
			spawn(
				TaskClass::Io,
				write_requests(worker.clone(), stdin, outbound_rx, Arc::clone(&table), Arc::clone(&lifecycle)),
			),
			spawn(TaskClass::Io, read_responses(worker.clone(), stdout, Arc::clone(&table), Arc::clone(&lifecycle))),
			spawn(TaskClass::Io, forward_logs(worker.clone(), stderr)),
		];

		tracing::debug!(worker = %worker, pid = ?child.id(), "daemon running");
		Ok(Self {
			worker,
			command,
			table,
			lifecycle,
			outbound: Mutex::new(Some(outbound_tx)),
			child: Mutex::new(Some(child)),
			tasks: Mutex::new(tasks),
		})
	}

	/// OS process id while the child has not been reaped.
	pub fn pid(&self) -> Option<u32> {
		self.child.lock().as_ref().and_then(Child::id)
	}
}

#[async_trait]
impl Transport for SubprocessTransport {
	fn submit(&self, request: WireRequest) -> Result<()> {
		if !self.is_alive() {
			return Err(Error::ServiceStopped);
		}
		let outbound = self.outbound.lock();
		let tx = outbound.as_ref().ok_or(Error::ServiceStopped)?;
		tx.send(request).map_err(|_| Error::ServiceStopped)
	}

	fn status(&self) -> TransportStatus {
		*self.lifecycle.status.lock()
	}

	async fn shutdown(&self) {
		if self.lifecycle.stopping.swap(true, Ordering::SeqCst) {
			return;
		}

		// Closing the queue ends the writer, which closes stdin; a well-behaved
		// daemon exits on EOF.
		drop(self.outbound.lock().take());

		let child = self.child.lock().take();
		if let Some(mut child) = child {
			match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
				Ok(Ok(status)) => tracing::debug!(worker = %self.worker, %status, "daemon exited"),
				Ok(Err(err)) => tracing::warn!(worker = %self.worker, error = %err, "failed to wait for daemon"),
				Err(_) => {
					tracing::warn!(worker = %self.worker, "daemon ignored stdin EOF; killing");
					if let Err(err) = child.kill().await {
						tracing::warn!(worker = %self.worker, error = %err, "failed to kill daemon");
					}
				}
			}
		}

		let tasks = std::mem::take(&mut *self.tasks.lock());
		for task in tasks {
			let abort = task.abort_handle();
			if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
				abort.abort();
			}
		}

		self.lifecycle.finish();
		let failed = self.table.fail_all(Error::ServiceStopped);
		tracing::info!(worker = %self.worker, failed, "daemon transport stopped");
	}
}

async fn write_requests(
	worker: WorkerId,
	mut stdin: ChildStdin,
	mut outbound_rx: mpsc::UnboundedReceiver<WireRequest>,
	table: Arc<CorrelationTable>,
	lifecycle: Arc<Lifecycle>,
) {
	while let Some(request) = outbound_rx.recv().await {
		tracing::trace!(worker = %worker, correlation = %request.uuid, kind = %request.kind, "sending request");
		if let Err(err) = write_line(&mut stdin, &request).await {
			tracing::error!(worker = %worker, error = %err, "daemon stdin write failed");
			table.resolve(&request.uuid, Err(Error::ServiceStopped));
			lifecycle.finish();
			break;
		}
	}

	outbound_rx.close();
	while let Ok(request) = outbound_rx.try_recv() {
		table.resolve(&request.uuid, Err(Error::ServiceStopped));
	}
}

async fn read_responses(worker: WorkerId, stdout: ChildStdout, table: Arc<CorrelationTable>, lifecycle: Arc<Lifecycle>) {
	let mut reader = BufReader::new(stdout);
	let mut buf = String::new();
	loop {
		match read_line(&mut reader, &mut buf).await {
			Ok(Some(line)) => match Inbound::parse(line) {
				Ok(Inbound::Response(response)) => {
					table.complete(response);
				}
				Ok(Inbound::Log(record)) => emit_daemon_log(&worker, &record),
				Ok(Inbound::Rejected { uuid, reason }) => {
					tracing::warn!(worker = %worker, correlation = %uuid, reason = %reason, "undecodable daemon answer");
					table.resolve(&uuid, Err(Error::Protocol(reason)));
				}
				Err(err) => tracing::debug!(worker = %worker, error = %err, line, "ignoring malformed daemon output"),
			},
			Ok(None) => break,
			Err(err) => {
				tracing::warn!(worker = %worker, error = %err, "daemon stdout read failed");
				break;
			}
		}
	}

	let status = lifecycle.finish();
	if status == TransportStatus::Crashed {
		tracing::warn!(worker = %worker, "daemon exited unexpectedly");
	}
	let failed = table.fail_all(Error::ServiceStopped);
	if failed > 0 {
		tracing::debug!(worker = %worker, failed, "failed requests left pending by daemon");
	}
}

async fn forward_logs(worker: WorkerId, stderr: ChildStderr) {
	let mut reader = BufReader::new(stderr);
	let mut buf = String::new();
	while let Ok(Some(line)) = read_line(&mut reader, &mut buf).await {
		match serde_json::from_str::<LogRecord>(line) {
			Ok(record) => emit_daemon_log(&worker, &record),
			Err(_) => tracing::debug!(target: DAEMON_LOG_TARGET, worker = %worker, "{line}"),
		}
	}
}

/// Re-emits a daemon log record at its own level.
fn emit_daemon_log(worker: &WorkerId, record: &LogRecord) {
	let content = record.content.as_str();
	match record.logging {
		LogLevel::Trace => tracing::trace!(target: DAEMON_LOG_TARGET, worker = %worker, "{content}"),
		LogLevel::Debug => tracing::debug!(target: DAEMON_LOG_TARGET, worker = %worker, "{content}"),
		LogLevel::Info => tracing::info!(target: DAEMON_LOG_TARGET, worker = %worker, "{content}"),
		LogLevel::Warning => tracing::warn!(target: DAEMON_LOG_TARGET, worker = %worker, "{content}"),
		LogLevel::Error | LogLevel::Critical => tracing::error!(target: DAEMON_LOG_TARGET, worker = %worker, "{content}"),
	}
}

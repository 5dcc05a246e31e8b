//! Fixed-width pool for blocking analysis calls.
//!
//! A width of 1 serializes every call into one backend, which is what a
//! non-reentrant analysis engine needs: jobs run one at a time in submission
//! order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{TaskClass, panic_message, spawn_named_thread};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The executor no longer accepts jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("executor closed")]
pub struct ExecutorClosed;

/// Bounded pool of named OS threads draining one shared FIFO queue.
pub struct SerialExecutor {
	name: String,
	queue: Mutex<Option<mpsc::Sender<Job>>>,
	threads: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SerialExecutor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SerialExecutor")
			.field("name", &self.name)
			.field("width", &self.threads.lock().len())
			.finish_non_exhaustive()
	}
}

impl SerialExecutor {
	/// Starts `width` threads named `{name}-{index}`. A width of 0 is treated as 1.
	pub fn new(name: impl Into<String>, width: usize) -> std::io::Result<Self> {
		let name = name.into();
		let (tx, rx) = mpsc::channel::<Job>();
		let rx = Arc::new(Mutex::new(rx));

		let mut threads = Vec::new();
		for index in 0..width.max(1) {
			let rx = Arc::clone(&rx);
			let thread_name = format!("{name}-{index}");
			threads.push(spawn_named_thread(TaskClass::Analysis, thread_name, move || run_jobs(&rx))?);
		}

		Ok(Self {
			name,
			queue: Mutex::new(Some(tx)),
			threads: Mutex::new(threads),
		})
	}

	/// Queues `job` behind everything already submitted.
	pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<(), ExecutorClosed> {
		let queue = self.queue.lock();
		let tx = queue.as_ref().ok_or(ExecutorClosed)?;
		tx.send(Box::new(job)).map_err(|_| ExecutorClosed)
	}

	/// Queues `f` and returns a receiver for its result.
	///
	/// The receiver reports an error if `f` panics or the executor shuts down first.
	pub fn run<F, R>(&self, f: F) -> Result<oneshot::Receiver<R>, ExecutorClosed>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		let (tx, rx) = oneshot::channel();
		self.execute(move || {
			let _ = tx.send(f());
		})?;
		Ok(rx)
	}

	/// Stops accepting jobs without waiting. Queued jobs still run.
	pub fn close(&self) {
		drop(self.queue.lock().take());
	}

	/// Stops accepting jobs, lets queued jobs finish, and joins every thread.
	///
	/// Must not be called from one of this executor's own jobs.
	pub fn shutdown(&self) {
		drop(self.queue.lock().take());
		let threads = std::mem::take(&mut *self.threads.lock());
		for thread in threads {
			if thread.join().is_err() {
				tracing::warn!(executor = %self.name, "executor thread exited abnormally");
			}
		}
	}
}

impl Drop for SerialExecutor {
	fn drop(&mut self) {
		// Idle threads exit on their next recv.
		self.close();
	}
}

fn run_jobs(rx: &Mutex<mpsc::Receiver<Job>>) {
	loop {
		let job = {
			let rx = rx.lock();
			rx.recv()
		};
		let Ok(job) = job else {
			break;
		};
		if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
			tracing::error!(panic = %panic_message(payload.as_ref()), "analysis job panicked");
		}
	}
}

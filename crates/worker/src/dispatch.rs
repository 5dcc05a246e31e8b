//! Marshalling between the editor's UI loop and background work.
//!
//! [`Dispatcher`] is cheap to clone and safe to use from any thread. The UI
//! loop owns the matching [`UiPump`] and calls [`UiPump::pump`] whenever the
//! host wakes it. Callbacks run on the pump's thread in the order they were
//! queued, so a single producer (one worker's reader) gets FIFO delivery.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::{TaskClass, spawn_blocking};

/// A callback queued for the UI thread.
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

type Waker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Sending half: schedules work off the UI thread and callbacks back onto it.
#[derive(Clone)]
pub struct Dispatcher {
	ui_tx: mpsc::Sender<UiTask>,
	waker: Option<Waker>,
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher").field("has_waker", &self.waker.is_some()).finish()
	}
}

/// Receiving half, owned by the UI loop.
pub struct UiPump {
	ui_rx: mpsc::Receiver<UiTask>,
}

impl Dispatcher {
	/// Creates a connected dispatcher/pump pair.
	pub fn channel() -> (Dispatcher, UiPump) {
		let (ui_tx, ui_rx) = mpsc::channel();
		(Dispatcher { ui_tx, waker: None }, UiPump { ui_rx })
	}

	/// Creates a pair whose dispatcher calls `waker` after every queued callback.
	///
	/// Hosts use the waker to schedule a pump on their own loop, the way an
	/// editor's `set_timeout(f, 0)` would. The waker must not block.
	pub fn with_waker(waker: impl Fn() + Send + Sync + 'static) -> (Dispatcher, UiPump) {
		let (mut dispatcher, pump) = Self::channel();
		dispatcher.waker = Some(Arc::new(waker));
		(dispatcher, pump)
	}

	/// Queues `f` to run on the UI thread. Never blocks.
	///
	/// Returns false if the pump is gone; the callback is dropped in that case.
	pub fn run_on_ui_thread(&self, f: impl FnOnce() + Send + 'static) -> bool {
		if self.ui_tx.send(Box::new(f)).is_err() {
			tracing::debug!("ui pump dropped; discarding callback");
			return false;
		}
		if let Some(waker) = &self.waker {
			waker();
		}
		true
	}

	/// Runs potentially blocking `f` outside the UI thread.
	pub fn run_off_thread<F, R>(&self, f: F) -> JoinHandle<R>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		spawn_blocking(TaskClass::Background, f)
	}
}

impl UiPump {
	/// Runs every callback queued so far and returns how many ran.
	pub fn pump(&self) -> usize {
		let mut ran = 0;
		loop {
			match self.ui_rx.try_recv() {
				Ok(task) => {
					task();
					ran += 1;
				}
				Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
			}
		}
	}

	/// Waits up to `timeout` for the first callback, then drains the queue.
	///
	/// Meant for tests and headless hosts; an interactive loop should use [`Self::pump`].
	pub fn pump_timeout(&self, timeout: Duration) -> usize {
		match self.ui_rx.recv_timeout(timeout) {
			Ok(task) => {
				task();
				1 + self.pump()
			}
			Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
		}
	}
}

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pyhint_analysis::Analyzer;
use pyhint_protocol::WireRequest;
use pyhint_worker::{SerialExecutor, panic_message};

use super::{Transport, TransportStatus};
use crate::correlation::CorrelationTable;
use crate::session::WorkerId;
use crate::{Error, Result};

/// Runs the analyzer on a [`SerialExecutor`] inside the editor process.
///
/// With the default width of 1 the analyzer sees one request at a time, in
/// submission order.
pub struct InProcessTransport {
	worker: WorkerId,
	analyzer: Arc<dyn Analyzer>,
	table: Arc<CorrelationTable>,
	executor: SerialExecutor,
	status: Mutex<TransportStatus>,
}

impl std::fmt::Debug for InProcessTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InProcessTransport")
			.field("worker", &self.worker)
			.field("executor", &self.executor)
			.field("status", &*self.status.lock())
			.finish_non_exhaustive()
	}
}

impl InProcessTransport {
	pub fn new(worker: WorkerId, width: usize, analyzer: Arc<dyn Analyzer>, table: Arc<CorrelationTable>) -> Result<Self> {
		let executor = SerialExecutor::new(format!("pyhint-analysis-{}", worker.session), width)?;
		tracing::debug!(worker = %worker, width, "in-process transport started");
		Ok(Self {
			worker,
			analyzer,
			table,
			executor,
			status: Mutex::new(TransportStatus::Running),
		})
	}
}

#[async_trait]
impl Transport for InProcessTransport {
	fn submit(&self, request: WireRequest) -> Result<()> {
		if !self.status.lock().is_running() {
			return Err(Error::ServiceStopped);
		}

		let analyzer = Arc::clone(&self.analyzer);
		let table = Arc::clone(&self.table);
		let worker = self.worker.clone();
		self.executor
			.execute(move || {
				let payload = match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(&request))) {
					Ok(payload) => payload,
					Err(panic) => {
						tracing::error!(
							worker = %worker,
							correlation = %request.uuid,
							kind = %request.kind,
							panic = %panic_message(panic.as_ref()),
							"analysis panicked; answering with an empty result"
						);
						None
					}
				};
				table.resolve(&request.uuid, Ok(payload));
			})
			.map_err(|_| Error::ServiceStopped)
	}

	fn status(&self) -> TransportStatus {
		*self.status.lock()
	}

	async fn shutdown(&self) {
		{
			let mut status = self.status.lock();
			if !status.is_running() {
				return;
			}
			*status = TransportStatus::Stopped;
		}

		// Jobs already queued keep running; whatever they answer after this
		// finds its entry gone.
		self.executor.close();
		let failed = self.table.fail_all(Error::ServiceStopped);
		tracing::debug!(worker = %self.worker, failed, "in-process transport stopped");
	}
}

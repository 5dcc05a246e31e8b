use std::sync::Arc;

use pyhint_protocol::{CorrelationId, RequestKind, WireRequest};

use crate::correlation::{Callback, CorrelationTable, Pending};
use crate::session::{SessionId, ViewId};
use crate::transport::Transport;

/// What a caller supplies for one request: a document snapshot and a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestData {
	pub source: String,
	/// 1-based line.
	pub line: u32,
	/// 0-based column in characters.
	pub offset: u32,
	/// Empty for unsaved buffers.
	pub filename: String,
}

impl RequestData {
	pub fn into_wire(self, uuid: CorrelationId, kind: RequestKind) -> WireRequest {
		WireRequest {
			uuid,
			kind,
			source: self.source,
			line: self.line,
			offset: self.offset,
			filename: self.filename,
		}
	}
}

/// Assigns correlation tokens and hands requests to one worker's transport.
#[derive(Clone)]
pub struct Multiplexer {
	session: SessionId,
	table: Arc<CorrelationTable>,
	transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Multiplexer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Multiplexer")
			.field("session", &self.session)
			.field("pending", &self.table.len())
			.field("status", &self.transport.status())
			.finish()
	}
}

impl Multiplexer {
	pub fn new(session: SessionId, table: Arc<CorrelationTable>, transport: Arc<dyn Transport>) -> Self {
		Self { session, table, transport }
	}

	/// Registers `callback` under a fresh token and submits the request.
	///
	/// The entry is recorded before the request leaves, so even an immediate
	/// answer finds it. If the transport refuses the request the callback is
	/// failed right away; either way it runs exactly once.
	pub fn send(&self, kind: RequestKind, data: RequestData, view: Option<ViewId>, callback: Callback) -> CorrelationId {
		let id = CorrelationId::new();
		self.table
			.register(id.clone(), Pending::new(kind, self.session.clone(), view, callback));

		tracing::trace!(session = %self.session, correlation = %id, kind = %kind, "dispatching request");
		if let Err(err) = self.transport.submit(data.into_wire(id.clone(), kind)) {
			tracing::debug!(session = %self.session, correlation = %id, error = %err, "transport refused request");
			self.table.resolve(&id, Err(err));
		}
		id
	}

	pub fn table(&self) -> &Arc<CorrelationTable> {
		&self.table
	}

	pub fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}
}

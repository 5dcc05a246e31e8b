use std::panic::{AssertUnwindSafe, catch_unwind};

use pyhint_analysis::Analyzer;
use pyhint_protocol::{Result, WireRequest, WireResponse, read_line, write_line};
use pyhint_worker::panic_message;
use serde_json::{Map, Value as JsonValue};
use tokio::io::{AsyncBufRead, AsyncWrite};

/// Answers request lines from `input` on `output` until `input` reaches EOF.
///
/// Every well-formed request gets exactly one response line, with a `null`
/// payload when analysis fails or panics. A malformed line that still names
/// its `uuid` is echoed back as `{uuid, type}` so the client stops waiting;
/// anything else is logged and skipped. Only I/O failures end the loop early. Analysis runs inline, so
/// requests are answered one at a time in arrival order.
///
/// Returns the number of requests answered.
pub async fn serve<A, R, W>(analyzer: &A, mut input: R, mut output: W) -> Result<u64>
where
	A: Analyzer + ?Sized,
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut buf = String::new();
	let mut answered = 0;

	tracing::info!("daemon ready");
	while let Some(line) = read_line(&mut input, &mut buf).await? {
		let request = match WireRequest::from_line(line) {
			Ok(request) => request,
			Err(err) => {
				tracing::warn!(error = %err, line = %line, "failed to process line");
				if let Some(answer) = rejection(line) {
					write_line(&mut output, &answer).await?;
					answered += 1;
				}
				continue;
			}
		};

		let payload = match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(&request))) {
			Ok(payload) => payload,
			Err(panic) => {
				tracing::error!(
					correlation = %request.uuid,
					kind = %request.kind,
					panic = %panic_message(panic.as_ref()),
					"analysis panicked"
				);
				None
			}
		};

		tracing::debug!(correlation = %request.uuid, kind = %request.kind, found = payload.is_some(), "answered");
		write_line(&mut output, &WireResponse::new(request.uuid, request.kind, payload)).await?;
		answered += 1;
	}
	tracing::info!(answered, "input closed, daemon exiting");

	Ok(answered)
}

/// Null answer for a request line that names its token but cannot be served.
fn rejection(line: &str) -> Option<JsonValue> {
	let value: JsonValue = serde_json::from_str(line).ok()?;
	let uuid = value.get("uuid")?.as_str()?.to_owned();
	let kind = value.get("type").cloned().unwrap_or(JsonValue::Null);

	let mut answer = Map::new();
	if let Some(name) = kind.as_str() {
		answer.insert(name.to_owned(), JsonValue::Null);
	}
	answer.insert("uuid".into(), JsonValue::String(uuid));
	answer.insert("type".into(), kind);
	Some(JsonValue::Object(answer))
}

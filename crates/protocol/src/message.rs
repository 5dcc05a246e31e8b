//! Request, response and log record shapes.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::{Error, RequestKind, Result};

/// Correlation token attached to a request and echoed by its response.
///
/// Fresh tokens are random 128-bit values rendered as 32 lowercase hex digits.
/// Any string received from the wire is accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
	/// Generates a fresh random token.
	pub fn new() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string())
	}

	/// Returns the token text.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for CorrelationId {
	fn default() -> Self {
		Self::new()
	}
}

impl From<&str> for CorrelationId {
	fn from(value: &str) -> Self {
		Self(value.to_owned())
	}
}

impl From<String> for CorrelationId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl fmt::Display for CorrelationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// One request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
	/// Correlation token.
	pub uuid: CorrelationId,
	/// Requested analysis.
	#[serde(rename = "type")]
	pub kind: RequestKind,
	/// Snapshot of the whole document.
	pub source: String,
	/// 1-based cursor line.
	pub line: u32,
	/// 0-based cursor column, in characters.
	pub offset: u32,
	/// Path of the document on disk, empty for unsaved buffers.
	#[serde(default)]
	pub filename: String,
}

impl WireRequest {
	/// Parses one request line.
	pub fn from_line(line: &str) -> Result<Self> {
		Ok(serde_json::from_str(line.trim())?)
	}

	/// Serializes to a single line without the trailing newline.
	pub fn to_line(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}
}

/// A completion entry: text shown in the popup and text inserted on commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Completion {
	/// Popup text, usually `name\ttype`.
	pub display: String,
	/// Inserted text, possibly a snippet.
	pub insert: String,
}

impl Completion {
	/// Creates a completion entry.
	pub fn new(display: impl Into<String>, insert: impl Into<String>) -> Self {
		Self {
			display: display.into(),
			insert: insert.into(),
		}
	}
}

impl From<(String, String)> for Completion {
	fn from((display, insert): (String, String)) -> Self {
		Self { display, insert }
	}
}

impl From<Completion> for (String, String) {
	fn from(value: Completion) -> Self {
		(value.display, value.insert)
	}
}

/// A source position: file, 1-based line, 1-based column.
///
/// `path` is empty when the position lives in the unsaved buffer itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(Option<String>, u32, u32)", into = "(String, u32, u32)")]
pub struct Location {
	/// File path, empty for the current buffer.
	pub path: String,
	/// 1-based line.
	pub line: u32,
	/// 1-based column.
	pub column: u32,
}

impl Location {
	/// Creates a location.
	pub fn new(path: impl Into<String>, line: u32, column: u32) -> Self {
		Self {
			path: path.into(),
			line,
			column,
		}
	}
}

impl From<(Option<String>, u32, u32)> for Location {
	fn from((path, line, column): (Option<String>, u32, u32)) -> Self {
		Self {
			path: path.unwrap_or_default(),
			line,
			column,
		}
	}
}

impl From<Location> for (String, u32, u32) {
	fn from(value: Location) -> Self {
		(value.path, value.line, value.column)
	}
}

/// Kind-specific success payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
	/// Answer to [`RequestKind::Autocomplete`].
	Completions(Vec<Completion>),
	/// Answer to [`RequestKind::Goto`] and [`RequestKind::Usages`].
	Locations(Vec<Location>),
	/// Answer to [`RequestKind::Funcargs`], [`RequestKind::Docstring`] and [`RequestKind::Signature`].
	Text(String),
}

impl Payload {
	/// Returns true if this payload shape is the one `kind` answers with.
	pub fn fits(&self, kind: RequestKind) -> bool {
		matches!(
			(self, kind),
			(Payload::Completions(_), RequestKind::Autocomplete)
				| (Payload::Locations(_), RequestKind::Goto | RequestKind::Usages)
				| (Payload::Text(_), RequestKind::Funcargs | RequestKind::Docstring | RequestKind::Signature)
		)
	}

	fn decode(kind: RequestKind, value: JsonValue) -> Result<Option<Self>> {
		if value.is_null() {
			return Ok(None);
		}
		let payload = match kind {
			RequestKind::Autocomplete => Payload::Completions(serde_json::from_value(value)?),
			RequestKind::Goto | RequestKind::Usages => Payload::Locations(serde_json::from_value(value)?),
			RequestKind::Funcargs | RequestKind::Docstring | RequestKind::Signature => Payload::Text(serde_json::from_value(value)?),
		};
		Ok(Some(payload))
	}
}

/// One response line.
///
/// Serialized as `{"uuid": ..., "type": <kind>, <kind>: <payload or null>}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
	/// Token of the request being answered.
	pub uuid: CorrelationId,
	/// Kind of the request being answered.
	pub kind: RequestKind,
	/// `None` when the analysis failed or found nothing.
	pub payload: Option<Payload>,
}

impl WireResponse {
	/// Creates a response.
	pub fn new(uuid: CorrelationId, kind: RequestKind, payload: Option<Payload>) -> Self {
		Self { uuid, kind, payload }
	}

	/// Serializes to a single line without the trailing newline.
	pub fn to_line(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}

	/// Parses one response line.
	pub fn from_line(line: &str) -> Result<Self> {
		Self::from_value(serde_json::from_str(line.trim())?)
	}

	fn from_value(value: JsonValue) -> Result<Self> {
		let JsonValue::Object(mut object) = value else {
			return Err(Error::Protocol("response is not a JSON object".into()));
		};
		let uuid = match object.remove("uuid") {
			Some(JsonValue::String(uuid)) => CorrelationId::from(uuid),
			Some(other) => return Err(Error::Protocol(format!("invalid uuid {other}"))),
			None => return Err(Error::Protocol("response without uuid".into())),
		};
		let kind: RequestKind = match object.remove("type") {
			Some(kind) => serde_json::from_value(kind)?,
			None => return Err(Error::Protocol("response without type".into())),
		};
		let payload = Payload::decode(kind, object.remove(kind.as_str()).unwrap_or(JsonValue::Null))?;
		Ok(Self { uuid, kind, payload })
	}
}

impl Serialize for WireResponse {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(3))?;
		map.serialize_entry("uuid", &self.uuid)?;
		map.serialize_entry("type", &self.kind)?;
		let key = self.kind.as_str();
		match &self.payload {
			Some(Payload::Completions(items)) => map.serialize_entry(key, items)?,
			Some(Payload::Locations(locations)) => map.serialize_entry(key, locations)?,
			Some(Payload::Text(text)) => map.serialize_entry(key, text)?,
			None => map.serialize_entry(key, &JsonValue::Null)?,
		}
		map.end()
	}
}

/// Severity of a daemon log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	/// Trace.
	Trace,
	/// Debug.
	Debug,
	/// Info.
	Info,
	/// Warning.
	#[serde(alias = "warn")]
	Warning,
	/// Error.
	Error,
	/// Critical, treated as error on the client.
	Critical,
}

/// A structured log line from a daemon's stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
	/// Severity.
	pub logging: LogLevel,
	/// Rendered message.
	pub content: String,
}

/// Classification of a line read back from a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
	/// A response for some correlation token.
	Response(WireResponse),
	/// A log record destined for the logging sink.
	Log(LogRecord),
	/// An answer that names its token but cannot be decoded.
	Rejected {
		/// Token of the request being answered.
		uuid: CorrelationId,
		/// Why the answer was unusable.
		reason: String,
	},
}

impl Inbound {
	/// Parses and classifies one line.
	///
	/// Fails only when the line carries no usable `uuid`; a broken answer
	/// that does name its token comes back as [`Inbound::Rejected`] so the
	/// waiting request can be failed instead of left pending.
	pub fn parse(line: &str) -> Result<Self> {
		let value: JsonValue = serde_json::from_str(line.trim())?;
		if value.get("logging").is_some() {
			return Ok(Inbound::Log(serde_json::from_value(value)?));
		}
		let uuid = value.get("uuid").and_then(JsonValue::as_str).map(CorrelationId::from);
		match (WireResponse::from_value(value), uuid) {
			(Ok(response), _) => Ok(Inbound::Response(response)),
			(Err(err), Some(uuid)) => Ok(Inbound::Rejected {
				uuid,
				reason: err.to_string(),
			}),
			(Err(err), None) => Err(err),
		}
	}
}

//! Stderr logging for daemons.
//!
//! The client reads a daemon's stderr as a stream of
//! `{"logging": <level>, "content": <text>}` objects, one per line, and
//! re-emits them through its own subscriber. [`JsonLogLayer`] produces exactly
//! that shape from `tracing` events.

use std::fmt::Write as _;
use std::io::Write as _;

use pyhint_protocol::{LogLevel, LogRecord};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Renders every event as one JSON log record line.
pub struct JsonLogLayer<W> {
	make_writer: W,
}

impl<W> JsonLogLayer<W>
where
	W: for<'a> MakeWriter<'a> + 'static,
{
	pub fn new(make_writer: W) -> Self {
		Self { make_writer }
	}
}

#[derive(Default)]
struct MessageVisitor {
	message: String,
	fields: Vec<(&'static str, String)>,
}

impl Visit for MessageVisitor {
	fn record_str(&mut self, field: &Field, value: &str) {
		if field.name() == "message" {
			self.message = value.to_owned();
		} else {
			self.fields.push((field.name(), value.to_owned()));
		}
	}

	fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
		if field.name() == "message" {
			self.message = format!("{value:?}");
		} else {
			self.fields.push((field.name(), format!("{value:?}")));
		}
	}
}

fn log_level(level: &Level) -> LogLevel {
	match *level {
		Level::ERROR => LogLevel::Error,
		Level::WARN => LogLevel::Warning,
		Level::INFO => LogLevel::Info,
		Level::DEBUG => LogLevel::Debug,
		Level::TRACE => LogLevel::Trace,
	}
}

impl<S, W> Layer<S> for JsonLogLayer<W>
where
	S: Subscriber,
	W: for<'a> MakeWriter<'a> + 'static,
{
	fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
		let mut visitor = MessageVisitor::default();
		event.record(&mut visitor);

		let level = *event.metadata().level();
		let mut content = String::new();
		if SystemTime.format_time(&mut Writer::new(&mut content)).is_ok() {
			content.push_str(": ");
		}
		let _ = write!(content, "{:<8}: {}", level.as_str(), visitor.message);
		for (name, value) in &visitor.fields {
			let _ = write!(content, " {name}={value}");
		}

		let record = LogRecord {
			logging: log_level(&level),
			content,
		};
		let Ok(mut line) = serde_json::to_vec(&record) else {
			return;
		};
		line.push(b'\n');
		let mut writer = self.make_writer.make_writer_for(event.metadata());
		let _ = writer.write_all(&line);
	}
}

/// Installs a global subscriber writing JSON log records to stderr.
///
/// `RUST_LOG` overrides `default_filter`.
pub fn init_stderr_logging(default_filter: &str) -> Result<(), TryInitError> {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
	tracing_subscriber::registry()
		.with(filter)
		.with(JsonLogLayer::new(std::io::stderr))
		.try_init()
}

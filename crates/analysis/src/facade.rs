use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use pyhint_protocol::{Completion, Location, Payload, RequestKind, WireRequest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::backend::{Backend, Definition, Script};
use crate::format::{condense_signature, format_completion, function_parameters, funcargs_snippet};
use crate::{AnalysisError, Result};

/// How much of a call's parameter list gets filled in.
///
/// Configured as `"all"`, `"required"` or `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgumentMode {
	#[default]
	All,
	Required,
	Off,
}

impl ArgumentMode {
	/// Whether defaulted parameters are included.
	pub fn with_keywords(self) -> bool {
		self == ArgumentMode::All
	}

	/// Whether call-site argument completion is enabled at all.
	pub fn is_enabled(self) -> bool {
		self != ArgumentMode::Off
	}

	/// Name passed to the daemon's `-f` flag.
	pub fn as_flag(self) -> &'static str {
		match self {
			ArgumentMode::All => "all",
			ArgumentMode::Required => "required",
			ArgumentMode::Off => "",
		}
	}
}

impl fmt::Display for ArgumentMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ArgumentMode::Off => f.write_str("off"),
			other => f.write_str(other.as_flag()),
		}
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMode {
	Flag(bool),
	Name(String),
}

impl<'de> Deserialize<'de> for ArgumentMode {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		match RawMode::deserialize(deserializer)? {
			RawMode::Flag(true) => Ok(ArgumentMode::All),
			RawMode::Flag(false) => Ok(ArgumentMode::Off),
			RawMode::Name(name) => match name.as_str() {
				"all" => Ok(ArgumentMode::All),
				"required" => Ok(ArgumentMode::Required),
				"" | "off" => Ok(ArgumentMode::Off),
				other => Err(serde::de::Error::unknown_variant(other, &["all", "required", "off"])),
			},
		}
	}
}

impl Serialize for ArgumentMode {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		match self {
			ArgumentMode::Off => serializer.serialize_bool(false),
			other => serializer.serialize_str(other.as_flag()),
		}
	}
}

/// Anything that answers wire requests.
///
/// Failures never escape: an answer is either a payload or `None`.
pub trait Analyzer: Send + Sync {
	fn analyze(&self, request: &WireRequest) -> Option<Payload>;
}

/// Maps each request kind onto backend calls and shapes the answer.
pub struct Facade<B> {
	backend: B,
	mode: ArgumentMode,
}

impl<B: Backend> Facade<B> {
	pub fn new(backend: B, mode: ArgumentMode) -> Self {
		Self { backend, mode }
	}

	pub fn backend(&self) -> &B {
		&self.backend
	}

	pub fn mode(&self) -> ArgumentMode {
		self.mode
	}

	/// Answers one request, logging and swallowing backend failures.
	pub fn analyze(&self, request: &WireRequest) -> Option<Payload> {
		let path = (!request.filename.is_empty()).then(|| Path::new(&request.filename));
		let script = Script {
			source: &request.source,
			line: request.line,
			column: request.offset,
			path,
		};

		match self.dispatch(request.kind, &script) {
			Ok(payload) => payload,
			Err(AnalysisError::NotFound) => {
				tracing::debug!(kind = %request.kind, line = request.line, offset = request.offset, "nothing found");
				None
			}
			Err(err) => {
				tracing::error!(kind = %request.kind, correlation = %request.uuid, error = %err, "analysis failed");
				None
			}
		}
	}

	fn dispatch(&self, kind: RequestKind, script: &Script<'_>) -> Result<Option<Payload>> {
		let payload = match kind {
			RequestKind::Autocomplete => Some(Payload::Completions(self.autocomplete(script)?)),
			RequestKind::Goto => Some(Payload::Locations(self.goto(script)?)),
			RequestKind::Usages => Some(Payload::Locations(locations(self.backend.usages(script)?))),
			RequestKind::Funcargs => Some(Payload::Text(self.funcargs(script)?)),
			RequestKind::Docstring => self.first_definition(script)?.map(|def| Payload::Text(def.docstring)),
			RequestKind::Signature => self
				.first_definition(script)?
				.map(|def| Payload::Text(condense_signature(&def.docstring))),
		};
		Ok(payload)
	}

	/// Call-site parameters first, then regular completions, unique by display.
	fn autocomplete(&self, script: &Script<'_>) -> Result<Vec<Completion>> {
		let mut items = match self.backend.call_signatures(script)?.into_iter().next() {
			Some(call) => function_parameters(&call.params, true),
			None => Vec::new(),
		};
		let with_keywords = self.mode.with_keywords();
		items.extend(self.backend.completions(script)?.iter().map(|c| format_completion(c, with_keywords)));

		let mut seen = HashSet::new();
		items.retain(|item| seen.insert(item.display.clone()));
		Ok(items)
	}

	fn goto(&self, script: &Script<'_>) -> Result<Vec<Location>> {
		let mut found = self.backend.goto_assignments(script, true)?;
		if found.iter().all(|def| def.kind == "import") {
			found = self.backend.goto_definitions(script)?;
		}
		Ok(locations(found))
	}

	fn funcargs(&self, script: &Script<'_>) -> Result<String> {
		Ok(match self.backend.call_signatures(script)?.into_iter().next() {
			Some(call) => funcargs_snippet(&call.params, self.mode.with_keywords()),
			None => String::new(),
		})
	}

	fn first_definition(&self, script: &Script<'_>) -> Result<Option<Definition>> {
		Ok(self.backend.goto_definitions(script)?.into_iter().next())
	}
}

impl<B: Backend> Analyzer for Facade<B> {
	fn analyze(&self, request: &WireRequest) -> Option<Payload> {
		Facade::analyze(self, request)
	}
}

/// Builtin definitions dropped, columns shifted to 1-based.
fn locations(definitions: Vec<Definition>) -> Vec<Location> {
	definitions
		.into_iter()
		.filter(|def| !def.in_builtin_module)
		.map(|def| {
			let path = def.module_path.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
			Location::new(path, def.line, def.column + 1)
		})
		.collect()
}

#[cfg(test)]
mod tests;

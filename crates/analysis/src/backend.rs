use std::path::{Path, PathBuf};

use crate::Result;

/// One analysis position: a buffer snapshot plus a cursor.
#[derive(Debug, Clone, Copy)]
pub struct Script<'a> {
	/// Full buffer text.
	pub source: &'a str,
	/// 1-based line.
	pub line: u32,
	/// 0-based column in characters.
	pub column: u32,
	/// File backing the buffer, if it was saved.
	pub path: Option<&'a Path>,
}

/// How a parameter binds arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamKind {
	#[default]
	Regular,
	/// `*args`
	VarPositional,
	/// `**kwargs`
	VarKeyword,
}

/// A callable's parameter as the backend describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
	pub name: String,
	pub kind: ParamKind,
	/// Source text of the default value, if any.
	pub default: Option<String>,
}

impl Param {
	/// A parameter without a default.
	pub fn required(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			kind: ParamKind::Regular,
			default: None,
		}
	}

	/// A parameter with a default value.
	pub fn keyword(name: impl Into<String>, default: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			kind: ParamKind::Regular,
			default: Some(default.into()),
		}
	}

	/// A `*name` or `**name` parameter.
	pub fn variadic(name: impl Into<String>, kind: ParamKind) -> Self {
		Self {
			name: name.into(),
			kind,
			default: None,
		}
	}
}

/// The call the cursor is inside of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignature {
	pub name: String,
	pub params: Vec<Param>,
}

/// A completion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
	pub name: String,
	/// Backend type label: `function`, `class`, `module`, `instance`, `keyword`, ...
	pub kind: String,
	/// Parameters, for `function` and `class` candidates.
	pub params: Vec<Param>,
}

/// A name resolved to a place in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
	/// `None` when the name lives in the analysed buffer itself.
	pub module_path: Option<PathBuf>,
	/// 1-based line.
	pub line: u32,
	/// 0-based column.
	pub column: u32,
	/// Backend type label; `import` marks an import statement.
	pub kind: String,
	pub in_builtin_module: bool,
	pub docstring: String,
}

/// The Python analysis engine.
///
/// Implementations are synchronous and may be slow; callers keep them off the
/// UI thread. They need not be reentrant: the facade is driven through a
/// serial executor.
pub trait Backend: Send + Sync {
	/// Regular completions at the cursor.
	fn completions(&self, script: &Script<'_>) -> Result<Vec<Candidate>>;

	/// Signatures of the call enclosing the cursor, innermost first.
	fn call_signatures(&self, script: &Script<'_>) -> Result<Vec<CallSignature>>;

	/// Where the name under the cursor was assigned.
	fn goto_assignments(&self, script: &Script<'_>, follow_imports: bool) -> Result<Vec<Definition>>;

	/// Where the value under the cursor was defined.
	fn goto_definitions(&self, script: &Script<'_>) -> Result<Vec<Definition>>;

	/// Every reference to the name under the cursor.
	fn usages(&self, script: &Script<'_>) -> Result<Vec<Definition>>;
}

//! Worker configuration.
//!
//! One [`ClientConfig`] describes everything a worker is built from. Two
//! sessions with equal configurations get equivalent workers, and a session
//! whose configuration changes gets its worker rebuilt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pyhint_analysis::ArgumentMode;
use serde::{Deserialize, Serialize};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },
	#[error("invalid configuration: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("python interpreter {0} does not exist")]
	MissingInterpreter(PathBuf),
	#[error("no python interpreter found on PATH")]
	NoInterpreter,
	#[error("subprocess transport needs either `command` or `script`")]
	NoDaemonCommand,
	#[error("in-process transport configured but no analyzer is available")]
	NoAnalyzer,
	#[error("analysis backend failed to start: {0}")]
	Backend(String),
}

/// Everything a worker is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Interpreter path; may use `$project_path`-style variables.
	pub python_interpreter: Option<String>,
	/// Virtualenv root; inferred from the interpreter when unset.
	pub python_virtualenv: Option<String>,
	/// Module search paths placed ahead of the environment's own.
	#[serde(alias = "python_package_paths")]
	pub extra_paths: Vec<String>,
	/// Names the daemon's cache directory.
	pub project_name: Option<String>,
	pub project_root: Option<PathBuf>,
	pub complete_funcargs: ArgumentMode,
	pub request_timeout_ms: u64,
	pub completion_debounce_ms: u64,
	pub transport: TransportConfig,
	/// Width of the in-process analysis pool.
	pub worker_threads: usize,
	/// Pending requests older than this are failed by the orphan sweep.
	pub orphan_ttl_ms: u64,
	pub crash_backoff: CrashBackoff,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			python_interpreter: None,
			python_virtualenv: None,
			extra_paths: Vec::new(),
			project_name: None,
			project_root: None,
			complete_funcargs: ArgumentMode::All,
			request_timeout_ms: 3000,
			completion_debounce_ms: 150,
			transport: TransportConfig::InProcess,
			worker_threads: 1,
			orphan_ttl_ms: 30_000,
			crash_backoff: CrashBackoff::default(),
		}
	}
}

impl ClientConfig {
	/// Parses a TOML document.
	pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(content)?)
	}

	/// Loads configuration from a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&content)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}

	pub fn completion_debounce(&self) -> Duration {
		Duration::from_millis(self.completion_debounce_ms)
	}

	pub fn orphan_ttl(&self) -> Duration {
		Duration::from_millis(self.orphan_ttl_ms)
	}
}

/// Where analysis runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportConfig {
	/// On a serial executor inside the editor process.
	#[default]
	InProcess,
	/// In a daemon child process speaking line-delimited JSON.
	Subprocess(SubprocessConfig),
}

/// How to start a daemon.
///
/// An explicit `command` is run verbatim with `args`. Otherwise the resolved
/// interpreter runs `script` with the project name, extra paths and argument
/// mode as flags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
	pub command: Option<String>,
	pub args: Vec<String>,
	pub script: Option<PathBuf>,
}

/// Limits how often a crashing session is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashBackoff {
	pub max_restarts: u32,
	pub window_ms: u64,
}

impl Default for CrashBackoff {
	fn default() -> Self {
		Self {
			max_restarts: 3,
			window_ms: 10_000,
		}
	}
}

impl CrashBackoff {
	pub fn window(&self) -> Duration {
		Duration::from_millis(self.window_ms)
	}
}

//! Python environment discovery and module search path assembly.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::{ClientConfig, ConfigError};

const SYS_PATH_SCRIPT: &str = "import sys, json; print(json.dumps(sys.path))";

/// How long the interpreter gets to report its `sys.path`.
const SYS_PATH_TIMEOUT: Duration = Duration::from_secs(10);

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Values substituted into configured paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathContext {
	pub project_path: Option<PathBuf>,
	pub project_name: Option<String>,
	pub file_path: Option<PathBuf>,
	pub home: Option<PathBuf>,
}

impl PathContext {
	/// Context derived from a worker configuration and the process environment.
	pub fn from_config(config: &ClientConfig) -> Self {
		Self {
			project_path: config.project_root.clone(),
			project_name: config.project_name.clone(),
			file_path: None,
			home: std::env::var_os("HOME").map(PathBuf::from),
		}
	}

	fn variables(&self) -> Vec<(&'static str, String)> {
		let mut vars = Vec::new();
		if let Some(path) = &self.project_path {
			vars.push(("$project_path", path.to_string_lossy().into_owned()));
		}
		if let Some(name) = &self.project_name {
			vars.push(("$project_name", name.clone()));
		}
		if let Some(file) = &self.file_path {
			if let Some(dir) = file.parent() {
				vars.push(("$file_path", dir.to_string_lossy().into_owned()));
			}
			if let Some(name) = file.file_name() {
				vars.push(("$file_name", name.to_string_lossy().into_owned()));
			}
		}
		if let Some(home) = &self.home {
			vars.push(("$home", home.to_string_lossy().into_owned()));
		}
		// Longest first so `$project_path` wins over a shorter prefix.
		vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
		vars
	}
}

/// Expands context variables and `$VAR`/`${VAR}` environment variables in `raw`.
///
/// The expanded, lexically normalized path is used only if it exists;
/// otherwise `raw` is returned unchanged.
pub fn expand_path(raw: &str, ctx: &PathContext) -> PathBuf {
	if !raw.contains('$') {
		return PathBuf::from(raw);
	}

	let mut expanded = raw.to_owned();
	for (name, value) in ctx.variables() {
		expanded = expanded.replace(name, &value);
	}
	let expanded = normalize(Path::new(&expand_env_vars(&expanded)));

	if expanded.exists() {
		expanded
	} else {
		tracing::debug!(raw, expanded = %expanded.display(), "expanded path does not exist; keeping raw value");
		PathBuf::from(raw)
	}
}

fn expand_env_vars(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let mut rest = input;
	while let Some(start) = rest.find('$') {
		out.push_str(&rest[..start]);
		let after = &rest[start + 1..];
		let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
			match braced.find('}') {
				Some(end) => (&braced[..end], end + 2),
				None => ("", 0),
			}
		} else {
			let end = after.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_')).unwrap_or(after.len());
			(&after[..end], end)
		};

		match std::env::var(name) {
			Ok(value) if !name.is_empty() => out.push_str(&value),
			_ => out.push_str(&rest[start..start + 1 + consumed]),
		}
		rest = &after[consumed..];
	}
	out.push_str(rest);
	out
}

/// Collapses `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
	let mut out = PathBuf::new();
	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				if !matches!(out.components().next_back(), Some(Component::Normal(_))) || !out.pop() {
					out.push("..");
				}
			}
			other => out.push(other),
		}
	}
	out
}

/// The interpreter a worker analyses against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
	pub interpreter: PathBuf,
	pub virtualenv: Option<PathBuf>,
}

impl Environment {
	/// Resolves the configured interpreter and virtualenv, inferring whichever is missing.
	///
	/// With neither configured, `python3` (then `python`) on `PATH` is used.
	pub fn resolve(config: &ClientConfig, ctx: &PathContext) -> Result<Self, ConfigError> {
		let interpreter = config.python_interpreter.as_deref().map(|raw| expand_path(raw, ctx));
		let virtualenv = config.python_virtualenv.as_deref().map(|raw| expand_path(raw, ctx));

		let (interpreter, virtualenv) = match (interpreter, virtualenv) {
			(Some(interpreter), Some(venv)) => (interpreter, Some(venv)),
			(Some(interpreter), None) => {
				let venv = interpreter.parent().and_then(Path::parent).map(Path::to_path_buf);
				(interpreter, venv)
			}
			(None, Some(venv)) => (venv_interpreter(&venv), Some(venv)),
			(None, None) => {
				let found = which::which("python3")
					.or_else(|_| which::which("python"))
					.map_err(|_| ConfigError::NoInterpreter)?;
				(found, None)
			}
		};

		if !interpreter.exists() {
			return Err(ConfigError::MissingInterpreter(interpreter));
		}
		Ok(Self { interpreter, virtualenv })
	}

	/// Asks the interpreter for its `sys.path`. Blocks on a child process.
	///
	/// An interpreter still running after `limit` is killed.
	pub fn query_sys_path(&self, limit: Duration) -> io::Result<Vec<PathBuf>> {
		let mut child = Command::new(&self.interpreter)
			.args(["-c", SYS_PATH_SCRIPT])
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()?;

		let deadline = Instant::now() + limit;
		while child.try_wait()?.is_none() {
			if Instant::now() >= deadline {
				let _ = child.kill();
				let _ = child.wait();
				return Err(io::Error::new(
					io::ErrorKind::TimedOut,
					format!("interpreter did not report sys.path within {limit:?}"),
				));
			}
			std::thread::sleep(EXIT_POLL);
		}

		let output = child.wait_with_output()?;
		if !output.status.success() {
			return Err(io::Error::other(format!(
				"sys.path query exited with {}: {}",
				output.status,
				String::from_utf8_lossy(&output.stderr).trim()
			)));
		}
		let paths: Vec<String> = serde_json::from_slice(&output.stdout).map_err(io::Error::other)?;
		Ok(paths.into_iter().filter(|p| !p.is_empty()).map(PathBuf::from).collect())
	}
}

#[cfg(windows)]
fn venv_interpreter(venv: &Path) -> PathBuf {
	venv.join("Scripts").join("python.exe")
}

#[cfg(not(windows))]
fn venv_interpreter(venv: &Path) -> PathBuf {
	venv.join("bin").join("python")
}

/// Extra paths first, then discovered ones; later duplicates dropped.
pub fn assemble_sys_path(extra: &[PathBuf], discovered: &[PathBuf]) -> Vec<PathBuf> {
	let mut out: Vec<PathBuf> = Vec::with_capacity(extra.len() + discovered.len());
	for path in extra.iter().chain(discovered) {
		if !out.contains(path) {
			out.push(path.clone());
		}
	}
	out
}

/// An environment plus the module search path assembled for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
	pub environment: Environment,
	pub extra_paths: Vec<PathBuf>,
	pub sys_path: Vec<PathBuf>,
}

impl ResolvedEnvironment {
	/// Resolves the environment and asks it for its search path. Blocking.
	///
	/// A failed or hung query is logged and leaves only the extra paths.
	pub fn discover(config: &ClientConfig, ctx: &PathContext) -> Result<Self, ConfigError> {
		let environment = Environment::resolve(config, ctx)?;
		let extra_paths: Vec<PathBuf> = config.extra_paths.iter().map(|raw| expand_path(raw, ctx)).collect();

		let discovered = environment.query_sys_path(SYS_PATH_TIMEOUT).unwrap_or_else(|err| {
			tracing::warn!(
				interpreter = %environment.interpreter.display(),
				error = %err,
				"could not read interpreter sys.path; using extra paths only"
			);
			Vec::new()
		});

		let sys_path = assemble_sys_path(&extra_paths, &discovered);
		tracing::info!(
			interpreter = %environment.interpreter.display(),
			entries = sys_path.len(),
			"python environment resolved"
		);
		Ok(Self {
			environment,
			extra_paths,
			sys_path,
		})
	}

	/// An already-known environment; the interpreter is never run.
	pub fn fixed(interpreter: impl Into<PathBuf>, sys_path: Vec<PathBuf>) -> Self {
		Self {
			environment: Environment {
				interpreter: interpreter.into(),
				virtualenv: None,
			},
			extra_paths: Vec::new(),
			sys_path,
		}
	}
}

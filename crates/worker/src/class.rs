/// Execution classes used for scheduling and log attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Latency-sensitive work that directly affects typing, such as debounce timers.
	Interactive,
	/// Heavy analysis calls into a backend.
	Analysis,
	/// Pipe readers and writers of a subprocess worker.
	Io,
	/// Housekeeping that can be delayed, such as orphan sweeps and process reaping.
	Background,
}

impl TaskClass {
	/// Returns the stable name used in log fields and thread names.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Interactive => "interactive",
			Self::Analysis => "analysis",
			Self::Io => "io",
			Self::Background => "background",
		}
	}
}

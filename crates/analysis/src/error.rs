/// Result alias for analysis operations.
pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;

/// Failure inside the analysis backend.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
	#[error("backend error: {0}")]
	Backend(String),
	#[error("nothing found at cursor")]
	NotFound,
}

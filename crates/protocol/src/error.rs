use std::io;

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The line is not valid JSON or does not match the expected shape.
	#[error("malformed message: {0}")]
	Json(#[from] serde_json::Error),
	/// The JSON is well formed but violates the protocol.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// Input/output errors from the underlying stream.
	#[error("{0}")]
	Io(#[from] io::Error),
}

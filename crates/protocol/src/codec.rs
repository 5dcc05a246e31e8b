//! Line framing over async byte streams.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::Result;

/// Reads the next non-empty line into `buf`.
///
/// Returns `Ok(None)` on EOF. The returned slice has its line terminator
/// stripped. Invalid UTF-8 is replaced rather than treated as fatal so that a
/// single bad line cannot end a reader loop.
pub async fn read_line<'a>(reader: &mut (impl AsyncBufRead + Unpin), buf: &'a mut String) -> Result<Option<&'a str>> {
	let mut raw = Vec::new();
	loop {
		raw.clear();
		let read = reader.read_until(b'\n', &mut raw).await?;
		if read == 0 {
			return Ok(None);
		}
		if raw.iter().all(u8::is_ascii_whitespace) {
			continue;
		}
		*buf = String::from_utf8_lossy(&raw).into_owned();
		return Ok(Some(buf.trim_end_matches(['\r', '\n'])));
	}
}

/// Serializes `message` as one JSON line and flushes it.
pub async fn write_line(writer: &mut (impl AsyncWrite + Unpin), message: &impl Serialize) -> Result<()> {
	let mut line = serde_json::to_vec(message)?;
	line.push(b'\n');
	writer.write_all(&line).await?;
	writer.flush().await?;
	Ok(())
}

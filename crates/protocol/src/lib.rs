//! Wire protocol spoken between pyhint clients and analysis daemons.
//!
//! Every message is one UTF-8 JSON object terminated by `\n`. There is no
//! length prefix, so a malformed line only costs that line: readers log it
//! and keep going.
//!
//! ```text
//! client ──stdin──▶ {"uuid": "...", "type": "goto", "source": "...", "line": 2, "offset": 6, "filename": ""}
//! client ◀─stdout── {"uuid": "...", "type": "goto", "goto": [["", 1, 1]]}
//! client ◀─stderr── {"logging": "info", "content": "..."}
//! ```
//!
//! Requests and responses are correlated by the `uuid` token only; responses
//! may arrive in any order relative to their requests.

#![warn(missing_docs)]

pub mod codec;
mod error;
mod kind;
mod message;

pub use codec::{read_line, write_line};
pub use error::{Error, Result};
pub use kind::RequestKind;
pub use message::{Completion, CorrelationId, Inbound, Location, LogLevel, LogRecord, Payload, WireRequest, WireResponse};

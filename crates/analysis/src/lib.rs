//! Analysis facade for pyhint.
//!
//! A [`Backend`] is the Python analysis engine: given a buffer snapshot and a
//! cursor it produces raw candidates, signatures and definitions. [`Facade`]
//! turns one [`WireRequest`](pyhint_protocol::WireRequest) into one
//! [`Payload`](pyhint_protocol::Payload) by dispatching on the request kind
//! and shaping the backend's answer the way the editor expects it.

mod backend;
mod error;
mod facade;
mod format;

pub use backend::{Backend, CallSignature, Candidate, Definition, Param, ParamKind, Script};
pub use error::{AnalysisError, Result};
pub use facade::{Analyzer, ArgumentMode, Facade};
pub use format::{condense_signature, format_completion, funcargs_snippet, function_parameters};

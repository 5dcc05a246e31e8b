use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// The closed set of analysis requests a client can issue.
///
/// The wire name doubles as the key under which a response carries its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
	/// Completion items at the cursor.
	Autocomplete,
	/// Go to definition.
	Goto,
	/// Find usages of the symbol under the cursor.
	Usages,
	/// Parameter snippet for the call being typed.
	Funcargs,
	/// Full docstring of the symbol under the cursor.
	Docstring,
	/// One-line call signature of the symbol under the cursor.
	Signature,
}

impl RequestKind {
	/// Every kind, in wire order.
	pub const ALL: [RequestKind; 6] = [
		RequestKind::Autocomplete,
		RequestKind::Goto,
		RequestKind::Usages,
		RequestKind::Funcargs,
		RequestKind::Docstring,
		RequestKind::Signature,
	];

	/// Returns the wire name of this kind.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Autocomplete => "autocomplete",
			Self::Goto => "goto",
			Self::Usages => "usages",
			Self::Funcargs => "funcargs",
			Self::Docstring => "docstring",
			Self::Signature => "signature",
		}
	}
}

impl fmt::Display for RequestKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for RequestKind {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|kind| kind.as_str() == s)
			.ok_or_else(|| Error::Protocol(format!("unknown request type {s:?}")))
	}
}

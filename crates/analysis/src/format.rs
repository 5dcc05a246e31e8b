//! Shaping backend answers into editor completions and snippets.

use pyhint_protocol::Completion;

use crate::backend::{Candidate, Param, ParamKind};

/// Placeholder some builtins list between positional and keyword-only parameters.
const ELLIPSIS: &str = "...";

/// Parameter completions for a call, as `(name\tparam, snippet)` pairs.
///
/// `self`, `*args`, `**kwargs` and the `...` placeholder are skipped. Without
/// keywords, defaulted parameters are left out and listing stops at `...`.
/// Snippet indices are 1-based over the emitted parameters.
pub fn function_parameters(params: &[Param], with_keywords: bool) -> Vec<Completion> {
	let mut kept: Vec<(&str, Option<&str>)> = Vec::new();
	for param in params {
		if !with_keywords && param.name == ELLIPSIS {
			break;
		}
		if param.name.is_empty() || param.name == "self" || param.name == ELLIPSIS || param.kind != ParamKind::Regular {
			continue;
		}
		match param.default.as_deref() {
			Some(default) if with_keywords => kept.push((param.name.as_str(), Some(default.trim_start()))),
			Some(_) => continue,
			None => kept.push((param.name.as_str(), None)),
		}
	}

	kept.into_iter()
		.enumerate()
		.map(|(index, (name, default))| {
			let index = index + 1;
			let insert = match default {
				Some(value) => format!("{name}=${{{index}:{value}}}"),
				None => format!("${{{index}:{name}}}"),
			};
			Completion::new(format!("{name}\tparam"), insert)
		})
		.collect()
}

/// Snippet filling in a call's arguments, e.g. `${1:a}, b=${2:2}`.
pub fn funcargs_snippet(params: &[Param], with_keywords: bool) -> String {
	function_parameters(params, with_keywords)
		.into_iter()
		.map(|completion| completion.insert)
		.collect::<Vec<_>>()
		.join(", ")
}

/// Display/insert pair for a regular completion.
///
/// Functions and classes display their parameter list and insert a call
/// snippet whose final tab stop lands after the closing parenthesis.
pub fn format_completion(candidate: &Candidate, with_keywords: bool) -> Completion {
	let (display, insert) = if matches!(candidate.kind.as_str(), "function" | "class") {
		let params = function_parameters(&candidate.params, with_keywords);
		let shown: Vec<&str> = params.iter().map(|p| p.display.split('\t').next().unwrap_or_default()).collect();
		let mut inserted: Vec<&str> = params.iter().map(|p| p.insert.as_str()).collect();
		if inserted.is_empty() {
			inserted.push("$1");
		}
		let last = inserted.len() + 1;
		(
			format!("{}({})", candidate.name, shown.join(", ")),
			format!("{}({})${last}", candidate.name, inserted.join(", ")),
		)
	} else {
		(candidate.name.clone(), candidate.name.clone())
	};
	Completion::new(format!("{display}\t{}", candidate.kind), insert)
}

/// First paragraph of a docstring folded onto one line, `a = 1` tightened to `a=1`.
pub fn condense_signature(docstring: &str) -> String {
	docstring.split("\n\n").next().unwrap_or_default().replace('\n', " ").replace(" = ", "=")
}

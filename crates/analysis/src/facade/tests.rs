use std::path::PathBuf;
use std::sync::Mutex;

use pretty_assertions::assert_eq;
use pyhint_protocol::CorrelationId;

use super::*;
use crate::backend::{CallSignature, Candidate, Param};

#[derive(Default)]
struct StubBackend {
	completions: Vec<Candidate>,
	signatures: Vec<CallSignature>,
	assignments: Vec<Definition>,
	definitions: Vec<Definition>,
	usages: Vec<Definition>,
	fail_with: Option<fn() -> AnalysisError>,
	seen: Mutex<Vec<(u32, u32, Option<PathBuf>)>>,
}

impl StubBackend {
	fn record(&self, script: &Script<'_>) -> Result<()> {
		self.seen
			.lock()
			.unwrap()
			.push((script.line, script.column, script.path.map(Path::to_path_buf)));
		match self.fail_with {
			Some(make) => Err(make()),
			None => Ok(()),
		}
	}
}

impl Backend for StubBackend {
	fn completions(&self, script: &Script<'_>) -> Result<Vec<Candidate>> {
		self.record(script)?;
		Ok(self.completions.clone())
	}

	fn call_signatures(&self, script: &Script<'_>) -> Result<Vec<CallSignature>> {
		self.record(script)?;
		Ok(self.signatures.clone())
	}

	fn goto_assignments(&self, script: &Script<'_>, _follow_imports: bool) -> Result<Vec<Definition>> {
		self.record(script)?;
		Ok(self.assignments.clone())
	}

	fn goto_definitions(&self, script: &Script<'_>) -> Result<Vec<Definition>> {
		self.record(script)?;
		Ok(self.definitions.clone())
	}

	fn usages(&self, script: &Script<'_>) -> Result<Vec<Definition>> {
		self.record(script)?;
		Ok(self.usages.clone())
	}
}

fn request(kind: RequestKind) -> WireRequest {
	WireRequest {
		uuid: CorrelationId::from("abc"),
		kind,
		source: "x=1\nprint(x)".into(),
		line: 2,
		offset: 6,
		filename: String::new(),
	}
}

fn def(path: Option<&str>, line: u32, column: u32, kind: &str) -> Definition {
	Definition {
		module_path: path.map(PathBuf::from),
		line,
		column,
		kind: kind.into(),
		in_builtin_module: false,
		docstring: String::new(),
	}
}

fn f_signature() -> CallSignature {
	CallSignature {
		name: "f".into(),
		params: vec![Param::required("a"), Param::keyword("b", "2")],
	}
}

#[test]
fn funcargs_in_all_mode_covers_defaults() {
	let backend = StubBackend {
		signatures: vec![f_signature()],
		..Default::default()
	};
	let facade = Facade::new(backend, ArgumentMode::All);

	assert_eq!(facade.analyze(&request(RequestKind::Funcargs)), Some(Payload::Text("${1:a}, b=${2:2}".into())));
}

#[test]
fn funcargs_in_required_mode_skips_defaults() {
	let backend = StubBackend {
		signatures: vec![f_signature()],
		..Default::default()
	};
	let facade = Facade::new(backend, ArgumentMode::Required);

	assert_eq!(facade.analyze(&request(RequestKind::Funcargs)), Some(Payload::Text("${1:a}".into())));
}

#[test]
fn funcargs_outside_a_call_is_empty() {
	let facade = Facade::new(StubBackend::default(), ArgumentMode::All);
	assert_eq!(facade.analyze(&request(RequestKind::Funcargs)), Some(Payload::Text(String::new())));
}

#[test]
fn goto_shifts_columns_and_marks_buffer_locations() {
	let backend = StubBackend {
		assignments: vec![def(None, 1, 0, "statement")],
		..Default::default()
	};
	let facade = Facade::new(backend, ArgumentMode::All);

	assert_eq!(
		facade.analyze(&request(RequestKind::Goto)),
		Some(Payload::Locations(vec![Location::new("", 1, 1)]))
	);
	let seen = facade.backend().seen.lock().unwrap();
	assert_eq!(seen[0], (2, 6, None), "empty filename means an unsaved buffer");
}

#[test]
fn goto_follows_imports_to_definitions() {
	let backend = StubBackend {
		assignments: vec![def(None, 1, 0, "import")],
		definitions: vec![def(Some("/lib/os.py"), 10, 4, "module")],
		..Default::default()
	};
	let facade = Facade::new(backend, ArgumentMode::All);

	assert_eq!(
		facade.analyze(&request(RequestKind::Goto)),
		Some(Payload::Locations(vec![Location::new("/lib/os.py", 10, 5)]))
	);
}

#[test]
fn builtin_usages_are_filtered() {
	let mut builtin = def(Some("builtins.pyi"), 3, 0, "function");
	builtin.in_builtin_module = true;
	let backend = StubBackend {
		usages: vec![builtin, def(Some("/src/a.py"), 7, 2, "statement")],
		..Default::default()
	};
	let facade = Facade::new(backend, ArgumentMode::All);

	assert_eq!(
		facade.analyze(&request(RequestKind::Usages)),
		Some(Payload::Locations(vec![Location::new("/src/a.py", 7, 3)]))
	);
}

#[test]
fn autocomplete_puts_call_params_first_and_dedups() {
	let backend = StubBackend {
		signatures: vec![f_signature()],
		completions: vec![
			Candidate {
				name: "a".into(),
				kind: "param".into(),
				params: Vec::new(),
			},
			Candidate {
				name: "abs".into(),
				kind: "function".into(),
				params: vec![Param::required("x")],
			},
		],
		..Default::default()
	};
	let facade = Facade::new(backend, ArgumentMode::Required);

	let Some(Payload::Completions(items)) = facade.analyze(&request(RequestKind::Autocomplete)) else {
		panic!("expected completions");
	};
	assert_eq!(
		items,
		vec![
			Completion::new("a\tparam", "${1:a}"),
			Completion::new("b\tparam", "b=${2:2}"),
			Completion::new("abs(x)\tfunction", "abs(${1:x})$2"),
		]
	);
}

#[test]
fn docstring_and_signature_use_first_definition() {
	let mut definition = def(None, 1, 0, "function");
	definition.docstring = "f(a, b = 2)\n\nDoes things.".into();
	let backend = StubBackend {
		definitions: vec![definition],
		..Default::default()
	};
	let facade = Facade::new(backend, ArgumentMode::All);

	assert_eq!(
		facade.analyze(&request(RequestKind::Docstring)),
		Some(Payload::Text("f(a, b = 2)\n\nDoes things.".into()))
	);
	assert_eq!(facade.analyze(&request(RequestKind::Signature)), Some(Payload::Text("f(a, b=2)".into())));
}

#[test]
fn docstring_without_definition_is_absent() {
	let facade = Facade::new(StubBackend::default(), ArgumentMode::All);
	assert_eq!(facade.analyze(&request(RequestKind::Docstring)), None);
}

#[test]
fn backend_failures_become_empty_answers() {
	for make in [(|| AnalysisError::Backend("boom".into())) as fn() -> AnalysisError, || AnalysisError::NotFound] {
		let backend = StubBackend {
			fail_with: Some(make),
			..Default::default()
		};
		let facade = Facade::new(backend, ArgumentMode::All);
		for kind in RequestKind::ALL {
			assert_eq!(facade.analyze(&request(kind)), None, "{kind} should swallow the failure");
		}
	}
}

#[test]
fn filename_is_passed_as_path() {
	let facade = Facade::new(StubBackend::default(), ArgumentMode::All);
	let mut req = request(RequestKind::Usages);
	req.filename = "/src/main.py".into();
	facade.analyze(&req);
	let seen = facade.backend().seen.lock().unwrap();
	assert_eq!(seen[0].2.as_deref(), Some(Path::new("/src/main.py")));
}

#[test]
fn argument_mode_reads_config_values() {
	#[derive(Deserialize)]
	struct Holder {
		mode: ArgumentMode,
	}
	let parse = |json: &str| serde_json::from_str::<Holder>(json).map(|h| h.mode);

	assert_eq!(parse(r#"{"mode":"all"}"#).unwrap(), ArgumentMode::All);
	assert_eq!(parse(r#"{"mode":"required"}"#).unwrap(), ArgumentMode::Required);
	assert_eq!(parse(r#"{"mode":false}"#).unwrap(), ArgumentMode::Off);
	assert!(parse(r#"{"mode":"some"}"#).is_err());
	assert_eq!(serde_json::to_string(&ArgumentMode::Off).unwrap(), "false");
}

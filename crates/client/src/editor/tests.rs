use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use pyhint_analysis::{Analyzer, ArgumentMode};
use pyhint_protocol::{Completion, WireRequest};
use pyhint_worker::UiPump;

use super::*;
use crate::config::ConfigError;
use crate::correlation::CorrelationTable;
use crate::session::WorkerId;
use crate::transport::InProcessTransport;
use crate::worker::{Worker, WorkerLauncher};

/// Canned answers per request kind; sources containing `slow` take a while.
struct Stub;

impl Analyzer for Stub {
	fn analyze(&self, request: &WireRequest) -> Option<Payload> {
		if request.source.contains("slow") {
			std::thread::sleep(Duration::from_millis(300));
		}
		let answer = match request.kind {
			RequestKind::Autocomplete => Payload::Completions(vec![
				Completion::new("foo\tfunction", "foo"),
				Completion::new("bar\tfunction", "bar"),
			]),
			RequestKind::Goto => Payload::Locations(vec![Location::new("", request.line, request.offset + 1)]),
			RequestKind::Usages => Payload::Locations(vec![Location::new("/p/a.py", 1, 1), Location::new("/p/b.py", 2, 5)]),
			RequestKind::Docstring => Payload::Text(format!("doc for line {}", request.line)),
			RequestKind::Signature => Payload::Text("f(a, b=2)".into()),
			RequestKind::Funcargs => Payload::Text("${1:a}, b=${2:2}".into()),
		};
		Some(answer)
	}
}

struct StubLauncher {
	dispatcher: Dispatcher,
	fail: Option<Error>,
	launches: AtomicUsize,
}

#[async_trait]
impl WorkerLauncher for StubLauncher {
	async fn launch(&self, id: WorkerId, config: Arc<ClientConfig>) -> crate::Result<Worker> {
		self.launches.fetch_add(1, Ordering::SeqCst);
		if let Some(err) = &self.fail {
			return Err(err.clone());
		}
		let table = Arc::new(CorrelationTable::new());
		let transport = InProcessTransport::new(id.clone(), config.worker_threads, Arc::new(Stub), Arc::clone(&table))?;
		Ok(Worker::new(id, config, None, table, Arc::new(transport), self.dispatcher.clone()))
	}
}

fn setup(fail: Option<Error>, config: ClientConfig) -> (PyHint, UiPump, Arc<StubLauncher>) {
	let (dispatcher, pump) = Dispatcher::channel();
	let launcher = Arc::new(StubLauncher {
		dispatcher: dispatcher.clone(),
		fail,
		launches: AtomicUsize::new(0),
	});
	let registry = Arc::new(SessionRegistry::new(Arc::clone(&launcher) as Arc<dyn WorkerLauncher>));
	(PyHint::new(registry, dispatcher, config), pump, launcher)
}

fn view(session: &str, text: &str, cursor: usize) -> ViewState {
	ViewState {
		session: session.into(),
		view: ViewId(1),
		text: text.into(),
		cursor,
		path: None,
	}
}

/// Pumps the UI queue until `done` holds.
fn pump_until(pump: &UiPump, done: impl Fn() -> bool) {
	let deadline = Instant::now() + Duration::from_secs(5);
	while !done() {
		assert!(Instant::now() < deadline, "timed out waiting for UI callbacks");
		pump.pump_timeout(Duration::from_millis(20));
	}
}

fn slot<T>() -> Arc<parking_lot::Mutex<Option<T>>> {
	Arc::new(parking_lot::Mutex::new(None))
}

#[test]
fn cursor_maps_to_one_based_line_and_zero_based_column() {
	let state = view("w1", "x=1\nprint(x)", 10);
	assert_eq!(state.line_column(), (2, 6));

	let data = view("w1", "héllo", 3).request_data();
	assert_eq!((data.line, data.offset, data.filename.as_str()), (1, 3, ""));
}

#[test]
fn goto_delivers_locations_on_the_ui_thread() {
	let (pyhint, pump, _) = setup(None, ClientConfig::default());
	let result = slot();
	let sink = Arc::clone(&result);
	let ui_thread = std::thread::current().id();

	pyhint.request_goto(&view("w1", "x=1\nprint(x)", 10), move |locations| {
		assert_eq!(std::thread::current().id(), ui_thread);
		*sink.lock() = Some(locations);
	});
	pump_until(&pump, || result.lock().is_some());

	assert_eq!(result.lock().take().unwrap(), [Location::new("", 2, 7)]);
}

#[test]
fn text_requests_deliver_their_payloads() {
	let (pyhint, pump, _) = setup(None, ClientConfig::default());
	let docstring = slot();
	let signature = slot();
	let usages = slot();

	let sink = Arc::clone(&docstring);
	pyhint.request_docstring(&view("w1", "a\nb", 2), move |doc| *sink.lock() = Some(doc));
	let sink = Arc::clone(&signature);
	pyhint.request_signature(&view("w1", "f(", 2), move |sig| *sink.lock() = Some(sig));
	let sink = Arc::clone(&usages);
	pyhint.request_usages(&view("w1", "f", 1), move |locations| *sink.lock() = Some(locations));
	pump_until(&pump, || docstring.lock().is_some() && signature.lock().is_some() && usages.lock().is_some());

	assert_eq!(docstring.lock().take().unwrap().as_deref(), Some("doc for line 2"));
	assert_eq!(signature.lock().take().unwrap().as_deref(), Some("f(a, b=2)"));
	assert_eq!(usages.lock().take().unwrap().len(), 2);
}

#[test]
fn completion_is_a_two_phase_handshake() {
	let config = ClientConfig {
		completion_debounce_ms: 0,
		..ClientConfig::default()
	};
	let (pyhint, pump, _) = setup(None, config);
	let ready = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&ready);
	let pyhint = pyhint.with_completion_ready_hook(move |session, cursor| {
		assert_eq!(session.as_str(), "w1");
		assert_eq!(cursor.offset, 7);
		counter.fetch_add(1, Ordering::SeqCst);
	});
	let state = view("w1", "bar()\nb", 7);

	assert_eq!(pyhint.request_completion(&state), Query::Pending);
	pump_until(&pump, || ready.load(Ordering::SeqCst) == 1);

	// `bar` occurs in the buffer, `foo` does not.
	let Query::Ready(items) = pyhint.request_completion(&state) else {
		panic!("expected cached completions");
	};
	let inserts: Vec<&str> = items.iter().map(|c| c.insert.as_str()).collect();
	assert_eq!(inserts, ["bar", "foo"]);

	// Consumed: asking again starts over.
	assert_eq!(pyhint.request_completion(&state), Query::Pending);
}

#[test]
fn funcargs_respects_the_argument_mode() {
	let (pyhint, pump, launcher) = setup(None, ClientConfig::default());
	pyhint.set_session_config(
		&"off".into(),
		ClientConfig {
			complete_funcargs: ArgumentMode::Off,
			..ClientConfig::default()
		},
	);

	let disabled = slot();
	let sink = Arc::clone(&disabled);
	pyhint.request_funcargs(&view("off", "f(", 2), move |snippet| *sink.lock() = Some(snippet));
	pump_until(&pump, || disabled.lock().is_some());
	assert_eq!(disabled.lock().take().unwrap(), None);
	assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);

	let enabled = slot();
	let sink = Arc::clone(&enabled);
	pyhint.request_funcargs(&view("on", "f(", 2), move |snippet| *sink.lock() = Some(snippet));
	pump_until(&pump, || enabled.lock().is_some());
	assert_eq!(enabled.lock().take().unwrap().as_deref(), Some("${1:a}, b=${2:2}"));
}

#[test]
fn configuration_errors_are_shown_once_per_session() {
	let err: Error = ConfigError::MissingInterpreter("/nope/python".into()).into();
	let (pyhint, pump, launcher) = setup(Some(err), ClientConfig::default());
	let shown = Arc::new(parking_lot::Mutex::new(Vec::new()));
	let sink = Arc::clone(&shown);
	let pyhint = pyhint.with_status_sink(move |session: &SessionId, message: &str| {
		sink.lock().push((session.to_string(), message.to_owned()));
	});

	let answers = Arc::new(AtomicUsize::new(0));
	for _ in 0..3 {
		let counter = Arc::clone(&answers);
		pyhint.request_goto(&view("w1", "x", 1), move |locations| {
			assert!(locations.is_empty());
			counter.fetch_add(1, Ordering::SeqCst);
		});
		pump_until(&pump, || answers.load(Ordering::SeqCst) > 0);
	}
	pump_until(&pump, || answers.load(Ordering::SeqCst) == 3);

	let shown = shown.lock();
	assert_eq!(shown.len(), 1);
	assert_eq!(shown[0].0, "w1");
	assert!(shown[0].1.contains("/nope/python"), "{}", shown[0].1);
	// The failed construction is remembered, not retried.
	assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
}

#[test]
fn slow_session_does_not_hold_up_another() {
	let (pyhint, pump, _) = setup(None, ClientConfig::default());
	let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

	let sink = Arc::clone(&order);
	pyhint.request_docstring(&view("w1", "slow", 1), move |_| sink.lock().push("w1"));
	let sink = Arc::clone(&order);
	pyhint.request_docstring(&view("w2", "fast", 1), move |_| sink.lock().push("w2"));
	pump_until(&pump, || order.lock().len() == 2);

	assert_eq!(*order.lock(), ["w2", "w1"]);
}

#[test]
fn close_session_retires_the_worker() {
	let (pyhint, pump, launcher) = setup(None, ClientConfig::default());
	let done = slot();
	let sink = Arc::clone(&done);
	pyhint.request_docstring(&view("w1", "a", 1), move |doc| *sink.lock() = Some(doc));
	pump_until(&pump, || done.lock().is_some());
	assert!(pyhint.registry().get(&"w1".into()).is_some());

	pyhint.close_session(&"w1".into());
	assert!(pyhint.registry().get(&"w1".into()).is_none());

	let again = slot();
	let sink = Arc::clone(&again);
	pyhint.request_docstring(&view("w1", "a", 1), move |doc| *sink.lock() = Some(doc));
	pump_until(&pump, || again.lock().is_some());
	assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
}

#[test]
fn relative_paths_strip_the_first_matching_folder() {
	let folders = [PathBuf::from("/home/u/proj"), PathBuf::from("/home/u")];

	assert_eq!(to_relative_path("/home/u/proj/pkg/mod.py", &folders), "pkg/mod.py");
	assert_eq!(to_relative_path("/home/u/other.py", &folders), "other.py");
	assert_eq!(to_relative_path("/usr/lib/python3/os.py", &folders), "/usr/lib/python3/os.py");
	assert_eq!(to_relative_path("/home/u/project2/x.py", &folders[..1]), "/home/u/project2/x.py");
}

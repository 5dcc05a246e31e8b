use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use super::*;

type Dispatched = Arc<Mutex<Vec<(u64, usize)>>>;

fn at(offset: usize) -> Cursor {
	Cursor::new(ViewId(1), offset)
}

fn recorder(dispatched: &Dispatched, offset: usize) -> impl FnOnce(u64) + Send + 'static {
	let dispatched = Arc::clone(dispatched);
	move |generation| dispatched.lock().push((generation, offset))
}

fn items(names: &[&str]) -> Vec<Completion> {
	names.iter().map(|name| Completion::new(format!("{name}\tfunction"), *name)).collect()
}

#[tokio::test(start_paused = true)]
async fn burst_of_triggers_dispatches_only_the_last() {
	let guard = CompletionGuard::new(Duration::from_millis(150));
	let dispatched = Dispatched::default();

	for offset in 1..=5 {
		assert_eq!(guard.query(at(offset), recorder(&dispatched, offset)), Query::Pending);
		tokio::time::sleep(Duration::from_millis(30)).await;
	}
	assert!(dispatched.lock().is_empty());

	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(*dispatched.lock(), [(5, 5)]);
	assert_eq!(guard.state(), GuardState::Awaiting(at(5)));
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_a_pending_dispatch() {
	let guard = CompletionGuard::new(Duration::from_millis(150));
	let dispatched = Dispatched::default();

	guard.query(at(3), recorder(&dispatched, 3));
	guard.reset();
	tokio::time::sleep(Duration::from_millis(500)).await;

	assert!(dispatched.lock().is_empty());
	assert_eq!(guard.state(), GuardState::Idle);
}

#[test]
fn answer_then_second_query_consumes_the_cache() {
	let fired = Arc::new(Mutex::new(Vec::new()));
	let hook_fired = Arc::clone(&fired);
	let guard = CompletionGuard::new(Duration::ZERO).with_ready_hook(move |cursor| hook_fired.lock().push(cursor));
	let dispatched = Dispatched::default();

	assert_eq!(guard.query(at(10), recorder(&dispatched, 10)), Query::Pending);
	assert_eq!(*dispatched.lock(), [(1, 10)]);

	assert!(guard.on_response(1, items(&["foo"])));
	assert_eq!(*fired.lock(), [at(10)]);
	assert_eq!(guard.state(), GuardState::Ready(at(10), items(&["foo"])));

	assert_eq!(guard.query(at(10), recorder(&dispatched, 10)), Query::Ready(items(&["foo"])));
	assert_eq!(guard.state(), GuardState::Idle);
	assert_eq!(dispatched.lock().len(), 1);
}

#[test]
fn superseded_answer_never_reaches_the_ui() {
	let readies = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&readies);
	let guard = CompletionGuard::new(Duration::ZERO).with_ready_hook(move |_| {
		counter.fetch_add(1, Ordering::SeqCst);
	});
	let dispatched = Dispatched::default();

	guard.query(at(4), recorder(&dispatched, 4));
	guard.query(at(5), recorder(&dispatched, 5));
	assert_eq!(*dispatched.lock(), [(1, 4), (2, 5)]);

	assert!(!guard.on_response(1, items(&["stale"])));
	assert_eq!(guard.state(), GuardState::Awaiting(at(5)));
	assert_eq!(readies.load(Ordering::SeqCst), 0);

	assert!(guard.on_response(2, items(&["fresh"])));
	assert_eq!(guard.state(), GuardState::Ready(at(5), items(&["fresh"])));
	assert_eq!(readies.load(Ordering::SeqCst), 1);
}

#[test]
fn repeated_query_at_the_awaited_cursor_does_not_redispatch() {
	let guard = CompletionGuard::new(Duration::ZERO);
	let dispatched = Dispatched::default();

	guard.query(at(7), recorder(&dispatched, 7));
	assert_eq!(guard.query(at(7), recorder(&dispatched, 7)), Query::Pending);

	assert_eq!(dispatched.lock().len(), 1);
}

#[test]
fn ready_result_for_another_cursor_is_a_cache_miss() {
	let guard = CompletionGuard::new(Duration::ZERO);
	let dispatched = Dispatched::default();

	guard.query(at(1), recorder(&dispatched, 1));
	guard.on_response(1, items(&["old"]));

	assert_eq!(guard.query(at(2), recorder(&dispatched, 2)), Query::Pending);
	assert_eq!(guard.state(), GuardState::Awaiting(at(2)));
	assert_eq!(*dispatched.lock(), [(1, 1), (2, 2)]);
	assert_eq!(guard.generation(), 2);
}

#[test]
fn late_answer_after_consumption_is_discarded() {
	let guard = CompletionGuard::new(Duration::ZERO);
	let dispatched = Dispatched::default();

	guard.query(at(1), recorder(&dispatched, 1));
	assert!(guard.on_response(1, items(&["a"])));
	assert!(!guard.on_response(1, items(&["a"])));
	guard.query(at(1), recorder(&dispatched, 1));

	assert!(!guard.on_response(1, items(&["again"])));
	assert_eq!(guard.state(), GuardState::Idle);
}

#[test]
fn failure_returns_to_idle_only_for_the_current_generation() {
	let guard = CompletionGuard::new(Duration::ZERO);
	let dispatched = Dispatched::default();

	guard.query(at(1), recorder(&dispatched, 1));
	guard.query(at(2), recorder(&dispatched, 2));

	assert!(!guard.on_failure(1));
	assert_eq!(guard.state(), GuardState::Awaiting(at(2)));
	assert!(guard.on_failure(2));
	assert_eq!(guard.state(), GuardState::Idle);
}

#[test]
fn ranking_prefers_frequent_then_public_then_alphabetical() {
	let buffer = "foo(); foo(); bar(); zed(); _private(); __dunder__()";
	let mut completions = items(&["zed", "apple", "__dunder__", "foo", "_private", "bar"]);

	rank_completions(&mut completions, buffer);

	let order: Vec<&str> = completions.iter().map(|c| c.insert.as_str()).collect();
	assert_eq!(order, ["foo", "bar", "zed", "_private", "__dunder__", "apple"]);
}

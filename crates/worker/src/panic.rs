use std::any::Any;

use tokio::task::JoinError;

/// Renders a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		(*s).to_owned()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_owned()
	}
}

/// Returns the panic message of a failed task, or `None` if it was cancelled.
pub fn join_error_panic_message(err: JoinError) -> Option<String> {
	if !err.is_panic() {
		return None;
	}
	let payload = err.into_panic();
	Some(panic_message(payload.as_ref()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{TaskClass, spawn, spawn_blocking};

	#[test]
	fn renders_str_string_and_opaque_payloads() {
		let literal = std::panic::catch_unwind(|| panic!("analyzer blew up")).unwrap_err();
		assert_eq!(panic_message(literal.as_ref()), "analyzer blew up");

		let formatted = std::panic::catch_unwind(|| panic!("line {}", 7)).unwrap_err();
		assert_eq!(panic_message(formatted.as_ref()), "line 7");

		let opaque = std::panic::catch_unwind(|| std::panic::panic_any(42u32)).unwrap_err();
		assert_eq!(panic_message(opaque.as_ref()), "non-string panic payload");
	}

	#[tokio::test]
	async fn blocking_analysis_panic_is_reported() {
		let err = spawn_blocking::<_, ()>(TaskClass::Analysis, || panic!("bad source")).await.unwrap_err();
		assert_eq!(join_error_panic_message(err).as_deref(), Some("bad source"));
	}

	#[tokio::test]
	async fn aborted_background_task_is_not_a_panic() {
		let handle = spawn(TaskClass::Background, std::future::pending::<()>());
		handle.abort();
		let err = handle.await.unwrap_err();
		assert!(err.is_cancelled());
		assert_eq!(join_error_panic_message(err), None);
	}
}

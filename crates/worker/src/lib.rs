//! Execution primitives shared by pyhint clients and daemons.
//!
//! The editor owns a single cooperative UI loop that must never block. Work
//! leaves that loop through [`Dispatcher::run_off_thread`] or a
//! [`SerialExecutor`], and results come back through
//! [`Dispatcher::run_on_ui_thread`], which queues callbacks for the loop to
//! drain with [`UiPump::pump`].

mod class;
mod dispatch;
mod executor;
mod panic;
mod spawn;
mod token;

pub use class::TaskClass;
pub use dispatch::{Dispatcher, UiPump, UiTask};
pub use executor::{ExecutorClosed, SerialExecutor};
pub use panic::{join_error_panic_message, panic_message};
pub use spawn::{runtime_handle, spawn, spawn_blocking, spawn_named_thread};
pub use token::GenerationClock;

//! Subprocess side of pyhint.
//!
//! A daemon binary links its analysis backend, calls [`init_stderr_logging`]
//! and hands its stdin/stdout to [`serve`]:
//!
//! ```ignore
//! pyhint_daemon::init_stderr_logging("info")?;
//! let facade = Facade::new(MyBackend::new(&sys_path), ArgumentMode::All);
//! let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//! pyhint_daemon::serve(&facade, stdin, tokio::io::stdout()).await?;
//! ```

mod log;
mod serve;

pub use log::{JsonLogLayer, init_stderr_logging};
pub use serve::serve;

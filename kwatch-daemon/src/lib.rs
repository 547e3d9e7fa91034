//! Watch runtime: dispatcher, lifecycle controller and process plumbing.

pub mod dispatcher;
mod error;
pub mod lifecycle;
mod logging;
mod runtime;
pub mod settings;

pub use dispatcher::{dispatch, format_event, Dispatched};
pub use error::DaemonError;
pub use lifecycle::{run_until, start, wait_for_shutdown, ShutdownReport, WatchHandle};
pub use logging::{init_tracing, LogFormat};
pub use runtime::{run, start_blocking};
pub use settings::WatchSettings;

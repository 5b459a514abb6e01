//! # respawn-daemon
//!
//! Daemon lifecycle toolkit for Rust CLIs.
//!
//! Turns a handler or an external command into a background service by
//! re-executing the current binary as a detached session leader. Ships the
//! pieces around it: pidfiles, output capture with failure dumps, a signal
//! queue and panic-contained restart loops.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use respawn_daemon::{Daemon, DaemonConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> respawn_daemon::Result<()> {
//! let mut daemon = Daemon::from_config(DaemonConfig::default().with_pidfile("/tmp/app.pid"));
//! daemon.handle_fn(|| async {
//!     loop {
//!         tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     }
//! });
//! respawn_daemon::run(&mut daemon).await
//! # }
//! ```

pub mod capture;
#[cfg(feature = "clap")]
pub mod clap;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod global;
pub mod handler;
pub mod pidfile;
pub mod process;
pub mod role;
pub mod run;
pub mod signals;

pub use capture::OutputCapture;
pub use config::DaemonConfig;
pub use control::{status, stop, InstanceStatus};
pub use daemon::{run, Daemon, Event, Generation, LaunchOutcome, SinkServer};
pub use error::{BoxError, Error, Result};
pub use global::{daemon_command, daemon_handle, daemon_handle_fn, default_daemon, init_default};
pub use handler::{Handler, HandlerFn};
pub use pidfile::PidFile;
pub use process::{CommandSpec, ProcessHandle};
pub use role::{DaemonRole, Role, SupervisorRole};
pub use run::{run_forever, run_guarded, run_once};
pub use signals::{SignalQueue, TERMINATION_SIGNALS};

//! # respawn
//!
//! Process supervisor for Rust CLIs.
//!
//! Daemonizes through [`respawn_daemon`], then keeps a worker copy of the
//! binary alive: commands are restarted when they crash, a handler is served
//! once per worker, and a foreground run gets an interactive login shell.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use respawn::{Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> respawn_daemon::Result<()> {
//! let mut sup = Supervisor::from_config(SupervisorConfig::default())?;
//! sup.add_command("redis-server", ["--port", "6380"])?;
//! respawn_daemon::run(&mut sup).await
//! # }
//! ```

pub mod config;
pub mod global;
pub mod supervisor;

pub use config::{load_config, CommandEntry, SupervisorConfig};
pub use global::{
	default_supervisor, init_default, supervisor_add_command, supervisor_handle,
	supervisor_handle_fn,
};
pub use supervisor::Supervisor;

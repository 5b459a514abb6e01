use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};

use crate::config::DaemonConfig;
use crate::control::{self, InstanceStatus};

/// Daemonization flags shared by every binary built on this crate.
#[derive(Debug, Clone, Default, Args)]
pub struct DaemonArgs {
	/// Record the running pid in this file
	#[arg(long, value_name = "PATH")]
	pub pidfile: Option<PathBuf>,
	/// Stay in the foreground instead of daemonizing
	#[arg(short, long)]
	pub foreground: bool,
	/// Capture daemon output in this file
	#[arg(long, value_name = "PATH")]
	pub log_file: Option<PathBuf>,
}

impl DaemonArgs {
	/// Overrides `config` with every flag that was given.
	pub fn apply(&self, config: &mut DaemonConfig) {
		if let Some(path) = &self.pidfile {
			config.pidfile = Some(path.clone());
		}
		if self.foreground {
			config.foreground = true;
		}
		if let Some(path) = &self.log_file {
			config.log_file = Some(path.clone());
		}
	}
}

#[derive(Debug, Subcommand)]
pub enum ControlCommand {
	/// Show whether the daemon is running
	Status,
	/// Stop the running daemon
	Stop,
}

impl ControlCommand {
	pub fn execute(&self, pidfile: &Path) {
		match self {
			ControlCommand::Status => match control::status(pidfile) {
				Ok(InstanceStatus::Running { pid }) => eprintln!("daemon running (pid {})", pid),
				Ok(InstanceStatus::Stale { pid }) => {
					eprintln!("daemon not running (stale pid {} in {})", pid, pidfile.display())
				}
				Ok(InstanceStatus::NotRunning) => eprintln!("daemon not running"),
				Err(e) => {
					eprintln!("error: {}", e);
					std::process::exit(1);
				}
			},
			ControlCommand::Stop => match control::stop(pidfile) {
				Ok(pid) => eprintln!("daemon stopped (pid {})", pid),
				Err(e) => {
					eprintln!("{}", e);
					std::process::exit(1);
				}
			},
		}
	}
}

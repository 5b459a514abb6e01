use std::path::Path;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::pidfile::{is_alive, read_pid};

/// What a pidfile says about the instance it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstanceStatus {
	Running { pid: i32 },
	/// The pidfile names a process that no longer exists.
	Stale { pid: i32 },
	NotRunning,
}

impl InstanceStatus {
	pub fn is_running(&self) -> bool {
		matches!(self, InstanceStatus::Running { .. })
	}
}

pub fn status(pidfile: &Path) -> Result<InstanceStatus> {
	match read_pid(pidfile) {
		Ok(pid) if is_alive(pid) => Ok(InstanceStatus::Running { pid: pid.as_raw() }),
		Ok(pid) => Ok(InstanceStatus::Stale { pid: pid.as_raw() }),
		Err(Error::PidFileNotFound(_)) => Ok(InstanceStatus::NotRunning),
		Err(e) => Err(e),
	}
}

/// Sends SIGTERM to the instance recorded in `pidfile` and returns its pid.
/// The instance removes its own pidfile on the way out.
pub fn stop(pidfile: &Path) -> Result<Pid> {
	let pid = read_pid(pidfile)?;
	if !is_alive(pid) {
		return Err(Error::config(format!(
			"pid {} from {} is not running",
			pid,
			pidfile.display()
		)));
	}
	kill(pid, Signal::SIGTERM)?;
	tracing::info!("sent SIGTERM to pid {}", pid);
	Ok(pid)
}

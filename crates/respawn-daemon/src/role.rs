//! Generation roles carried across re-execution in environment variables.
//!
//! A process learns which generation it is from a single variable set by its
//! parent. The generation that reads a role clears it, so a later re-exec
//! starts the state machine fresh.

use crate::error::{Error, Result};

pub const DAEMON_ROLE_VAR: &str = "RESPAWN_DAEMON_ROLE";
pub const SUPERVISOR_ROLE_VAR: &str = "RESPAWN_SUPERVISOR_ROLE";

/// Role of a process spawned by the daemon launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonRole {
	/// The backgrounded process after the fork emulation.
	Child,
}

/// Role of a process spawned by the supervisor monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorRole {
	/// The generation that executes user logic.
	Worker,
}

pub trait Role: Sized + Copy {
	const VAR: &'static str;

	fn as_str(self) -> &'static str;

	fn parse(value: &str) -> Result<Self>;

	/// Reads the role of the current process. An unset or empty variable
	/// means no role was handed down.
	fn from_env() -> Result<Option<Self>> {
		match std::env::var(Self::VAR) {
			Ok(value) if value.is_empty() => Ok(None),
			Ok(value) => Self::parse(&value).map(Some),
			Err(std::env::VarError::NotPresent) => Ok(None),
			Err(std::env::VarError::NotUnicode(raw)) => Err(Error::UnknownRole {
				var: Self::VAR,
				value: raw.to_string_lossy().into_owned(),
			}),
		}
	}

	/// Removes the role from this process's environment so children do not
	/// inherit it.
	fn clear() {
		std::env::remove_var(Self::VAR);
	}
}

impl Role for DaemonRole {
	const VAR: &'static str = DAEMON_ROLE_VAR;

	fn as_str(self) -> &'static str {
		match self {
			DaemonRole::Child => "child",
		}
	}

	fn parse(value: &str) -> Result<Self> {
		match value {
			"child" => Ok(DaemonRole::Child),
			other => Err(Error::UnknownRole {
				var: Self::VAR,
				value: other.to_string(),
			}),
		}
	}
}

impl Role for SupervisorRole {
	const VAR: &'static str = SUPERVISOR_ROLE_VAR;

	fn as_str(self) -> &'static str {
		match self {
			SupervisorRole::Worker => "worker",
		}
	}

	fn parse(value: &str) -> Result<Self> {
		match value {
			"worker" => Ok(SupervisorRole::Worker),
			other => Err(Error::UnknownRole {
				var: Self::VAR,
				value: other.to_string(),
			}),
		}
	}
}

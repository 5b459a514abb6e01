use respawn_daemon::{DaemonConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ── Supervisor config (respawn.toml) ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
	#[serde(default)]
	pub daemon: DaemonConfig,
	/// Program and arguments of the login shell offered in the foreground.
	#[serde(default = "default_shell")]
	pub shell: Vec<String>,
	#[serde(default = "default_true")]
	pub interactive_shell: bool,
	#[serde(default)]
	pub commands: Vec<CommandEntry>,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			daemon: DaemonConfig::default(),
			shell: default_shell(),
			interactive_shell: true,
			commands: Vec::new(),
		}
	}
}

fn default_shell() -> Vec<String> {
	vec!["/bin/bash".to_string(), "-l".to_string()]
}

fn default_true() -> bool { true }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
	pub name: String,
	#[serde(default)]
	pub args: Vec<String>,
}

/// Reads a supervisor config. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<SupervisorConfig> {
	let content = match std::fs::read_to_string(path) {
		Ok(c) => c,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SupervisorConfig::default()),
		Err(e) => return Err(Error::config(format!("failed to read {}: {}", path.display(), e))),
	};
	parse_config(&content).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
}

pub fn parse_config(content: &str) -> std::result::Result<SupervisorConfig, toml::de::Error> {
	toml::from_str(content)
}

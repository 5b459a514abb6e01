use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Daemonization settings, usually read from the `[daemon]` table of a
/// config file and then overridden from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
	/// Where the active instance records its pid. No pidfile if unset.
	#[serde(default)]
	pub pidfile: Option<PathBuf>,
	/// Run inline without forking.
	#[serde(default)]
	pub foreground: bool,
	/// Output capture for the background child. Defaults to
	/// `/tmp/<binary-name>.log`.
	#[serde(default)]
	pub log_file: Option<PathBuf>,
}

impl DaemonConfig {
	pub fn foreground() -> Self {
		Self {
			foreground: true,
			..Self::default()
		}
	}

	pub fn with_pidfile(mut self, path: impl Into<PathBuf>) -> Self {
		self.pidfile = Some(path.into());
		self
	}

	pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.log_file = Some(path.into());
		self
	}
}

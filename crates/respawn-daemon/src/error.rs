use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use nix::unistd::Pid;

/// Boxed error returned by caller-supplied handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors from daemonization, pidfile and supervision operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Conflicting or missing handler/command registration.
	#[error("configuration error: {0}")]
	Config(String),
	/// Pidfile, log file or spawn failure.
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("pidfile {} not found", .0.display())]
	PidFileNotFound(PathBuf),
	/// The pidfile is too big to hold a pid and is not parsed.
	#[error("pidfile {} is too large ({size} bytes)", .path.display())]
	FileTooLarge { path: PathBuf, size: u64 },
	#[error("pidfile {} holds an invalid pid: {content:?}", .path.display())]
	InvalidPid { path: PathBuf, content: String },
	#[error("already running as pid {pid} (pidfile {})", .path.display())]
	AlreadyRunning { path: PathBuf, pid: Pid },
	/// Start was attempted on a handle that was explicitly stopped.
	#[error("explicit closed")]
	Closed,
	#[error("{name} exited with {status}")]
	Exited { name: String, status: ExitStatus },
	/// A recovered panic, carrying the panic message.
	#[error("{0}")]
	Panic(String),
	/// A role variable held a value no generation understands.
	#[error("critical error, unknown mode {value:?} in {var}")]
	UnknownRole { var: &'static str, value: String },
	#[error("{0}")]
	Handler(BoxError),
	#[error("signal error: {0}")]
	Signal(#[from] nix::Error),
}

impl Error {
	pub fn config(msg: impl Into<String>) -> Self {
		Error::Config(msg.into())
	}

	/// True for errors recovered from a panicking routine.
	pub fn is_panic(&self) -> bool {
		matches!(self, Error::Panic(_))
	}

	pub fn is_closed(&self) -> bool {
		matches!(self, Error::Closed)
	}

	pub fn is_not_found(&self) -> bool {
		match self {
			Error::PidFileNotFound(_) => true,
			Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn panic_displays_bare_message() {
		let err = Error::Panic("boom".into());
		assert_eq!(err.to_string(), "boom");
		assert!(err.is_panic());
		assert!(!err.is_closed());
	}

	#[test]
	fn not_found_covers_io_kind() {
		let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
		assert!(err.is_not_found());
		assert!(Error::PidFileNotFound("/tmp/x.pid".into()).is_not_found());
		assert!(!Error::Closed.is_not_found());
	}
}

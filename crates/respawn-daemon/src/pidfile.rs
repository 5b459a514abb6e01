use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Pidfiles at or above this size are treated as corrupt.
pub const MAX_PIDFILE_SIZE: u64 = 8;

/// Records the current process id at `path`.
///
/// The pid is written to a sibling temp file and renamed into place, so a
/// reader never sees a partial write.
pub fn write_pid(path: &Path) -> Result<()> {
	let tmp = path.with_extension(format!("pid.{}.tmp", std::process::id()));
	fs::write(&tmp, std::process::id().to_string())?;
	if let Err(e) = fs::rename(&tmp, path) {
		let _ = fs::remove_file(&tmp);
		return Err(e.into());
	}
	Ok(())
}

/// Reads the pid recorded at `path`.
pub fn read_pid(path: &Path) -> Result<Pid> {
	let mut file = match File::open(path) {
		Ok(f) => f,
		Err(e) if e.kind() == io::ErrorKind::NotFound => {
			return Err(Error::PidFileNotFound(path.to_path_buf()))
		}
		Err(e) => return Err(e.into()),
	};

	let size = file.metadata()?.len();
	if size >= MAX_PIDFILE_SIZE {
		return Err(Error::FileTooLarge {
			path: path.to_path_buf(),
			size,
		});
	}

	let mut content = String::new();
	file.read_to_string(&mut content)?;
	match content.trim().parse::<i32>() {
		Ok(pid) => Ok(Pid::from_raw(pid)),
		Err(_) => Err(Error::InvalidPid {
			path: path.to_path_buf(),
			content,
		}),
	}
}

/// Checks `pid` with the null signal. Only "no such process" counts as dead;
/// a process we may not signal is still alive.
pub fn is_alive(pid: Pid) -> bool {
	if pid.as_raw() <= 0 {
		return false;
	}
	!matches!(kill(pid, None::<Signal>), Err(Errno::ESRCH))
}

/// Fails with [`Error::AlreadyRunning`] if `path` names a live process other
/// than this one. Missing and stale pidfiles pass.
///
/// The check is advisory: two instances starting in the same window can both
/// pass it before either writes.
pub fn ensure_not_running(path: &Path) -> Result<()> {
	match read_pid(path) {
		Ok(pid) if pid == Pid::this() => Ok(()),
		Ok(pid) if is_alive(pid) => Err(Error::AlreadyRunning {
			path: path.to_path_buf(),
			pid,
		}),
		Ok(pid) => {
			tracing::info!("stale pidfile {} (pid {}), overwriting", path.display(), pid);
			Ok(())
		}
		Err(Error::PidFileNotFound(_)) => Ok(()),
		Err(e) => Err(e),
	}
}

/// A pidfile owned by one generation: written at most once and removed only
/// if this generation wrote it.
#[derive(Debug, Clone)]
pub struct PidFile {
	path: PathBuf,
	written: bool,
}

impl PidFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			written: false,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Checks the parent directory exists and makes the path absolute, since
	/// a background generation changes its working directory to `/`.
	pub fn prepare(&mut self) -> Result<()> {
		let parent = match self.path.parent() {
			Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
			_ => PathBuf::from("."),
		};
		if !parent.is_dir() {
			return Err(io::Error::new(
				io::ErrorKind::NotFound,
				format!("pidfile directory {} does not exist", parent.display()),
			)
			.into());
		}
		if self.path.is_relative() {
			self.path = std::env::current_dir()?.join(&self.path);
		}
		Ok(())
	}

	pub fn ensure_not_running(&self) -> Result<()> {
		ensure_not_running(&self.path)
	}

	pub fn write(&mut self) -> Result<()> {
		if self.written {
			return Ok(());
		}
		write_pid(&self.path)?;
		self.written = true;
		tracing::debug!("wrote pid {} to {}", std::process::id(), self.path.display());
		Ok(())
	}

	pub fn is_written(&self) -> bool {
		self.written
	}

	/// Removes the pidfile if this generation wrote it. Failures are logged,
	/// never returned: removal happens on the way out.
	pub fn remove(&mut self) {
		if !self.written {
			return;
		}
		self.written = false;
		if let Err(e) = fs::remove_file(&self.path) {
			tracing::error!("failed to remove pidfile {}: {}", self.path.display(), e);
		}
	}
}

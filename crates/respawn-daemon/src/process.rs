use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};

use crate::error::{Error, Result};

/// Bytes consumed from stdin before a terminal-gated start.
const TERMINAL_GATE_BUF: usize = 16;

/// Fallback poll interval if the SIGCHLD stream closes.
const REAP_POLL: Duration = Duration::from_millis(100);

/// A resolved program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
	pub program: PathBuf,
	pub args: Vec<OsString>,
}

impl CommandSpec {
	pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
		}
	}

	/// Like [`CommandSpec::new`], but a bare program name is looked up in
	/// `PATH` up front so a missing binary fails at registration. A relative
	/// path is made absolute, since daemon generations run from `/`.
	pub fn lookup<I, S>(name: &str, args: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		let program = if Path::new(name).components().count() == 1 {
			which::which(name).map_err(|e| {
				Error::Io(io::Error::new(io::ErrorKind::NotFound, format!("{}: {}", name, e)))
			})?
		} else if Path::new(name).is_relative() {
			std::env::current_dir()?.join(name)
		} else {
			PathBuf::from(name)
		};
		Ok(Self::new(program, args))
	}

	/// The running binary with its original arguments.
	pub fn current_exe() -> Result<Self> {
		let program = std::env::current_exe()?;
		Ok(Self::new(program, std::env::args_os().skip(1)))
	}

	pub fn command(&self) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.args(&self.args);
		cmd
	}
}

#[derive(Debug, Default)]
struct HandleState {
	child: Option<Child>,
	closed: bool,
}

/// Thread-safe wrapper around one external process.
///
/// Once [`signal`](ProcessHandle::signal) or [`kill`](ProcessHandle::kill)
/// has been called, every later [`start`](ProcessHandle::start) fails with
/// [`Error::Closed`]. Start checks `closed` and spawns under the same lock
/// signal takes, so a stop can never lose a race against a start. The child
/// is reaped under that lock too, so a signal never reaches a recycled pid.
#[derive(Debug)]
pub struct ProcessHandle {
	spec: CommandSpec,
	state: Mutex<HandleState>,
}

impl ProcessHandle {
	pub fn new<I, S>(name: impl Into<PathBuf>, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		Self::from_spec(CommandSpec::new(name, args))
	}

	pub fn from_spec(spec: CommandSpec) -> Self {
		Self {
			spec,
			state: Mutex::new(HandleState::default()),
		}
	}

	pub fn spec(&self) -> &CommandSpec {
		&self.spec
	}

	pub fn name(&self) -> String {
		self.spec.program.display().to_string()
	}

	pub fn is_closed(&self) -> bool {
		self.lock().closed
	}

	/// Pid of the live process, if one was started and not yet reaped.
	pub fn pid(&self) -> Option<Pid> {
		live_pid(&self.lock())
	}

	fn lock(&self) -> MutexGuard<'_, HandleState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Spawns the process and keeps it in the handle until reaped.
	pub fn start(&self) -> Result<Pid> {
		let mut cmd = self.spec.command();

		let mut state = self.lock();
		if state.closed {
			return Err(Error::Closed);
		}

		let child = cmd.spawn()?;
		let pid = child.id().map(|id| Pid::from_raw(id as i32)).unwrap_or_else(|| Pid::from_raw(0));
		state.child = Some(child);
		Ok(pid)
	}

	/// Marks the handle closed and forwards `sig` to the live process.
	pub fn signal(&self, sig: Signal) {
		let mut state = self.lock();
		state.closed = true;
		if let Some(pid) = live_pid(&state) {
			if let Err(e) = kill(pid, sig) {
				tracing::debug!("failed to signal {} (pid {}): {}", self.name(), pid, e);
			}
		}
	}

	pub fn kill(&self) {
		self.signal(Signal::SIGKILL);
	}

	/// Starts the process and waits for it. A non-zero exit is an error.
	pub async fn run(&self) -> Result<()> {
		self.start()?;
		self.wait().await
	}

	/// Blocks on a short read from stdin, then runs. Keeps an interactive
	/// shell from launching before its terminal is ready.
	pub async fn run_with_terminal_gate(&self) -> Result<()> {
		let mut buf = [0u8; TERMINAL_GATE_BUF];
		let n = tokio::io::stdin().read(&mut buf).await?;
		if n == 0 {
			return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed").into());
		}
		self.run().await
	}

	async fn wait(&self) -> Result<()> {
		let mut sigchld = signal(SignalKind::child())?;
		let status = loop {
			if let Some(status) = self.try_reap()? {
				break status;
			}
			if sigchld.recv().await.is_none() {
				tokio::time::sleep(REAP_POLL).await;
			}
		};
		if status.success() {
			Ok(())
		} else {
			Err(Error::Exited {
				name: self.name(),
				status,
			})
		}
	}

	fn try_reap(&self) -> Result<Option<ExitStatus>> {
		let mut state = self.lock();
		let child = match state.child.as_mut() {
			Some(child) => child,
			None => {
				return Err(io::Error::new(io::ErrorKind::NotFound, "no process to wait for").into())
			}
		};
		match child.try_wait() {
			Ok(None) => Ok(None),
			Ok(Some(status)) => {
				state.child = None;
				Ok(Some(status))
			}
			Err(e) => {
				state.child = None;
				Err(e.into())
			}
		}
	}
}

fn live_pid(state: &HandleState) -> Option<Pid> {
	state
		.child
		.as_ref()
		.and_then(|child| child.id())
		.map(|id| Pid::from_raw(id as i32))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn signal_closes_never_started_handle() {
		let handle = ProcessHandle::new("/nonexistent/binary/that/would/fail", Vec::<String>::new());
		handle.signal(Signal::SIGTERM);
		assert!(handle.is_closed());
		// The spawn would fail with NotFound; Closed proves no spawn happened.
		assert!(matches!(handle.start(), Err(Error::Closed)));
	}

	#[test]
	fn kill_closes_handle() {
		let handle = ProcessHandle::new("true", Vec::<String>::new());
		handle.kill();
		assert!(handle.start().unwrap_err().is_closed());
		assert_eq!(handle.pid(), None);
	}

	#[test]
	fn command_spec_keeps_explicit_paths() {
		let spec = CommandSpec::lookup("/opt/bin/worker", ["--flag"]).unwrap();
		assert_eq!(spec.program, PathBuf::from("/opt/bin/worker"));
		assert_eq!(spec.args, vec![OsString::from("--flag")]);

		let relative = CommandSpec::lookup("./bin/worker", Vec::<String>::new()).unwrap();
		assert!(relative.program.is_absolute());
		assert!(relative.program.ends_with("bin/worker"));
	}

	#[test]
	fn command_spec_resolves_bare_names() {
		let spec = CommandSpec::lookup("sh", ["-c", "true"]).unwrap();
		assert!(spec.program.is_absolute());
		assert!(CommandSpec::lookup("respawn-no-such-binary", Vec::<String>::new()).is_err());
	}

	#[tokio::test]
	async fn run_reports_exit_status() {
		let ok = ProcessHandle::new("sh", ["-c", "exit 0"]);
		assert!(ok.run().await.is_ok());
		assert_eq!(ok.pid(), None);

		let failing = ProcessHandle::new("sh", ["-c", "exit 3"]);
		match failing.run().await {
			Err(Error::Exited { name, status }) => {
				assert_eq!(name, "sh");
				assert_eq!(status.code(), Some(3));
			}
			other => panic!("expected Exited, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn exited_child_keeps_pid_until_reaped() {
		let handle = ProcessHandle::new("true", Vec::<String>::new());
		let pid = handle.start().unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(200)).await;
		// exited but unreaped: the pid is a zombie and cannot be recycled yet
		assert_eq!(handle.pid(), Some(pid));

		handle.wait().await.unwrap();
		assert_eq!(handle.pid(), None);
		handle.signal(Signal::SIGTERM);
		assert!(handle.is_closed());
		assert!(handle.wait().await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn signal_stops_running_process() {
		let handle = std::sync::Arc::new(ProcessHandle::new("sleep", ["30"]));
		let runner = {
			let handle = handle.clone();
			tokio::spawn(async move { handle.run().await })
		};
		for _ in 0..50 {
			if handle.pid().is_some() {
				break;
			}
			tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		}
		assert!(handle.pid().is_some());

		handle.signal(Signal::SIGTERM);
		let result = tokio::time::timeout(std::time::Duration::from_secs(5), runner)
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(result, Err(Error::Exited { .. })));
		assert!(handle.start().unwrap_err().is_closed());
	}
}

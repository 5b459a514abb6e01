use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use respawn_daemon::run::{hold_min_uptime, run_forever, run_guarded};
use respawn_daemon::{
	BoxError, CommandSpec, Daemon, DaemonConfig, Error, Event, Generation, Handler,
	ProcessHandle, Result, Role, SinkServer, SupervisorRole,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SupervisorConfig;

pub const DEFAULT_SHELL: &str = "/bin/bash";

/// How long shutdown waits for supervised tasks to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Keeps a set of commands and an optional handler alive inside a daemon.
///
/// The daemonized process becomes a monitor that only respawns a worker
/// copy of the binary; the worker runs the commands, the handler and, in the
/// foreground, an interactive shell.
pub struct Supervisor {
	daemon: Daemon,
	shell: Arc<ProcessHandle>,
	interactive_shell: bool,
	commands: Vec<Arc<ProcessHandle>>,
	tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
	pub fn new(config: DaemonConfig) -> Self {
		Self {
			daemon: Daemon::from_config(config),
			shell: Arc::new(ProcessHandle::new(DEFAULT_SHELL, ["-l"])),
			interactive_shell: true,
			commands: Vec::new(),
			tasks: Vec::new(),
		}
	}

	pub fn from_config(config: SupervisorConfig) -> Result<Self> {
		let mut sup = Self::new(config.daemon);
		sup.interactive_shell = config.interactive_shell;
		if let Some((program, args)) = config.shell.split_first() {
			sup.set_shell(program, args.iter().cloned());
		}
		for entry in &config.commands {
			sup.add_command(&entry.name, entry.args.iter().cloned())?;
		}
		Ok(sup)
	}

	pub fn daemon(&self) -> &Daemon {
		&self.daemon
	}

	pub fn daemon_mut(&mut self) -> &mut Daemon {
		&mut self.daemon
	}

	pub fn set_shell<I, S>(&mut self, program: impl Into<PathBuf>, args: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<std::ffi::OsString>,
	{
		self.shell = Arc::new(ProcessHandle::new(program, args));
	}

	pub fn set_interactive_shell(&mut self, enabled: bool) {
		self.interactive_shell = enabled;
	}

	pub fn shell(&self) -> &Arc<ProcessHandle> {
		&self.shell
	}

	pub fn commands(&self) -> &[Arc<ProcessHandle>] {
		&self.commands
	}

	/// Registers the handler. Only one handler is allowed.
	pub fn handle<H: Handler>(&mut self, handler: H) -> Result<()> {
		if self.daemon.has_handler() {
			return Err(Error::config("handler already registered"));
		}
		self.daemon.handle(handler);
		Ok(())
	}

	pub fn handle_fn<F, Fut>(&mut self, f: F) -> Result<()>
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
	{
		if self.daemon.has_handler() {
			return Err(Error::config("handler already registered"));
		}
		self.daemon.handle_fn(f);
		Ok(())
	}

	/// Adds a command restarted whenever it exits unsuccessfully.
	pub fn add_command<I, S>(&mut self, name: &str, args: I) -> Result<()>
	where
		I: IntoIterator<Item = S>,
		S: Into<std::ffi::OsString>,
	{
		if name.is_empty() {
			return Err(Error::config("command name is empty"));
		}
		let spec = CommandSpec::lookup(name, args)?;
		self.commands.push(Arc::new(ProcessHandle::from_spec(spec)));
		Ok(())
	}

	fn ensure_work(&self) -> Result<()> {
		if !self.daemon.has_handler() && self.commands.is_empty() {
			return Err(Error::config("handler or command should be specified first"));
		}
		Ok(())
	}

	/// Daemonizes, then splits into monitor and worker. Returns only in the
	/// foreground or in the worker; the launcher and the monitor exit.
	pub async fn sink(&mut self) -> Result<Generation> {
		self.ensure_work()?;

		match SupervisorRole::from_env()? {
			None => {
				let launch_dir = std::env::current_dir()?;
				let generation = self.daemon.sink_into(CommandSpec::current_exe()?).await?;
				if generation == Generation::Foreground {
					return Ok(generation);
				}
				let result = self.supervise(&launch_dir).await;
				self.daemon.remove_pidfile();
				result?;
				std::process::exit(0);
			}
			Some(SupervisorRole::Worker) => {
				SupervisorRole::clear();
				self.daemon.watch_signals()?;
				std::env::set_current_dir("/")?;
				tracing::info!("worker running as pid {}", std::process::id());
				Ok(Generation::Background)
			}
		}
	}

	/// The monitor loop: respawns the worker each time it exits, at most once
	/// per minimum uptime. Returns once SIGTERM was forwarded to the worker.
	async fn supervise(&mut self, launch_dir: &Path) -> Result<()> {
		self.daemon.signals_mut().watch(&[Signal::SIGCHLD])?;
		let exe = CommandSpec::current_exe()?;

		loop {
			let started = Instant::now();
			let mut cmd = exe.command();
			cmd.env(SupervisorRole::VAR, SupervisorRole::Worker.as_str())
				.current_dir(launch_dir);
			let mut worker = cmd.spawn()?;
			let pid = worker.id().map(|id| Pid::from_raw(id as i32));
			tracing::info!("started worker as pid {:?}", pid);

			loop {
				match self.daemon.signals_mut().recv().await {
					Some(Signal::SIGCHLD) => {
						if let Some(status) = worker.try_wait()? {
							tracing::warn!("worker exited with {}", status);
							break;
						}
					}
					Some(Signal::SIGTERM) => {
						if let Some(pid) = pid {
							forward_sigterm(pid);
						}
						return Ok(());
					}
					Some(sig) => tracing::debug!("monitor ignoring {:?}", sig),
					None => return Ok(()),
				}
			}

			let hold = hold_min_uptime(started);
			tokio::pin!(hold);
			loop {
				tokio::select! {
					_ = &mut hold => break,
					sig = self.daemon.signals_mut().recv() => match sig {
						Some(Signal::SIGTERM) | None => return Ok(()),
						Some(sig) => tracing::debug!("monitor ignoring {:?}", sig),
					},
				}
			}
			tracing::info!("restarting worker");
		}
	}

	/// Starts every command under a restart loop, the shell when running in
	/// the foreground, and the handler.
	pub fn serve(&mut self) -> Result<()> {
		self.ensure_work()?;

		for handle in &self.commands {
			let handle = Arc::clone(handle);
			tracing::info!("supervising {}", handle.name());
			self.tasks.push(run_forever(move || {
				let handle = Arc::clone(&handle);
				async move {
					match handle.run().await {
						// stopped on purpose, not crashed
						Err(_) if handle.is_closed() => Err(Error::Closed),
						result => result,
					}
				}
			}));
		}

		if self.daemon.is_foreground() && self.interactive_shell {
			self.tasks.push(spawn_shell(Arc::clone(&self.shell)));
		}

		if self.daemon.has_handler() {
			self.daemon.serve()?;
		}
		Ok(())
	}

	/// Blocks until SIGTERM, then stops the shell, every command and the
	/// handler. A failing handler also ends the wait, with its error.
	pub async fn wait_signal(&mut self) -> Result<()> {
		let result = loop {
			match self.daemon.next_event().await {
				Event::Signal(Signal::SIGTERM) => {
					tracing::info!("captured SIGTERM, exiting..");
					break Ok(());
				}
				Event::Signal(sig) => tracing::info!("ignoring {:?}", sig),
				Event::Served(Ok(())) => tracing::info!("handler finished"),
				Event::Served(Err(e)) => {
					tracing::error!("handler failed: {}", e);
					break Err(e);
				}
			}
		};

		self.shell.signal(Signal::SIGTERM);
		for handle in &self.commands {
			handle.signal(Signal::SIGTERM);
		}
		self.daemon.shutdown().await;

		for task in self.tasks.drain(..) {
			if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
				tracing::debug!("supervised task still running after shutdown");
			}
		}
		result
	}
}

fn forward_sigterm(pid: Pid) {
	match kill(pid, Signal::SIGTERM) {
		Ok(()) => tracing::info!("forwarded SIGTERM to worker {}", pid),
		Err(e) => tracing::error!("failed to signal worker {}: {}", pid, e),
	}
}

/// Relaunches the shell every time it exits, each time after a keypress.
/// Ends when the shell is closed or stdin reaches end of input.
fn spawn_shell(shell: Arc<ProcessHandle>) -> JoinHandle<()> {
	tokio::spawn(async move {
		while !shell.is_closed() {
			let current = Arc::clone(&shell);
			match run_guarded(move || async move { current.run_with_terminal_gate().await }).await {
				Ok(()) => {}
				Err(Error::Closed) => break,
				Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
					tracing::info!("stdin closed, interactive shell disabled");
					break;
				}
				Err(e) => tracing::warn!("shell failed: {}", e),
			}
		}
	})
}

#[async_trait]
impl SinkServer for Supervisor {
	async fn sink(&mut self) -> Result<()> {
		Supervisor::sink(self).await.map(drop)
	}

	async fn serve(&mut self) -> Result<()> {
		Supervisor::serve(self)
	}

	async fn wait_signal(&mut self) -> Result<()> {
		Supervisor::wait_signal(self).await
	}
}

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capture::OutputCapture;
use crate::config::DaemonConfig;
use crate::error::{BoxError, Error, Result};
use crate::handler::{CommandHandler, Handler, HandlerFn};
use crate::pidfile::PidFile;
use crate::process::{CommandSpec, ProcessHandle};
use crate::role::{DaemonRole, Role};
use crate::run::run_once;
use crate::signals::{SignalQueue, TERMINATION_SIGNALS};

/// How long the launcher waits for an immediate startup failure before
/// leaving the child on its own.
pub const LAUNCH_GRACE: Duration = Duration::from_millis(200);

/// The generation [`Daemon::sink`] returned into. The launcher generation
/// never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
	/// No fork happened; the caller runs inline.
	Foreground,
	/// The backgrounded child, detached from the launching terminal.
	Background,
}

/// What the launcher observed before exiting.
#[derive(Debug)]
pub enum LaunchOutcome {
	/// The child was still running when the grace period ran out.
	Detached { pid: u32 },
	/// The child exited within the grace period.
	Exited { pid: u32, status: ExitStatus },
}

/// Something that ends or interrupts a wait.
#[derive(Debug)]
pub enum Event {
	Signal(Signal),
	/// The served handler finished, successfully or not.
	Served(Result<()>),
}

/// Turns a handler or an external command into a background service.
pub struct Daemon {
	config: DaemonConfig,
	pidfile: Option<PidFile>,
	handler: Option<Arc<dyn Handler>>,
	command: Option<CommandSpec>,
	signals: SignalQueue,
	active: Option<Arc<dyn Handler>>,
	serving: Option<JoinHandle<Result<()>>>,
}

impl Daemon {
	pub fn new() -> Self {
		Self::from_config(DaemonConfig::default())
	}

	pub fn from_config(config: DaemonConfig) -> Self {
		Self {
			pidfile: config.pidfile.clone().map(PidFile::new),
			config,
			handler: None,
			command: None,
			signals: SignalQueue::new(),
			active: None,
			serving: None,
		}
	}

	pub fn config(&self) -> &DaemonConfig {
		&self.config
	}

	pub fn is_foreground(&self) -> bool {
		self.config.foreground
	}

	pub fn set_foreground(&mut self, foreground: bool) {
		self.config.foreground = foreground;
	}

	pub fn set_pidfile(&mut self, path: impl Into<std::path::PathBuf>) {
		let path = path.into();
		self.config.pidfile = Some(path.clone());
		self.pidfile = Some(PidFile::new(path));
	}

	pub fn pidfile(&self) -> Option<&PidFile> {
		self.pidfile.as_ref()
	}

	pub fn handle<H: Handler>(&mut self, handler: H) {
		self.handler = Some(Arc::new(handler));
	}

	pub fn handle_fn<F, Fut>(&mut self, f: F)
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
	{
		self.handle(HandlerFn::new(f));
	}

	pub fn has_handler(&self) -> bool {
		self.handler.is_some()
	}

	/// Registers an external command to daemonize instead of a handler. A
	/// bare name is resolved through `PATH`.
	pub fn command<I, S>(&mut self, name: &str, args: I) -> Result<()>
	where
		I: IntoIterator<Item = S>,
		S: Into<std::ffi::OsString>,
	{
		self.command = Some(CommandSpec::lookup(name, args)?);
		Ok(())
	}

	pub fn signals_mut(&mut self) -> &mut SignalQueue {
		&mut self.signals
	}

	/// Pushes a signal into the queue as if the OS delivered it.
	pub fn signal_sender(&self) -> mpsc::UnboundedSender<Signal> {
		self.signals.sender()
	}

	/// The command the background generation runs: this binary again when a
	/// handler is registered, or the registered command.
	pub fn resolve_command(&self) -> Result<CommandSpec> {
		match (&self.handler, &self.command) {
			(Some(_), Some(_)) => Err(Error::config("handler cannot coexist with command")),
			(None, None) => Err(Error::config("handler or command should be specified first")),
			(Some(_), None) => CommandSpec::current_exe(),
			(None, Some(cmd)) => Ok(cmd.clone()),
		}
	}

	/// Routes the termination signals into the queue.
	pub fn watch_signals(&mut self) -> Result<()> {
		self.signals.watch(&TERMINATION_SIGNALS)
	}

	/// Validates the registration and daemonizes. Returns in the foreground
	/// or the background generation; the launcher exits.
	pub async fn sink(&mut self) -> Result<Generation> {
		let cmd = self.resolve_command()?;
		self.sink_into(cmd).await
	}

	/// Daemonizes with `cmd` as the background generation, skipping handler
	/// and command validation.
	pub async fn sink_into(&mut self, cmd: CommandSpec) -> Result<Generation> {
		self.watch_signals()?;

		if let Some(pidfile) = self.pidfile.as_mut() {
			pidfile.prepare()?;
		}

		if self.config.foreground {
			println!("- running as foreground process");
			self.claim_pidfile()?;
			return Ok(Generation::Foreground);
		}

		match DaemonRole::from_env()? {
			None => {
				if let Some(pidfile) = &self.pidfile {
					pidfile.ensure_not_running()?;
				}
				match self.launch(cmd).await {
					Ok(_) => std::process::exit(0),
					Err(e) => {
						eprintln!("error to run in daemon mode - {}", e);
						std::process::exit(1);
					}
				}
			}
			Some(DaemonRole::Child) => {
				DaemonRole::clear();
				std::env::set_current_dir("/")?;
				if let Some(pidfile) = self.pidfile.as_mut() {
					pidfile.write()?;
				}
				tracing::info!("daemon running as pid {}", std::process::id());
				Ok(Generation::Background)
			}
		}
	}

	fn claim_pidfile(&mut self) -> Result<()> {
		if let Some(pidfile) = self.pidfile.as_mut() {
			pidfile.ensure_not_running()?;
			pidfile.write()?;
		}
		Ok(())
	}

	/// Spawns `cmd` as a session leader with the child role, then watches it
	/// for [`LAUNCH_GRACE`]. A child that fails within the grace period has
	/// its captured output dumped to stderr.
	pub async fn launch(&mut self, cmd: CommandSpec) -> Result<LaunchOutcome> {
		self.launch_with(cmd, &mut io::stderr()).await
	}

	/// [`Daemon::launch`] with the failure dump written to `dump`.
	pub async fn launch_with<W: io::Write + Send>(
		&mut self,
		cmd: CommandSpec,
		dump: &mut W,
	) -> Result<LaunchOutcome> {
		self.signals.watch(&[Signal::SIGCHLD])?;

		let mut command = cmd.command();
		command
			.env(DaemonRole::VAR, DaemonRole::Child.as_str())
			.stdin(Stdio::null());
		// SAFETY: setsid is async-signal-safe and touches no parent state.
		unsafe {
			command.pre_exec(|| nix::unistd::setsid().map(drop).map_err(io::Error::from));
		}

		let log_path = self
			.config
			.log_file
			.clone()
			.unwrap_or_else(OutputCapture::default_path);
		let mut capture = OutputCapture::new(log_path);
		match capture.open() {
			Ok(()) => {
				println!("- redirected the output to {}", capture.path().display());
				command.stdout(capture.stdio()?).stderr(capture.stdio()?);
			}
			Err(e) => {
				println!(
					"- failed to create output log file {}: {}",
					capture.path().display(),
					e
				);
			}
		}

		let mut child = command.spawn()?;
		let pid = child.id().unwrap_or(0);
		println!("- started daemon as pid {}", pid);

		let grace = tokio::time::sleep(LAUNCH_GRACE);
		tokio::pin!(grace);
		loop {
			tokio::select! {
				_ = &mut grace => return Ok(LaunchOutcome::Detached { pid }),
				sig = self.signals.recv() => match sig {
					Some(Signal::SIGCHLD) => {
						// may belong to another child of this process
						let status = match child.try_wait()? {
							Some(status) => status,
							None => continue,
						};
						if !status.success() {
							eprintln!("- daemon exited with {}", status);
							if let Err(e) = capture.dump(dump) {
								eprintln!("- failed to read daemon output: {}", e);
							}
						}
						return Ok(LaunchOutcome::Exited { pid, status });
					}
					_ => return Ok(LaunchOutcome::Detached { pid }),
				},
			}
		}
	}

	/// Starts serving the registered handler in the background. A command
	/// daemon running in the foreground serves its command inline.
	pub fn serve(&mut self) -> Result<()> {
		let handler: Arc<dyn Handler> = match (&self.handler, &self.command) {
			(Some(h), None) => Arc::clone(h),
			(None, Some(spec)) => Arc::new(CommandHandler::new(Arc::new(
				ProcessHandle::from_spec(spec.clone()),
			))),
			(Some(_), Some(_)) => return Err(Error::config("handler cannot coexist with command")),
			(None, None) => {
				return Err(Error::config("handler or command should be specified first"))
			}
		};

		let served = Arc::clone(&handler);
		self.serving = Some(run_once(move || async move {
			served.serve().await.map_err(Error::Handler)
		}));
		self.active = Some(handler);
		Ok(())
	}

	/// Waits for the next signal or for the served handler to finish.
	pub async fn next_event(&mut self) -> Event {
		let signals = &mut self.signals;
		let serving = &mut self.serving;
		let event = tokio::select! {
			Some(sig) = signals.recv() => Event::Signal(sig),
			joined = async {
				match serving.as_mut() {
					Some(task) => task.await,
					None => std::future::pending().await,
				}
			} => Event::Served(joined.unwrap_or_else(|e| Err(Error::Panic(e.to_string())))),
		};
		if matches!(event, Event::Served(_)) {
			self.serving = None;
		}
		event
	}

	/// Stops the active handler and removes the pidfile. Errors are logged;
	/// shutdown always completes.
	pub async fn shutdown(&mut self) {
		if let Some(handler) = self.active.take() {
			if let Err(e) = handler.stop().await {
				tracing::error!("failed to stop handler: {}", e);
			}
		}
		self.remove_pidfile();
	}

	pub fn remove_pidfile(&mut self) {
		if let Some(pidfile) = self.pidfile.as_mut() {
			pidfile.remove();
		}
	}

	/// Blocks until a termination signal arrives or the served handler
	/// fails, then shuts down. A handler failure is returned.
	pub async fn wait_signal(&mut self) -> Result<()> {
		let result = loop {
			match self.next_event().await {
				Event::Signal(sig) if TERMINATION_SIGNALS.contains(&sig) => {
					tracing::info!("captured {:?}, exiting..", sig);
					break Ok(());
				}
				Event::Signal(sig) => tracing::debug!("ignoring {:?}", sig),
				Event::Served(Ok(())) => tracing::info!("handler finished"),
				Event::Served(Err(e)) => {
					tracing::error!("handler failed: {}", e);
					break Err(e);
				}
			}
		};
		self.shutdown().await;
		result
	}
}

impl Default for Daemon {
	fn default() -> Self {
		Self::new()
	}
}

/// The three phases every daemon-like server goes through, driven in order
/// by [`run`].
#[async_trait]
pub trait SinkServer: Send {
	async fn sink(&mut self) -> Result<()>;
	async fn serve(&mut self) -> Result<()>;
	async fn wait_signal(&mut self) -> Result<()>;
}

#[async_trait]
impl SinkServer for Daemon {
	async fn sink(&mut self) -> Result<()> {
		Daemon::sink(self).await.map(drop)
	}

	async fn serve(&mut self) -> Result<()> {
		Daemon::serve(self)
	}

	async fn wait_signal(&mut self) -> Result<()> {
		Daemon::wait_signal(self).await
	}
}

/// Runs `server` to completion: sink, serve, then wait for a signal.
pub async fn run<S: SinkServer + ?Sized>(server: &mut S) -> Result<()> {
	server.sink().await?;
	server.serve().await?;
	server.wait_signal().await
}

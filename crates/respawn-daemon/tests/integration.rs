use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getsid, Pid};

use respawn_daemon::{
	status, BoxError, CommandSpec, Daemon, DaemonConfig, Error, Event, Generation, Handler,
	InstanceStatus, LaunchOutcome,
};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_pidfile(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	std::env::temp_dir().join(format!("rsd-{}-{}-{}.pid", std::process::id(), n, name))
}

fn foreground(pidfile: &PathBuf) -> Daemon {
	Daemon::from_config(DaemonConfig::foreground().with_pidfile(pidfile))
}

/// Serves until stopped and records the stop.
struct Blocking {
	stopped: Arc<AtomicBool>,
	notify: tokio::sync::Notify,
}

#[async_trait]
impl Handler for Blocking {
	async fn serve(&self) -> Result<(), BoxError> {
		self.notify.notified().await;
		Ok(())
	}

	async fn stop(&self) -> Result<(), BoxError> {
		self.stopped.store(true, Ordering::SeqCst);
		self.notify.notify_one();
		Ok(())
	}
}

async fn explode() -> Result<(), BoxError> {
	panic!("handler exploded")
}

// --- Registration ---

#[tokio::test]
async fn sink_requires_handler_or_command() {
	let mut daemon = Daemon::from_config(DaemonConfig::foreground());
	let err = daemon.sink().await.unwrap_err();
	assert!(err.to_string().contains("handler or command should be specified first"));
}

#[tokio::test]
async fn handler_and_command_conflict() {
	let mut daemon = Daemon::from_config(DaemonConfig::foreground());
	daemon.handle_fn(|| async { Ok(()) });
	daemon.command("sh", ["-c", "true"]).unwrap();
	let err = daemon.sink().await.unwrap_err();
	assert!(matches!(err, Error::Config(_)));
	assert!(err.to_string().contains("cannot coexist"));
	assert!(matches!(daemon.serve(), Err(Error::Config(_))));
}

#[tokio::test]
async fn missing_command_fails_at_registration() {
	let mut daemon = Daemon::new();
	assert!(daemon.command("respawn-no-such-binary", Vec::<String>::new()).is_err());
	assert!(!daemon.has_handler());
}

// --- Foreground lifecycle ---

#[tokio::test]
async fn foreground_run_writes_and_removes_pidfile() {
	let path = temp_pidfile("fg");
	let stopped = Arc::new(AtomicBool::new(false));
	let mut daemon = foreground(&path);
	daemon.handle(Blocking {
		stopped: stopped.clone(),
		notify: tokio::sync::Notify::new(),
	});

	assert_eq!(daemon.sink().await.unwrap(), Generation::Foreground);
	let pid: u32 = std::fs::read_to_string(&path).unwrap().trim().parse().unwrap();
	assert_eq!(pid, std::process::id());
	assert!(status(&path).unwrap().is_running());

	daemon.serve().unwrap();
	daemon.signal_sender().send(Signal::SIGTERM).unwrap();
	tokio::time::timeout(Duration::from_secs(5), daemon.wait_signal())
		.await
		.unwrap()
		.unwrap();

	assert!(stopped.load(Ordering::SeqCst));
	assert!(!path.exists());
	assert_eq!(status(&path).unwrap(), InstanceStatus::NotRunning);
}

#[tokio::test]
async fn live_pidfile_blocks_second_instance() {
	let path = temp_pidfile("live");
	// pid 1 is always alive and never ours
	std::fs::write(&path, "1").unwrap();

	let mut daemon = foreground(&path);
	daemon.handle_fn(|| async { Ok(()) });
	match daemon.sink().await {
		Err(Error::AlreadyRunning { pid, .. }) => assert_eq!(pid.as_raw(), 1),
		other => panic!("expected AlreadyRunning, got {:?}", other),
	}
	// the pidfile belongs to someone else and must survive
	daemon.remove_pidfile();
	assert!(path.exists());
	std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn handler_failure_ends_wait() {
	let path = temp_pidfile("fail");
	let mut daemon = foreground(&path);
	daemon.handle_fn(|| async { Err::<(), BoxError>("listener closed".into()) });

	daemon.sink().await.unwrap();
	daemon.serve().unwrap();
	let err = tokio::time::timeout(Duration::from_secs(5), daemon.wait_signal())
		.await
		.unwrap()
		.unwrap_err();
	assert_eq!(err.to_string(), "listener closed");
	assert!(!path.exists());
}

#[tokio::test]
async fn handler_panic_is_contained() {
	let path = temp_pidfile("panic");
	let mut daemon = foreground(&path);
	daemon.handle_fn(explode);

	daemon.sink().await.unwrap();
	daemon.serve().unwrap();
	let err = tokio::time::timeout(Duration::from_secs(5), daemon.wait_signal())
		.await
		.unwrap()
		.unwrap_err();
	assert!(err.is_panic());
	assert_eq!(err.to_string(), "handler exploded");
	assert!(!path.exists());
}

#[tokio::test]
async fn finished_handler_keeps_waiting_for_signal() {
	let mut daemon = Daemon::from_config(DaemonConfig::foreground());
	daemon.handle_fn(|| async { Ok(()) });
	daemon.sink().await.unwrap();
	daemon.serve().unwrap();

	let event = tokio::time::timeout(Duration::from_secs(5), daemon.next_event())
		.await
		.unwrap();
	assert!(matches!(event, Event::Served(Ok(()))));

	daemon.signal_sender().send(Signal::SIGUSR2).unwrap();
	daemon.signal_sender().send(Signal::SIGINT).unwrap();
	tokio::time::timeout(Duration::from_secs(5), daemon.wait_signal())
		.await
		.unwrap()
		.unwrap();
}

// --- Command mode ---

#[tokio::test]
async fn foreground_command_is_stopped_on_sigterm() {
	let path = temp_pidfile("cmd");
	let mut daemon = foreground(&path);
	daemon.command("sleep", ["30"]).unwrap();

	assert_eq!(daemon.sink().await.unwrap(), Generation::Foreground);
	daemon.serve().unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	daemon.signal_sender().send(Signal::SIGTERM).unwrap();
	tokio::time::timeout(Duration::from_secs(5), daemon.wait_signal())
		.await
		.unwrap()
		.unwrap();
	assert!(!path.exists());
}

#[tokio::test]
async fn failing_command_is_reported() {
	let mut daemon = Daemon::from_config(DaemonConfig::foreground());
	daemon.command("sh", ["-c", "exit 4"]).unwrap();
	daemon.sink().await.unwrap();
	daemon.serve().unwrap();
	let err = tokio::time::timeout(Duration::from_secs(5), daemon.wait_signal())
		.await
		.unwrap()
		.unwrap_err();
	assert!(err.to_string().contains("exited with"));
}

// --- Launch ---

#[tokio::test]
async fn launch_dumps_output_of_fast_failure() {
	let log = temp_pidfile("launch-fail").with_extension("log");
	let mut daemon = Daemon::from_config(DaemonConfig::default().with_log_file(&log));

	let mut dump = Vec::new();
	let outcome = daemon
		.launch_with(CommandSpec::new("/bin/sh", ["-c", "echo boom; exit 3"]), &mut dump)
		.await
		.unwrap();
	match outcome {
		LaunchOutcome::Exited { status, .. } => assert_eq!(status.code(), Some(3)),
		other => panic!("expected Exited, got {:?}", other),
	}

	let text = String::from_utf8(dump).unwrap();
	assert!(text.starts_with("daemon output:\n"));
	assert!(text.contains("boom"));
	std::fs::remove_file(&log).unwrap();
}

#[tokio::test]
async fn launch_detaches_long_running_child() {
	let log = temp_pidfile("launch-ok").with_extension("log");
	let mut daemon = Daemon::from_config(DaemonConfig::default().with_log_file(&log));

	let mut dump = Vec::new();
	let outcome = daemon
		.launch_with(CommandSpec::new("/bin/sh", ["-c", "echo up; exec sleep 5"]), &mut dump)
		.await
		.unwrap();
	let pid = match outcome {
		LaunchOutcome::Detached { pid } => Pid::from_raw(pid as i32),
		other => panic!("expected Detached, got {:?}", other),
	};
	assert!(dump.is_empty());
	// the child leads its own session
	assert_eq!(getsid(Some(pid)).unwrap(), pid);

	kill(pid, Signal::SIGKILL).unwrap();
	assert!(std::fs::read_to_string(&log).unwrap().contains("up"));
	std::fs::remove_file(&log).unwrap();
}

// --- Run ---

#[tokio::test]
async fn run_drives_all_phases() {
	let mut daemon = Daemon::from_config(DaemonConfig::foreground());
	daemon.handle_fn(|| async { Err::<(), BoxError>("done".into()) });
	let err = respawn_daemon::run(&mut daemon).await.unwrap_err();
	assert!(matches!(err, Error::Handler(_)));
}

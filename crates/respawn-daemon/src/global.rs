use std::future::Future;
use std::sync::OnceLock;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::DaemonConfig;
use crate::daemon::Daemon;
use crate::error::{BoxError, Error, Result};
use crate::handler::Handler;

static DEFAULT: OnceLock<Mutex<Daemon>> = OnceLock::new();

/// Installs the process-wide daemon. Can only be done once.
pub fn init_default(config: DaemonConfig) -> Result<()> {
	DEFAULT
		.set(Mutex::new(Daemon::from_config(config)))
		.map_err(|_| Error::config("default daemon already initialized"))
}

/// Locks the process-wide daemon.
pub async fn default_daemon() -> Result<MutexGuard<'static, Daemon>> {
	match DEFAULT.get() {
		Some(daemon) => Ok(daemon.lock().await),
		None => Err(Error::config("default daemon not initialized")),
	}
}

pub async fn daemon_handle<H: Handler>(handler: H) -> Result<()> {
	default_daemon().await?.handle(handler);
	Ok(())
}

pub async fn daemon_handle_fn<F, Fut>(f: F) -> Result<()>
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
	default_daemon().await?.handle_fn(f);
	Ok(())
}

pub async fn daemon_command(name: &str, args: &[String]) -> Result<()> {
	default_daemon().await?.command(name, args.iter().cloned())
}

#[cfg(test)]
mod tests {
	use super::*;

	// the singleton is shared by every test in this binary, so one test
	// covers the whole lifecycle
	#[tokio::test]
	async fn default_daemon_lifecycle() {
		assert!(default_daemon().await.is_err());

		init_default(DaemonConfig::foreground()).unwrap();
		let again = init_default(DaemonConfig::default()).unwrap_err();
		assert!(matches!(again, Error::Config(_)));

		daemon_handle_fn(|| async { Ok(()) }).await.unwrap();
		let daemon = default_daemon().await.unwrap();
		assert!(daemon.has_handler());
		assert!(daemon.is_foreground());
	}
}

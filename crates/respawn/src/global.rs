use std::future::Future;
use std::sync::OnceLock;

use respawn_daemon::{BoxError, Error, Handler, Result};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::SupervisorConfig;
use crate::supervisor::Supervisor;

static DEFAULT: OnceLock<Mutex<Supervisor>> = OnceLock::new();

/// Installs the process-wide supervisor. Can only be done once.
pub fn init_default(config: SupervisorConfig) -> Result<()> {
	let sup = Supervisor::from_config(config)?;
	DEFAULT
		.set(Mutex::new(sup))
		.map_err(|_| Error::config("default supervisor already initialized"))
}

pub async fn default_supervisor() -> Result<MutexGuard<'static, Supervisor>> {
	match DEFAULT.get() {
		Some(sup) => Ok(sup.lock().await),
		None => Err(Error::config("default supervisor not initialized")),
	}
}

pub async fn supervisor_handle<H: Handler>(handler: H) -> Result<()> {
	default_supervisor().await?.handle(handler)
}

pub async fn supervisor_handle_fn<F, Fut>(f: F) -> Result<()>
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
{
	default_supervisor().await?.handle_fn(f)
}

pub async fn supervisor_add_command(name: &str, args: &[String]) -> Result<()> {
	default_supervisor().await?.add_command(name, args.iter().cloned())
}

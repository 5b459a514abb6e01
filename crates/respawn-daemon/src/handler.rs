use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use nix::sys::signal::Signal;

use crate::error::{BoxError, Error};
use crate::process::ProcessHandle;

/// Caller-supplied unit of work run by a daemon.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
	/// Runs the work. Returning means the work is done; an error means it
	/// failed.
	async fn serve(&self) -> Result<(), BoxError>;

	/// Asks the work to shut down.
	async fn stop(&self) -> Result<(), BoxError>;
}

/// Adapts a plain async routine into a [`Handler`] whose stop is a no-op.
pub struct HandlerFn<F> {
	f: F,
}

impl<F> HandlerFn<F> {
	pub fn new(f: F) -> Self {
		Self { f }
	}
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
	async fn serve(&self) -> Result<(), BoxError> {
		(self.f)().await
	}

	async fn stop(&self) -> Result<(), BoxError> {
		Ok(())
	}
}

/// Serves an external command inline, used when a command-mode daemon runs
/// in the foreground.
pub(crate) struct CommandHandler {
	handle: Arc<ProcessHandle>,
}

impl CommandHandler {
	pub(crate) fn new(handle: Arc<ProcessHandle>) -> Self {
		Self { handle }
	}
}

#[async_trait]
impl Handler for CommandHandler {
	async fn serve(&self) -> Result<(), BoxError> {
		match self.handle.run().await {
			Ok(()) | Err(Error::Closed) => Ok(()),
			Err(e) => Err(Box::new(e)),
		}
	}

	async fn stop(&self) -> Result<(), BoxError> {
		self.handle.signal(Signal::SIGTERM);
		Ok(())
	}
}

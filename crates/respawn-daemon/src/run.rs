//! Execution policies for arbitrary async routines: contain panics, restart
//! forever behind a minimum-uptime guard, or run once in the background.

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{BoxError, Error, Result};

/// A routine that crashes sooner than this after starting is held back until
/// this much time has passed since its start.
pub const MIN_UPTIME: Duration = Duration::from_secs(5);

const BACKOFF_STEP: Duration = Duration::from_secs(1);

/// Runs `routine` inside a panic boundary. A panic becomes [`Error::Panic`];
/// the routine's own error is returned unchanged.
pub async fn run_guarded<F, Fut>(routine: F) -> Result<()>
where
	F: FnOnce() -> Fut,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	match tokio::spawn(routine()).await {
		Ok(result) => result,
		Err(e) if e.is_panic() => {
			let err = panic_error(e.into_panic());
			tracing::error!("recovered panic: {}", err);
			Err(err)
		}
		Err(e) => Err(Error::Panic(e.to_string())),
	}
}

fn panic_error(payload: Box<dyn Any + Send + 'static>) -> Error {
	let payload = match payload.downcast::<&'static str>() {
		Ok(msg) => return Error::Panic(msg.to_string()),
		Err(p) => p,
	};
	let payload = match payload.downcast::<String>() {
		Ok(msg) => return Error::Panic(*msg),
		Err(p) => p,
	};
	let payload = match payload.downcast::<Error>() {
		Ok(err) => return Error::Panic(err.to_string()),
		Err(p) => p,
	};
	match payload.downcast::<BoxError>() {
		Ok(err) => Error::Panic(err.to_string()),
		Err(_) => Error::Panic("unknown panic".to_string()),
	}
}

/// Waits in one-second steps until more than [`MIN_UPTIME`] has passed since
/// `started`. Returns at once for a routine that already ran that long.
pub async fn hold_min_uptime(started: Instant) {
	while started.elapsed() <= MIN_UPTIME {
		tokio::time::sleep(BACKOFF_STEP).await;
	}
}

/// Spawns a loop that restarts `routine` every time it fails.
///
/// A routine returning `Ok` is done and is not restarted. Fast crashes are
/// throttled to one restart per [`MIN_UPTIME`]. A routine failing with
/// [`Error::Closed`] was stopped on purpose and is not restarted either.
pub fn run_forever<F, Fut>(routine: F) -> JoinHandle<()>
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	tokio::spawn(async move {
		loop {
			let started = Instant::now();
			match run_guarded(&routine).await {
				Ok(()) => return,
				Err(Error::Closed) => {
					tracing::debug!("routine closed, not restarting");
					return;
				}
				Err(e) => tracing::warn!("routine failed: {}", e),
			}
			hold_min_uptime(started).await;
			tracing::info!("restarting routine");
		}
	})
}

/// Spawns `routine` once, guarded, with no restart. The handle can be
/// dropped for fire-and-forget use.
pub fn run_once<F, Fut>(routine: F) -> JoinHandle<Result<()>>
where
	F: FnOnce() -> Fut + Send + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	tokio::spawn(async move {
		let result = run_guarded(routine).await;
		if let Err(e) = &result {
			tracing::warn!("routine failed: {}", e);
		}
		result
	})
}

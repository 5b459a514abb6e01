use std::collections::HashSet;

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::error::Result;

/// Signals that end a foreground or background run alike.
pub const TERMINATION_SIGNALS: [Signal; 4] = [
	Signal::SIGHUP,
	Signal::SIGINT,
	Signal::SIGQUIT,
	Signal::SIGTERM,
];

/// One FIFO queue fed by every watched signal.
///
/// Each watched signal gets a forwarding task, so the foreground and the
/// background generations share a single shutdown path.
pub struct SignalQueue {
	tx: mpsc::UnboundedSender<Signal>,
	rx: mpsc::UnboundedReceiver<Signal>,
	watched: HashSet<Signal>,
}

impl SignalQueue {
	pub fn new() -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		Self {
			tx,
			rx,
			watched: HashSet::new(),
		}
	}

	/// Starts forwarding `signals` into the queue. Already watched signals
	/// are skipped. Must be called from within a tokio runtime.
	pub fn watch(&mut self, signals: &[Signal]) -> Result<()> {
		for &sig in signals {
			if self.watched.contains(&sig) {
				continue;
			}
			let mut stream = signal(SignalKind::from_raw(sig as i32))?;
			let tx = self.tx.clone();
			tokio::spawn(async move {
				while stream.recv().await.is_some() {
					if tx.send(sig).is_err() {
						break;
					}
				}
			});
			self.watched.insert(sig);
		}
		Ok(())
	}

	pub fn is_watched(&self, sig: Signal) -> bool {
		self.watched.contains(&sig)
	}

	/// A handle that pushes signals into the queue as if the OS delivered
	/// them.
	pub fn sender(&self) -> mpsc::UnboundedSender<Signal> {
		self.tx.clone()
	}

	/// Next signal in arrival order. The queue holds its own sender, so this
	/// only resolves when a signal arrives.
	pub async fn recv(&mut self) -> Option<Signal> {
		self.rx.recv().await
	}
}

impl Default for SignalQueue {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn injected_signals_arrive_in_order() {
		let mut queue = SignalQueue::new();
		let tx = queue.sender();
		tx.send(Signal::SIGHUP).unwrap();
		tx.send(Signal::SIGTERM).unwrap();
		assert_eq!(queue.recv().await, Some(Signal::SIGHUP));
		assert_eq!(queue.recv().await, Some(Signal::SIGTERM));
	}

	#[tokio::test]
	async fn watch_is_idempotent() {
		let mut queue = SignalQueue::new();
		queue.watch(&[Signal::SIGUSR2]).unwrap();
		queue.watch(&[Signal::SIGUSR2]).unwrap();
		assert!(queue.is_watched(Signal::SIGUSR2));
		assert!(!queue.is_watched(Signal::SIGUSR1));
	}

	#[tokio::test]
	async fn delivered_signal_is_forwarded() {
		let mut queue = SignalQueue::new();
		queue.watch(&[Signal::SIGUSR1]).unwrap();
		nix::sys::signal::raise(Signal::SIGUSR1).unwrap();
		let got = tokio::time::timeout(std::time::Duration::from_secs(5), queue.recv())
			.await
			.unwrap();
		assert_eq!(got, Some(Signal::SIGUSR1));
	}
}

//! Stop signal for [`MixingSession::run`](crate::MixingSession::run).
//!
//! A host may run several mixing loops (one per wallet) next to its own
//! tasks. Each loop holds a receiver; once the stop fires it finishes the
//! current tick, stops mixing so the double-spend cooldown starts, and
//! returns. The reason travels with the signal so the loop can log it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// The host asked for it, e.g. the wallet is being closed.
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
            Self::Requested => "requested",
        })
    }
}

/// Hands one stop signal to every mixing loop subscribed to it.
pub struct ShutdownController {
    tx: broadcast::Sender<ShutdownReason>,
    fired: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx, fired: AtomicBool::new(false) }
    }

    /// Receiver for one mixing loop. Subscribe before the loop starts: a
    /// stop fired earlier is not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.tx.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Fire the stop once; later calls are ignored. Returns whether this call
    /// fired it.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        let loops = self.tx.send(reason).unwrap_or(0);
        info!(%reason, loops, "stopping mixing loops");
        true
    }

    pub fn shutdown(&self) -> bool {
        self.trigger(ShutdownReason::Requested)
    }

    /// Wait for SIGINT or SIGTERM and fire the stop with the matching reason.
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, relying on SIGINT");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let reason = tokio::select! {
            res = signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "SIGINT handler failed");
                }
                ShutdownReason::Interrupt
            }
            _ = terminate => ShutdownReason::Terminate,
        };
        self.trigger(reason);
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_loop_sees_the_reason() {
        let controller = ShutdownController::new();
        let mut wallet_a = controller.subscribe();
        let mut wallet_b = controller.subscribe();
        assert!(!controller.is_triggered());
        assert!(controller.trigger(ShutdownReason::Terminate));
        assert_eq!(wallet_a.recv().await.unwrap(), ShutdownReason::Terminate);
        assert_eq!(wallet_b.recv().await.unwrap(), ShutdownReason::Terminate);
    }

    #[tokio::test]
    async fn fires_once() {
        let controller = ShutdownController::new();
        let mut rx = controller.subscribe();
        assert!(controller.shutdown());
        assert!(!controller.trigger(ShutdownReason::Interrupt));
        assert!(controller.is_triggered());
        assert_eq!(rx.recv().await.unwrap(), ShutdownReason::Requested);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn no_loops_subscribed() {
        let controller = ShutdownController::new();
        assert!(controller.shutdown());
        assert_eq!(ShutdownReason::Interrupt.to_string(), "interrupt");
    }
}

//! Graceful shutdown: stop admitting gateway calls, then drain the ones in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{watch, Notify};

/// Tracks in-flight gateway calls and the shutdown flag.
///
/// Once triggered, [`Shutdown::track`] refuses new calls and
/// [`Shutdown::drain`] resolves when the last tracked call finishes.
#[derive(Debug)]
pub struct Shutdown {
    triggered: watch::Sender<bool>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        let (triggered, _) = watch::channel(false);
        Self {
            triggered,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Receiver that flips to `true` when shutdown is triggered.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.triggered.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.borrow()
    }

    pub fn trigger(&self) {
        if self.triggered.send_replace(true) {
            return;
        }
        tracing::info!(in_flight = self.in_flight(), "Shutdown triggered, refusing new calls");
        if self.in_flight() == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Register a call. `None` once shutdown has been triggered.
    pub fn track(&self) -> Option<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.is_triggered() {
            self.release();
            return None;
        }
        Some(InFlight { shutdown: self })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for every tracked call to finish.
    /// Returns `false` if calls were still running when it gave up.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for one tracked call. Dropping it marks the call finished.
#[derive(Debug)]
pub struct InFlight<'a> {
    shutdown: &'a Shutdown,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shutdown.release();
    }
}

// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shutdown Coordination
//!
//! A single [`StopEvent`] is shared by the pipeline executor, the timeout
//! handler, every stage worker and the file watcher. Setting it is
//! idempotent; workers check it at every queue operation and drain their
//! current item before exiting.
//!
//! [`ShutdownCoordinator`] layers a grace period on top: it owns the stop
//! event, races cleanup completion against a timeout, and reports whether
//! shutdown finished gracefully.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Default grace period for graceful shutdown (in seconds)
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

/// Process-wide stop signal.
///
/// Lightweight clone-able handle; all clones observe the same state.
/// Setting the event is idempotent and wakes every waiter.
#[derive(Clone, Default)]
pub struct StopEvent {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopEvent {
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Sets the stop signal. Safe to call repeatedly.
    pub fn set(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Checks the stop signal without blocking.
    pub fn is_set(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Waits until the stop signal is set.
    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        // Re-check after registering: set() may have raced the first check.
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }

    /// Waits for the stop signal, giving up after `timeout`.
    ///
    /// Returns true if the event was set before the timeout elapsed. The
    /// file watcher uses this to short-circuit its scan-interval sleep.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.wait() => true,
            _ = tokio::time::sleep(timeout) => self.is_set(),
        }
    }
}

/// Shutdown coordinator
///
/// Owns the process stop event and enforces a grace period for cleanup.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    stop_event: StopEvent,
    grace_period: Duration,
    shutdown_initiated: Arc<AtomicBool>,
    shutdown_complete: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            stop_event: StopEvent::new(),
            grace_period,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(Notify::new()),
        }
    }

    /// The shared stop event, clone-able into worker tasks.
    pub fn stop_event(&self) -> StopEvent {
        self.stop_event.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Initiates graceful shutdown: flags the coordinator and sets the
    /// stop event. First caller wins; later calls are no-ops.
    pub fn initiate_shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::info!("Initiating graceful shutdown (grace period: {:?})", self.grace_period);
            self.stop_event.set();
        }
    }

    /// Waits for cleanup to complete or the grace period to expire.
    ///
    /// Returns true if shutdown completed within the grace period.
    pub async fn wait_for_shutdown(&self) -> bool {
        if !self.is_shutting_down() {
            tracing::warn!("wait_for_shutdown called but shutdown not initiated");
            return true;
        }

        tokio::select! {
            _ = self.shutdown_complete.notified() => {
                tracing::info!("Shutdown completed gracefully");
                true
            }
            _ = tokio::time::sleep(self.grace_period) => {
                tracing::warn!("Shutdown grace period expired, forcing shutdown");
                false
            }
        }
    }

    /// Signals that cleanup is done, releasing `wait_for_shutdown`.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.notify_waiters();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS))
    }
}

//! Backoff-scheduled polling.
//!
//! A poller repeatedly invokes one unit of work, re-arming its own
//! timer only after the previous run completes, so a given poller can
//! never have two executions in flight. On failure the interval
//! doubles up to a ceiling; the next success snaps it back to base.
//!
//! Errors from the work function stop at this layer: they are logged
//! and converted into backoff growth, never propagated.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Exponential backoff state for one poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `base`, doubling up to `ceiling`.
    #[must_use]
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling,
            current: base,
        }
    }

    /// The configured base interval.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// The interval the next tick will be scheduled after.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// A success resets the interval to base.
    pub fn on_success(&mut self) {
        self.current = self.base;
    }

    /// A failure doubles the interval, capped at the ceiling.
    pub fn on_failure(&mut self) {
        self.current = (self.current * 2).min(self.ceiling);
    }
}

/// Handle to a running poller.
#[derive(Debug)]
pub struct PollerHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// The poller's name, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the poller, cancelling its pending timer.
    ///
    /// No further executions of the work function will start.
    pub fn stop(&self) {
        debug!(poller = self.name, "Stopping poller");
        self.handle.abort();
    }
}

/// Spawn a poll loop.
///
/// The work function runs immediately, then again after each interval.
/// While `gate` reports `false` (nobody is watching) the work is
/// skipped entirely and the timer re-arms at the unchanged base
/// interval, leaving backoff state untouched.
pub fn spawn_poller<G, W, Fut, E>(
    name: &'static str,
    mut backoff: Backoff,
    gate: G,
    mut work: W,
) -> PollerHandle
where
    G: Fn() -> bool + Send + 'static,
    W: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    debug!(poller = name, base_ms = backoff.base().as_millis() as u64, "Starting poller");

    let handle = tokio::spawn(async move {
        loop {
            let delay = if gate() {
                match work().await {
                    Ok(()) => {
                        backoff.on_success();
                        backoff.current()
                    }
                    Err(err) => {
                        backoff.on_failure();
                        warn!(
                            poller = name,
                            error = %err,
                            retry_ms = backoff.current().as_millis() as u64,
                            "Poll failed, backing off"
                        );
                        backoff.current()
                    }
                }
            } else {
                trace!(poller = name, "No subscribers, skipping poll");
                backoff.base()
            };

            tokio::time::sleep(delay).await;
        }
    });

    PollerHandle { name, handle }
}

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Outcome of one deadline-bounded operation.
#[derive(Debug)]
pub(crate) enum Guarded<T> {
    Completed(T),
    /// The deadline passed first; the operation future has been dropped.
    Expired,
}

/// Session-wide deadline shared by every bounded operation.
///
/// The expiry is either "never" or a point in time. `guard` arms it to
/// `now + timeout`, races the operation against it, and resets it to
/// "never" once either side wins. The caller force-closes the transport on
/// `Expired`, which is what aborts the outstanding I/O.
#[derive(Debug)]
pub(crate) struct Watchdog {
    timeout: Duration,
    expiry: Option<Instant>,
}

impl Watchdog {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            expiry: None,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.expiry.is_some()
    }

    fn arm(&mut self) -> Instant {
        let at = Instant::now() + self.timeout;
        self.expiry = Some(at);
        at
    }

    pub(crate) async fn guard<F: Future>(&mut self, op: F) -> Guarded<F::Output> {
        let deadline = self.arm();
        let outcome = tokio::select! {
            biased;
            out = op => Guarded::Completed(out),
            _ = sleep_until(deadline) => Guarded::Expired,
        };
        self.expiry = None;
        outcome
    }
}

//! Single-owner cancellable deadlines for the session event loop.
//!
//! Each named timer (silence timeout, idle departure) is one `Deadline`
//! owned by the loop; arming replaces the previous instant, so there can
//! never be two live timers for the same purpose.

use std::future::pending;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// A rearmable deadline usable directly as a `tokio::select!` branch via
/// [`Deadline::wait`]; a disarmed deadline never resolves.
#[derive(Debug, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or rearm) the deadline `after` from now.
    pub fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// Resolve when the armed instant passes; pend forever when disarmed.
    pub async fn wait(&self) {
        match self.at {
            Some(at) => sleep_until(at).await,
            None => pending::<()>().await,
        }
    }
}

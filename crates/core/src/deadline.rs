//! Deadline bookkeeping for network operations.
//!
//! Every network-facing operation derives a [`Deadline`] from its caller's
//! timeout at entry and hands `remaining()` to each sub-operation. When the
//! deadline elapses mid-retry the in-flight attempt is allowed to complete,
//! but no further attempts are issued.

use std::time::{Duration, Instant};

/// Retry attempts after the first failure of a read or upload step.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Cooperative sleep between retries.
pub const RETRY_SLEEP: Duration = Duration::from_millis(1);

/// A fixed point in time by which an operation must finish.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// A deadline `timeout` from now; `None` means unbounded.
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            expires_at: timeout.map(|t| Instant::now() + t),
        }
    }

    /// A deadline that never expires.
    pub fn unbounded() -> Self {
        Self { expires_at: None }
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Time left until the deadline. `None` for unbounded deadlines,
    /// `Some(ZERO)` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

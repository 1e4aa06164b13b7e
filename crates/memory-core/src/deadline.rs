//! Caller-supplied deadlines
//!
//! Every externally triggered operation accepts an optional deadline;
//! exceeding it returns `Timeout` rather than letting the caller block past
//! what it asked for. Suspension points are the R query, V query, and
//! embedder call each operation makes; a `Deadline` is checked before each
//! one.

use crate::error::{EngineError, Result};
use std::time::{Duration, Instant};

/// An optional point in time after which an operation should stop and
/// return `EngineError::Timeout` rather than proceed to its next suspension
/// point. `Deadline::none()` never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline — the operation runs to completion.
    pub fn none() -> Self {
        Self(None)
    }

    /// Expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// `Err(Timeout)` if the deadline has passed, `Ok(())` otherwise.
    pub fn check(&self, operation: &str) -> Result<()> {
        match self.0 {
            Some(at) if Instant::now() >= at => {
                Err(EngineError::Timeout(format!("{operation} exceeded its deadline")))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deadline_never_expires() {
        assert!(Deadline::none().check("op").is_ok());
    }

    #[test]
    fn expired_deadline_returns_timeout() {
        let d = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(d.check("op"), Err(EngineError::Timeout(_))));
    }

    #[test]
    fn unexpired_deadline_passes() {
        let d = Deadline::after(Duration::from_secs(60));
        assert!(d.check("op").is_ok());
    }
}

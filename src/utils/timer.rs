//! Timer/timeout utility implemented using `tokio::time::Sleep`.

use std::pin::Pin;

use crate::utils::AtomRegError;

use tokio::time::{self, Duration, Instant, Sleep};

/// Timer utility for signalling after a given timeout. A timer that has not
/// been kicked off never fires, so it can sit in a `tokio::select!` branch
/// while no phase is in flight.
///
/// Must be used within the context of a tokio runtime.
#[derive(Debug)]
pub struct Timer {
    /// Inner `tokio::time::Sleep` future, wrapped in a pinned box to support
    /// await multiple times.
    sleep: Pin<Box<Sleep>>,

    /// Whether the timer is currently armed.
    armed: bool,

    /// Timeout duration used by the last kick-off.
    last_dur: Duration,
}

impl Default for Timer {
    fn default() -> Self {
        Timer {
            sleep: Box::pin(time::sleep(Duration::ZERO)),
            armed: false,
            last_dur: Duration::ZERO,
        }
    }
}

impl Timer {
    /// Gets the last timeout duration used.
    pub fn get_dur(&self) -> Duration {
        self.last_dur
    }

    /// Returns whether the timer is armed and has not fired yet.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Kicks off the timer with the given duration, replacing any pending
    /// deadline.
    pub fn kickoff(&mut self, dur: Duration) -> Result<(), AtomRegError> {
        if dur.is_zero() {
            return Err(AtomRegError::msg(format!(
                "invalid timeout duration {} ns",
                dur.as_nanos()
            )));
        }

        self.last_dur = dur;
        self.armed = true;
        self.sleep.as_mut().reset(Instant::now() + dur);
        Ok(())
    }

    /// Disarms the timer.
    pub fn cancel(&mut self) {
        self.armed = false;
    }

    /// Waits for the timer to timeout. Typically, this should be used as a
    /// branch of a `tokio::select!`. Pends forever if not armed.
    pub async fn timeout(&mut self) {
        if !self.armed {
            std::future::pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

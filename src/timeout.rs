//! One-shot deadline for a capture run

use std::time::Duration;

use crate::event_loop::{EventLoop, TimerId};

/// Arms a deadline on an [`EventLoop`] and reports its expiry exactly once.
///
/// The loop delivers `LoopEvent::Timer(id)`; the owner passes the id to
/// [`TimeoutGuard::fire`], which returns `true` only for this guard's timer
/// and only the first time. Disarming after the timer fired is a no-op, and a
/// disarmed timer is removed from the loop so it can never be delivered.
#[derive(Debug)]
pub struct TimeoutGuard {
    timer: Option<TimerId>,
    duration: Duration,
    fired: bool,
}

impl TimeoutGuard {
    pub fn arm(event_loop: &mut EventLoop, duration: Duration) -> Self {
        Self {
            timer: Some(event_loop.add_timer(duration)),
            duration,
            fired: false,
        }
    }

    /// Claim a timer expiry. `true` means the deadline passed and the caller
    /// should run its expiry handling now.
    pub fn fire(&mut self, id: TimerId) -> bool {
        if self.timer == Some(id) {
            self.timer = None;
            self.fired = true;
            true
        } else {
            false
        }
    }

    pub fn disarm(&mut self, event_loop: &mut EventLoop) {
        if let Some(id) = self.timer.take() {
            event_loop.remove_timer(id);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

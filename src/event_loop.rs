//! Single-threaded cooperative event loop
//!
//! Render engines post [`ViewEvent`]s from whatever thread they like through an
//! [`EventSink`]; the controller consumes them one at a time on its own thread,
//! interleaved with one-shot timer expiries. All controller state therefore
//! lives on one thread and needs no locking.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::engine::ViewEvent;

/// Identifies one armed timer on a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// A view event tagged with the run that produced it
#[derive(Debug)]
pub struct Envelope {
    pub run: u64,
    pub event: ViewEvent,
}

/// What [`EventLoop::next`] hands back
#[derive(Debug)]
pub enum LoopEvent {
    Timer(TimerId),
    View(Envelope),
}

/// Posting side of the loop, handed to render engines for one run.
#[derive(Debug, Clone)]
pub struct EventSink {
    run: u64,
    tx: Sender<Envelope>,
}

impl EventSink {
    /// Queue an event; returns `false` once the loop is gone.
    pub fn post(&self, event: ViewEvent) -> bool {
        self.tx.send(Envelope { run: self.run, event }).is_ok()
    }
}

pub struct EventLoop {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    timers: BTreeMap<TimerId, Instant>,
    next_timer: u64,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            timers: BTreeMap::new(),
            next_timer: 1,
        }
    }

    /// A sink whose events are tagged with `run`
    pub fn sink(&self, run: u64) -> EventSink {
        EventSink {
            run,
            tx: self.tx.clone(),
        }
    }

    /// Schedule a one-shot timer `after` from now
    pub fn add_timer(&mut self, after: Duration) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        let now = Instant::now();
        let deadline = now.checked_add(after).unwrap_or(now + Duration::from_secs(u32::MAX as u64));
        self.timers.insert(id, deadline);
        id
    }

    /// Cancel a timer. Returns `false` if it already fired or never existed.
    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Throw away every queued event; returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        self.rx.try_iter().count()
    }

    /// Block until a timer expires or an event arrives.
    ///
    /// A due timer wins over queued events. A timer is removed before it is
    /// returned, so each one is yielded at most once.
    pub fn next(&mut self) -> Option<LoopEvent> {
        loop {
            let earliest = self
                .timers
                .iter()
                .min_by_key(|(_, deadline)| **deadline)
                .map(|(id, deadline)| (*id, *deadline));

            match earliest {
                Some((id, deadline)) => {
                    let now = Instant::now();
                    if deadline <= now {
                        self.timers.remove(&id);
                        return Some(LoopEvent::Timer(id));
                    }
                    match self.rx.recv_timeout(deadline - now) {
                        Ok(envelope) => return Some(LoopEvent::View(envelope)),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => return None,
                    }
                }
                None => return self.rx.recv().ok().map(LoopEvent::View),
            }
        }
    }
}

//! Deferred work for the single engine thread.
//!
//! Nothing here runs on its own: the host drives the engine by calling
//! `DebugEngine::poll`, which pops whatever is due.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::stepping::SourceLocation;

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// Finish a suspend decided by the interceptor.
    EnterSuspended { epoch: u64, location: SourceLocation },
    /// Auto-step continuation, valid only for the command generation it
    /// was scheduled under.
    AutoStep { generation: u64 },
}

struct Scheduled {
    due: Instant,
    seq: u64,
    task: Deferred,
}

#[derive(Default)]
pub struct Scheduler {
    queue: Vec<Scheduled>,
    next_seq: u64,
}

impl Scheduler {
    pub fn schedule(&mut self, task: Deferred, due: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { due, seq, task });
    }

    /// Earliest due task, ties broken by scheduling order.
    pub fn pop_due(&mut self, now: Instant) -> Option<Deferred> {
        let position = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, s)| s.due <= now)
            .min_by_key(|(_, s)| (s.due, s.seq))
            .map(|(i, _)| i)?;
        Some(self.queue.remove(position).task)
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.queue.iter().map(|s| s.due).min()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

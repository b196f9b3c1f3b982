//! Software timers — deadline-ordered one-shot timers
//!
//! The service owns the monotonic tick counter and the set of armed
//! timers, kept in a skip list keyed by absolute deadline tick. Arming
//! and deleting happen from task context, expiry from the tick interrupt;
//! on hardware all three run under the single interrupt-disable critical
//! section, which here is the exclusive `&mut` access to the service.
//!
//! Expiry policy: one call to [`TimerService::check`] releases at most one
//! overdue timer, even when several are due. A backlog therefore drains
//! one timer per call and can starve if timers become due faster than the
//! tick rate.
//!
//! Author: Moroya Sakamoto

use log::trace;

use crate::kernel::IrqContext;
use crate::skiplist::{NodeRef, SkipList};

/// Timer callback, invoked in interrupt context with its opaque argument
pub type TimerFn = fn(&mut IrqContext<'_>, usize);

/// Reasons a timer cannot be armed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// No callback was supplied
    MissingCallback,
    /// A zero timeout would already be due
    ZeroTimeout,
}

impl core::fmt::Display for TimerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TimerError::MissingCallback => write!(f, "timer has no callback"),
            TimerError::ZeroTimeout => write!(f, "timer timeout is zero"),
        }
    }
}

/// Handle to an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(NodeRef);

/// An armed (or just detached) one-shot timer
pub struct Timer {
    deadline: u64,
    func: TimerFn,
    arg: usize,
}

impl Timer {
    /// Absolute tick at which the timer is due
    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    /// The opaque callback argument
    pub fn arg(&self) -> usize {
        self.arg
    }

    /// Run the callback; consumes the timer (strictly one-shot)
    pub fn fire(self, ctx: &mut IrqContext<'_>) {
        (self.func)(ctx, self.arg);
    }
}

/// Deadline-ordered timer service
pub struct TimerService {
    queue: SkipList<Timer>,
    ticks: u64,
}

impl TimerService {
    /// Service with its level generator seeded from `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            queue: SkipList::new(seed),
            ticks: 0,
        }
    }

    /// Current tick
    pub fn now(&self) -> u64 {
        self.ticks
    }

    /// Advance the tick counter by one, returning the new tick
    ///
    /// Called from the periodic interrupt before timers are checked.
    pub fn advance(&mut self) -> u64 {
        self.ticks += 1;
        self.ticks
    }

    /// Arm a one-shot timer due `timeout` ticks from now
    pub fn create(
        &mut self,
        func: Option<TimerFn>,
        arg: usize,
        timeout: u64,
    ) -> Result<TimerHandle, TimerError> {
        let func = func.ok_or(TimerError::MissingCallback)?;
        if timeout == 0 {
            return Err(TimerError::ZeroTimeout);
        }
        let deadline = self.ticks + timeout;
        let node = self.queue.insert(deadline, Timer { deadline, func, arg });
        trace!("timer armed for tick {deadline}");
        Ok(TimerHandle(node))
    }

    /// Disarm a timer without invoking its callback
    ///
    /// A no-op if the timer already fired or was already deleted.
    pub fn delete(&mut self, handle: TimerHandle) {
        if self.queue.remove(handle.0).is_some() {
            trace!("timer disarmed");
        }
    }

    /// Detach the earliest overdue timer, if any
    ///
    /// At most one timer is returned per call even when several are due;
    /// the tick handler invokes the returned timer's callback. The next
    /// overdue timer waits for the next call.
    pub fn check(&mut self) -> Option<Timer> {
        let (deadline, _) = self.queue.peek_front()?;
        if deadline > self.ticks {
            return None;
        }
        let (_, timer) = self.queue.pop_front()?;
        trace!("timer due at {} fired on tick {}", timer.deadline, self.ticks);
        Some(timer)
    }

    /// Number of armed timers
    pub fn armed(&self) -> usize {
        self.queue.len()
    }
}

//! Kernel — tick interrupt path and cooperative run loop
//!
//! Owns the scheduler, the timer service and the heap as one explicitly
//! constructed state structure. The periodic tick interrupt is modeled by
//! [`Kernel::tick`]: bump the counter, let the timer service release at
//! most one due timer and run its callback, then reschedule. Task bodies
//! execute in bursts through [`Kernel::step`]; the trap a body returns
//! (yield, sleep, exit) is served the way the hardware build serves it,
//! by marking the task and raising the software-interrupt line so the
//! switch happens on the one interrupt-context path.
//!
//! Control never leaves the loop except through a task burst, which is
//! the cooperative rendering of a context switch primitive that does not
//! return.
//!
//! Author: Moroya Sakamoto

use log::{trace, warn};

use crate::heap::{AllocError, Heap};
use crate::page::PageProvider;
use crate::scheduler::{SchedError, Scheduler};
use crate::task::{TaskEnv, TaskFn, TaskId, TaskPriority, TaskState, Trap};
use crate::timer::{TimerError, TimerFn, TimerHandle, TimerService};

/// Pending software-interrupt line
///
/// Models the per-core machine software interrupt pending bit: yield,
/// exit, sleep and wake write it, and the next pass through the loop
/// services it with a reschedule.
pub struct SoftIrq {
    pending: bool,
}

impl SoftIrq {
    pub(crate) const fn new() -> Self {
        Self { pending: false }
    }

    /// Request an asynchronous reschedule
    pub fn raise(&mut self) {
        self.pending = true;
    }

    /// Consume the pending request, if one is latched
    pub fn take(&mut self) -> bool {
        core::mem::replace(&mut self.pending, false)
    }

    /// Is a reschedule pending?
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    fn clear(&mut self) {
        self.pending = false;
    }
}

/// Interrupt-context view of the kernel for timer callbacks
///
/// Callbacks run with preemption off and must stay short; this type
/// offers only non-blocking operations, so a callback cannot sleep by
/// construction. It may wake tasks, create tasks and arm or disarm
/// timers.
pub struct IrqContext<'a> {
    sched: &'a mut Scheduler,
    timers: &'a mut TimerService,
    resched: &'a mut SoftIrq,
}

impl<'a> IrqContext<'a> {
    pub(crate) fn new(
        sched: &'a mut Scheduler,
        timers: &'a mut TimerService,
        resched: &'a mut SoftIrq,
    ) -> Self {
        Self {
            sched,
            timers,
            resched,
        }
    }

    /// Current tick
    pub fn now(&self) -> u64 {
        self.timers.now()
    }

    /// Return a sleeping task to Ready and request a reschedule
    pub fn wake(&mut self, id: TaskId) {
        self.sched.wake(id);
        self.resched.raise();
    }

    /// Create a task from interrupt context
    pub fn spawn(
        &mut self,
        entry: TaskFn,
        arg: usize,
        priority: TaskPriority,
        quota: u32,
    ) -> Result<TaskId, SchedError> {
        self.sched.create(entry, arg, priority, quota)
    }

    /// Arm a new one-shot timer from interrupt context
    pub fn create_timer(
        &mut self,
        func: Option<TimerFn>,
        arg: usize,
        timeout: u64,
    ) -> Result<TimerHandle, TimerError> {
        self.timers.create(func, arg, timeout)
    }

    /// Disarm a timer from interrupt context
    pub fn delete_timer(&mut self, handle: TimerHandle) {
        self.timers.delete(handle);
    }
}

/// Wake-timer callback armed by sleep; the argument is the sleeper's id
fn wake_task(ctx: &mut IrqContext<'_>, arg: usize) {
    ctx.wake(TaskId(arg));
}

/// Counters from a bounded [`Kernel::run`]
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Tick counter value after the run
    pub ticks: u64,
    /// Context switches performed so far
    pub context_switches: u64,
    /// Timer callbacks fired so far
    pub timers_fired: u64,
    /// Bursts that executed a task body
    pub steps_run: u64,
    /// Bursts spent on the idle path
    pub idle_steps: u64,
}

/// The kernel core: scheduler + timer service + heap
pub struct Kernel<P: PageProvider> {
    /// Task table and selection state
    pub sched: Scheduler,
    /// Tick counter and armed timers
    pub timers: TimerService,
    /// Kernel heap
    pub heap: Heap<P>,
    resched: SoftIrq,
    timers_fired: u64,
}

impl<P: PageProvider> Kernel<P> {
    /// Bring up the kernel state: heap first, then timers, then the
    /// scheduler
    ///
    /// `seed` feeds the timer queue's level generator so a run can be
    /// reproduced exactly.
    pub fn new(provider: P, seed: u64) -> Result<Self, AllocError> {
        Ok(Self {
            heap: Heap::new(provider)?,
            timers: TimerService::new(seed),
            sched: Scheduler::new(),
            resched: SoftIrq::new(),
            timers_fired: 0,
        })
    }

    /// Create a task
    pub fn spawn(
        &mut self,
        entry: TaskFn,
        arg: usize,
        priority: TaskPriority,
        quota: u32,
    ) -> Result<TaskId, SchedError> {
        self.sched.create(entry, arg, priority, quota)
    }

    /// The periodic tick interrupt handler
    ///
    /// Advances the counter, fires at most one due timer callback, then
    /// reschedules. Returns the new tick.
    pub fn tick(&mut self) -> u64 {
        let now = self.timers.advance();
        if let Some(timer) = self.timers.check() {
            self.timers_fired += 1;
            let mut ctx = IrqContext::new(&mut self.sched, &mut self.timers, &mut self.resched);
            timer.fire(&mut ctx);
        }
        // the reschedule below also serves anything the callback raised
        self.resched.clear();
        self.sched.schedule();
        now
    }

    /// One turn of the cooperative loop
    ///
    /// Services a pending software interrupt, then runs the current
    /// task's body for one burst and dispatches the trap it returns.
    /// Returns the task that ran, or `None` for an idle turn.
    pub fn step(&mut self) -> Option<TaskId> {
        if self.resched.take() {
            self.sched.schedule();
        }
        let current = self.sched.current()?;
        if self.sched.status(current) != TaskState::Running {
            return None;
        }
        let context = self.sched.context(current);
        let entry = context.pc?;
        let ticks = self.timers.now();
        let trap = {
            let mut env = TaskEnv {
                id: current,
                arg: context.a0,
                ticks,
                stack: self.sched.stack_mut(current),
                heap: &mut self.heap,
            };
            entry(&mut env)
        };
        match trap {
            Trap::Continue => {}
            Trap::Yield => {
                self.sched.yield_current();
                self.resched.raise();
            }
            Trap::Exit => {
                self.sched.exit_current();
                self.resched.raise();
            }
            Trap::Sleep(ticks) => self.sleep_current(current, ticks),
        }
        Some(current)
    }

    /// Drive the kernel for `ticks` tick interrupts with a fixed number
    /// of loop turns in between
    pub fn run(&mut self, ticks: u64, steps_per_tick: usize) -> RunStats {
        let mut steps_run = 0u64;
        let mut idle_steps = 0u64;
        for _ in 0..ticks {
            self.tick();
            for _ in 0..steps_per_tick {
                match self.step() {
                    Some(_) => steps_run += 1,
                    None => idle_steps += 1,
                }
            }
        }
        trace!("run finished on tick {}", self.timers.now());
        RunStats {
            ticks: self.timers.now(),
            context_switches: self.sched.context_switches(),
            timers_fired: self.timers_fired,
            steps_run,
            idle_steps,
        }
    }

    /// Sleep half: mark the task, arm its wake timer, request reschedule
    fn sleep_current(&mut self, current: TaskId, ticks: u64) {
        self.sched.sleep_current();
        if let Err(err) = self.timers.create(Some(wake_task), current.0, ticks) {
            // without a wake source the task would sleep forever
            warn!("task {} sleep rejected: {err}", current.0);
            self.sched.wake(current);
        }
        self.resched.raise();
    }
}

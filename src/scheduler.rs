//! Preemptive priority scheduler
//!
//! Fixed-slot task table with priority tiers and round-robin rotation
//! inside a tier. Selection runs in interrupt context on every tick:
//! pick the best (numerically smallest) priority among Ready/Running
//! tasks, then the first id after the last-run one at that priority,
//! wrapping. The running task is replaced when it is no longer
//! schedulable, when a strictly better priority is waiting, or when its
//! time-slice quota is spent; otherwise it keeps the CPU and its elapsed
//! count grows.
//!
//! When nothing is schedulable the scheduler reports the idle path
//! instead of failing.
//!
//! Author: Moroya Sakamoto

use log::{debug, trace};

use crate::task::{Context, Task, TaskFn, TaskId, TaskPriority, TaskState, MAX_TASKS};

/// Task creation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Every slot is occupied by a live task
    NoFreeSlot,
}

impl core::fmt::Display for SchedError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SchedError::NoFreeSlot => write!(f, "task table is full"),
        }
    }
}

/// Outcome of a scheduling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The task now holding the CPU
    Run(TaskId),
    /// No schedulable task; the idle context takes over
    Idle,
}

const EMPTY_SLOT: Task = Task::empty();

/// Fixed-table preemptive scheduler
pub struct Scheduler {
    tasks: [Task; MAX_TASKS],
    current: Option<TaskId>,
    context_switches: u64,
}

impl Scheduler {
    /// Scheduler with an empty task table
    pub const fn new() -> Self {
        Self {
            tasks: [EMPTY_SLOT; MAX_TASKS],
            current: None,
            context_switches: 0,
        }
    }

    /// Create a task in the first Empty or Exited slot
    ///
    /// The slot index becomes the task's id for its whole lifetime.
    pub fn create(
        &mut self,
        entry: TaskFn,
        arg: usize,
        priority: TaskPriority,
        quota: u32,
    ) -> Result<TaskId, SchedError> {
        let slot = self
            .tasks
            .iter()
            .position(|task| matches!(task.status, TaskState::Empty | TaskState::Exited))
            .ok_or(SchedError::NoFreeSlot)?;
        self.tasks[slot].activate(entry, arg, priority, quota);
        debug!("task {slot} created, priority {}, quota {quota}", priority.0);
        Ok(TaskId(slot))
    }

    /// The task holding the CPU, if any
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// A task's execution state
    pub fn status(&self, id: TaskId) -> TaskState {
        self.tasks[id.0].status
    }

    /// A task's saved context
    pub fn context(&self, id: TaskId) -> Context {
        self.tasks[id.0].context
    }

    /// A task's stack region
    pub fn stack_mut(&mut self, id: TaskId) -> &mut [u8] {
        &mut self.tasks[id.0].stack
    }

    /// Read access to a slot
    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    /// Context switches performed so far
    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }

    /// Mark the current task Ready (the yield half; reschedule follows)
    pub fn yield_current(&mut self) {
        if let Some(id) = self.current {
            self.tasks[id.0].status = TaskState::Ready;
        }
    }

    /// Mark the current task Exited; its slot waits for a future create
    pub fn exit_current(&mut self) {
        if let Some(id) = self.current {
            self.tasks[id.0].status = TaskState::Exited;
            debug!("task {} exited", id.0);
        }
    }

    /// Mark the current task Sleeping (its wake timer is armed separately)
    pub fn sleep_current(&mut self) {
        if let Some(id) = self.current {
            self.tasks[id.0].status = TaskState::Sleeping;
        }
    }

    /// Return a sleeping task to Ready (the wake-timer callback half)
    pub fn wake(&mut self, id: TaskId) {
        if self.tasks[id.0].status == TaskState::Sleeping {
            self.tasks[id.0].status = TaskState::Ready;
            trace!("task {} woken", id.0);
        }
    }

    /// Pick the task to run next and hand it the CPU
    ///
    /// Runs from interrupt context, once per tick and once per serviced
    /// software interrupt.
    pub fn schedule(&mut self) -> Decision {
        let mut best = TaskPriority::UNUSED;
        for task in &self.tasks {
            if task.schedulable() && task.priority < best {
                best = task.priority;
            }
        }
        if best == TaskPriority::UNUSED {
            trace!("nothing schedulable, idling");
            return Decision::Idle;
        }

        // round robin: first id after the last-run one, wrapping
        let last = match self.current {
            Some(id) => id.0,
            None => MAX_TASKS - 1,
        };
        let candidate = (last + 1..MAX_TASKS)
            .chain(0..=last)
            .find(|&slot| self.tasks[slot].schedulable() && self.tasks[slot].priority == best)
            .map(TaskId);
        let Some(candidate) = candidate else {
            return Decision::Idle;
        };

        if let Some(current) = self.current {
            let task = &self.tasks[current.0];
            let keep = task.schedulable()
                && self.tasks[candidate.0].priority >= task.priority
                && task.elapsed < task.quota;
            if keep {
                let task = &mut self.tasks[current.0];
                task.status = TaskState::Running;
                task.elapsed += 1;
                return Decision::Run(current);
            }
            let task = &mut self.tasks[current.0];
            if task.status == TaskState::Running {
                task.status = TaskState::Ready;
            }
        }

        if self.current != Some(candidate) {
            self.context_switches += 1;
            trace!("switch to task {}", candidate.0);
        }
        let task = &mut self.tasks[candidate.0];
        task.status = TaskState::Running;
        task.elapsed = 1;
        self.current = Some(candidate);
        Decision::Run(candidate)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskEnv, Trap};

    fn body(_env: &mut TaskEnv<'_>) -> Trap {
        Trap::Continue
    }

    fn spawn(sched: &mut Scheduler, priority: u8, quota: u32) -> TaskId {
        sched.create(body, 0, TaskPriority(priority), quota).unwrap()
    }

    #[test]
    fn test_create_fills_slots_in_order() {
        let mut sched = Scheduler::new();
        for expected in 0..MAX_TASKS {
            let id = spawn(&mut sched, 1, 1);
            assert_eq!(id.0, expected);
        }
        assert_eq!(
            sched.create(body, 0, TaskPriority(1), 1).unwrap_err(),
            SchedError::NoFreeSlot
        );
    }

    #[test]
    fn test_exited_slot_is_reused() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 0, 1);
        let _b = spawn(&mut sched, 0, 1);
        assert_eq!(sched.schedule(), Decision::Run(a));
        sched.exit_current();
        assert_eq!(sched.status(a), TaskState::Exited);
        let reused = spawn(&mut sched, 2, 1);
        assert_eq!(reused, a);
        assert_eq!(sched.status(a), TaskState::Ready);
    }

    #[test]
    fn test_idle_when_table_empty_or_all_asleep() {
        let mut sched = Scheduler::new();
        assert_eq!(sched.schedule(), Decision::Idle);
        let id = spawn(&mut sched, 1, 1);
        assert_eq!(sched.schedule(), Decision::Run(id));
        sched.sleep_current();
        assert_eq!(sched.schedule(), Decision::Idle);
        // at most one task is Running at any instant, so idle means none
        assert_eq!(sched.status(id), TaskState::Sleeping);
    }

    #[test]
    fn test_best_priority_wins() {
        let mut sched = Scheduler::new();
        spawn(&mut sched, 5, 1);
        let high = spawn(&mut sched, 1, 1);
        spawn(&mut sched, 3, 1);
        assert_eq!(sched.schedule(), Decision::Run(high));
    }

    #[test]
    fn test_better_priority_preempts_immediately() {
        let mut sched = Scheduler::new();
        let low = spawn(&mut sched, 5, 10);
        assert_eq!(sched.schedule(), Decision::Run(low));
        let high = spawn(&mut sched, 1, 10);
        assert_eq!(sched.schedule(), Decision::Run(high));
        // the preempted task goes back to Ready, not limbo
        assert_eq!(sched.status(low), TaskState::Ready);
        assert_eq!(sched.status(high), TaskState::Running);
    }

    #[test]
    fn test_quota_round_robin_in_top_tier() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 0, 2);
        let b = spawn(&mut sched, 0, 2);
        let c = spawn(&mut sched, 1, 2);

        // quota 2: each top-tier task keeps the CPU for two passes
        let mut history = [TaskId(9); 8];
        for slot in history.iter_mut() {
            match sched.schedule() {
                Decision::Run(id) => *slot = id,
                Decision::Idle => unreachable!("schedulable tasks exist"),
            }
        }
        assert_eq!(history, [a, a, b, b, a, a, b, b]);
        assert_eq!(sched.status(c), TaskState::Ready);

        // the lower tier runs only once the top tier is gone
        sched.schedule();
        sched.exit_current();
        assert_eq!(sched.schedule(), Decision::Run(b));
        sched.exit_current();
        assert_eq!(sched.schedule(), Decision::Run(c));
    }

    #[test]
    fn test_round_robin_wraps_from_last_run_id() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 2, 1);
        let b = spawn(&mut sched, 2, 1);
        let c = spawn(&mut sched, 2, 1);
        assert_eq!(sched.schedule(), Decision::Run(a));
        assert_eq!(sched.schedule(), Decision::Run(b));
        assert_eq!(sched.schedule(), Decision::Run(c));
        assert_eq!(sched.schedule(), Decision::Run(a));
        assert_eq!(sched.context_switches(), 4);
    }

    #[test]
    fn test_yield_with_quota_left_keeps_the_cpu() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 1, 5);
        let _b = spawn(&mut sched, 1, 5);
        assert_eq!(sched.schedule(), Decision::Run(a));
        sched.yield_current();
        assert_eq!(sched.status(a), TaskState::Ready);
        // equal priority and unspent quota: the yielder resumes
        assert_eq!(sched.schedule(), Decision::Run(a));
        assert_eq!(sched.status(a), TaskState::Running);
    }

    #[test]
    fn test_sole_task_restarts_its_quota() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 1, 2);
        for _ in 0..5 {
            assert_eq!(sched.schedule(), Decision::Run(a));
        }
        // re-picking the same task is not a context switch
        assert_eq!(sched.context_switches(), 1);
    }

    #[test]
    fn test_wake_only_touches_sleeping_tasks() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 1, 1);
        sched.wake(a);
        assert_eq!(sched.status(a), TaskState::Ready);
        sched.schedule();
        sched.sleep_current();
        sched.wake(a);
        assert_eq!(sched.status(a), TaskState::Ready);
        sched.schedule();
        sched.exit_current();
        sched.wake(a);
        assert_eq!(sched.status(a), TaskState::Exited);
    }

    #[test]
    fn test_unused_priority_never_scheduled() {
        let mut sched = Scheduler::new();
        spawn(&mut sched, 255, 1);
        assert_eq!(sched.schedule(), Decision::Idle);
    }
}

//! Task control blocks — fixed-slot task table entries
//!
//! Each task occupies one slot of a fixed table and owns a statically
//! sized stack region. A slot is reused across create/exit cycles of the
//! same id; the stack bytes are never zeroed, only the control fields are
//! reinitialized on the next create.
//!
//! Author: Moroya Sakamoto

use crate::heap::HeapOps;

/// Maximum tasks the kernel can manage
pub const MAX_TASKS: usize = 10;

/// Stack bytes owned by each task slot
pub const STACK_SIZE: usize = 1024;

/// Task body — called once per scheduled burst
///
/// A body runs until its next suspension point and reports it as the
/// returned [`Trap`]. State that must survive across bursts lives in the
/// task's stack region (`env.stack`).
pub type TaskFn = fn(&mut TaskEnv<'_>) -> Trap;

/// Stable task identifier (the slot index)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub usize);

/// Task priority (lower number = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    /// Most urgent priority
    pub const TOP: TaskPriority = TaskPriority(0);
    /// Sentinel carried by unoccupied slots; a task created with it is
    /// never scheduled
    pub const UNUSED: TaskPriority = TaskPriority(255);
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot has never held a task
    Empty,
    /// Runnable, waiting to be picked
    Ready,
    /// Currently executing (at most one task at a time)
    Running,
    /// Waiting on an event outside the timer service
    Blocked,
    /// Waiting for its wake timer to fire
    Sleeping,
    /// Finished; slot is reclaimable by the next create
    Exited,
}

/// Suspension request returned by a task body at the end of a burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// Keep running; the next burst resumes after the tick boundary
    Continue,
    /// Relinquish the CPU, stay ready
    Yield,
    /// Sleep for the given number of ticks
    Sleep(u64),
    /// Terminate; the slot is reclaimed by a future create
    Exit,
}

/// Saved execution state of a task
///
/// On hardware this is the full register file; here it is the resume
/// entry point, the saved stack pointer, and the argument register.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    /// Resume program counter (the task body)
    pub pc: Option<TaskFn>,
    /// Saved stack pointer (top of the slot's stack region)
    pub sp: usize,
    /// Argument register
    pub a0: usize,
}

impl Context {
    const fn idle() -> Self {
        Self {
            pc: None,
            sp: 0,
            a0: 0,
        }
    }
}

/// One task table slot
///
/// Size: ~1.1 KB per slot (control fields + the owned stack region).
pub struct Task {
    /// Execution state
    pub status: TaskState,
    /// Priority (lower = higher)
    pub priority: TaskPriority,
    /// Time-slice length in ticks
    pub quota: u32,
    /// Ticks consumed since the task was last switched onto
    pub elapsed: u32,
    /// Saved execution state
    pub context: Context,
    /// Exclusively owned stack region, reused across create/exit cycles
    pub stack: [u8; STACK_SIZE],
}

impl Task {
    /// Empty slot
    pub const fn empty() -> Self {
        Self {
            status: TaskState::Empty,
            priority: TaskPriority::UNUSED,
            quota: 0,
            elapsed: 0,
            context: Context::idle(),
            stack: [0u8; STACK_SIZE],
        }
    }

    /// Reinitialize the slot for a new task
    ///
    /// Entry becomes the resume PC, the stack top the saved SP, and `arg`
    /// lands in the argument register. The stack bytes are left as-is.
    pub fn activate(&mut self, entry: TaskFn, arg: usize, priority: TaskPriority, quota: u32) {
        self.status = TaskState::Ready;
        self.priority = priority;
        self.quota = quota;
        self.elapsed = 0;
        self.context = Context {
            pc: Some(entry),
            sp: STACK_SIZE,
            a0: arg,
        };
    }

    /// Can the scheduler pick this task?
    pub fn schedulable(&self) -> bool {
        matches!(self.status, TaskState::Ready | TaskState::Running)
    }
}

/// Execution environment handed to a task body for one burst
pub struct TaskEnv<'a> {
    /// The running task's id
    pub id: TaskId,
    /// The argument register contents
    pub arg: usize,
    /// Current tick
    pub ticks: u64,
    /// The task's own stack region; persists across bursts
    pub stack: &'a mut [u8],
    /// Kernel heap access
    pub heap: &'a mut dyn HeapOps,
}

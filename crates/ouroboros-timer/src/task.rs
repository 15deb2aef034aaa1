//! Core task traits and types

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::TaskState;

/// Unique task identifier using UUID v7 (time-ordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub uuid::Uuid);

impl TaskId {
    /// Create a new task ID
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a task repeats after it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    /// Fire once, then retire
    #[default]
    Once,
    /// Next deadline = previous scheduled deadline + period (catches up)
    FixedRate(Duration),
    /// Next deadline = time the task fired + period (never catches up)
    FixedDelay(Duration),
}

impl Period {
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Period::Once)
    }

    /// Signed encoding: zero for one-shot, positive for fixed-rate,
    /// negative for fixed-delay.
    pub fn signed_millis(&self) -> i64 {
        let millis = |d: &Duration| i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        match self {
            Period::Once => 0,
            Period::FixedRate(d) => millis(d),
            Period::FixedDelay(d) => -millis(d),
        }
    }
}

/// Repeat mode for [`Timer::submit_repeating`](crate::Timer::submit_repeating)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    FixedRate,
    FixedDelay,
}

impl RepeatMode {
    pub(crate) fn period(self, every: Duration) -> Period {
        match self {
            RepeatMode::FixedRate => Period::FixedRate(every),
            RepeatMode::FixedDelay => Period::FixedDelay(every),
        }
    }
}

/// Execution context handed to a job each time it fires
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task being executed
    pub task_id: TaskId,
    /// Deadline this execution was scheduled for
    pub scheduled_at: Instant,
    /// When the timer thread decided to fire it
    pub fired_at: Instant,
    pub period: Period,
    /// 1-based execution count
    pub execution: u64,
}

impl TaskContext {
    /// How far behind its deadline this execution started
    pub fn lateness(&self) -> Duration {
        self.fired_at.saturating_duration_since(self.scheduled_at)
    }
}

/// Work run by the timer thread.
///
/// Returning an error is fatal to the timer: the thread stops and every
/// pending task is dropped. Jobs that must not take the timer down should
/// handle their own errors.
pub trait Job: Send + 'static {
    fn run(&mut self, ctx: &TaskContext) -> anyhow::Result<()>;
}

impl<F> Job for F
where
    F: FnMut(&TaskContext) -> anyhow::Result<()> + Send + 'static,
{
    fn run(&mut self, ctx: &TaskContext) -> anyhow::Result<()> {
        self(ctx)
    }
}

/// Scheduling fields, guarded by the per-task lock
#[derive(Debug)]
pub(crate) struct TaskSlot {
    pub(crate) state: TaskState,
    pub(crate) next_execution_time: Option<Instant>,
    pub(crate) period: Period,
    pub(crate) executions: u64,
}

struct TaskInner {
    id: TaskId,
    slot: Mutex<TaskSlot>,
    // Only the timer thread locks this, outside the queue lock
    job: Mutex<Box<dyn Job>>,
}

/// Handle to a schedulable unit of work.
///
/// Cloning yields another handle to the same task. A task can be handed to a
/// timer at most once; afterwards the handle is only good for inspection and
/// [`cancel`](Self::cancel).
#[derive(Clone)]
pub struct TimerTask {
    inner: Arc<TaskInner>,
}

impl TimerTask {
    /// Create a task in the `Created` state
    pub fn new<J: Job>(job: J) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                slot: Mutex::new(TaskSlot {
                    state: TaskState::Created,
                    next_execution_time: None,
                    period: Period::Once,
                    executions: 0,
                }),
                job: Mutex::new(Box::new(job)),
            }),
        }
    }

    /// Create a task from a body that cannot fail
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(&TaskContext) + Send + 'static,
    {
        Self::new(move |ctx: &TaskContext| -> anyhow::Result<()> {
            f(ctx);
            Ok(())
        })
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn state(&self) -> TaskState {
        self.inner.slot.lock().state
    }

    pub fn period(&self) -> Period {
        self.inner.slot.lock().period
    }

    /// Number of times the timer thread has started this task
    pub fn executions(&self) -> u64 {
        self.inner.slot.lock().executions
    }

    /// Cancel the task.
    ///
    /// Returns true if this call moved the task to `Cancelled`. A task that
    /// was already cancelled, or a one-shot task that already fired, is left
    /// alone and false is returned. A repeating task cancelled while running
    /// finishes that run and never fires again.
    pub fn cancel(&self) -> bool {
        let mut slot = self.inner.slot.lock();
        if !slot.state.can_transition_to(TaskState::Cancelled) {
            return false;
        }
        slot.state = TaskState::Cancelled;
        drop(slot);

        tracing::debug!(task_id = %self.inner.id, "Task cancelled");
        true
    }

    /// Deadline of the most recent actual execution.
    ///
    /// For a repeating task this is derived back from the next deadline, so
    /// it is meaningful from inside the job and after it has run. Returns
    /// `None` for a task that was never scheduled.
    pub fn scheduled_execution_time(&self) -> Option<Instant> {
        let slot = self.inner.slot.lock();
        let next = slot.next_execution_time?;
        match slot.period {
            Period::Once => Some(next),
            Period::FixedRate(p) | Period::FixedDelay(p) => {
                if slot.executions == 0 {
                    Some(next)
                } else {
                    next.checked_sub(p)
                }
            }
        }
    }

    pub(crate) fn slot(&self) -> parking_lot::MutexGuard<'_, TaskSlot> {
        self.inner.slot.lock()
    }

    pub(crate) fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        self.inner.job.lock().run(ctx)
    }

    pub(crate) fn same_task(&self, other: &TimerTask) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("TimerTask")
            .field("id", &self.inner.id)
            .field("state", &slot.state)
            .field("period", &slot.period)
            .field("executions", &slot.executions)
            .finish()
    }
}

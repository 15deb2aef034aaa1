//! Timer thread: fires due tasks in deadline order
//!
//! One thread per timer. It holds the queue lock while inspecting and
//! mutating the queue, releases it while parked on the condition variable,
//! and runs task bodies with no locks held except the job's own.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

use crate::clock::{deadline_after, Clock};
use crate::queue::TaskQueue;
use crate::{Period, Result, TaskContext, TaskId, TaskState, TimerConfig, TimerError, TimerTask};

/// Why the timer thread stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// `cancel_all` was called
    Cancelled,
    /// The timer was closed and its queue ran dry
    Drained,
    /// A task body returned an error
    TaskFailed { task_id: TaskId, error: String },
    /// A task body panicked
    Panicked(String),
}

impl ShutdownReason {
    /// The error to surface for a thread that died from a task body
    pub fn to_error(&self) -> Option<TimerError> {
        match self {
            ShutdownReason::TaskFailed { task_id, error } => Some(TimerError::TaskFailed {
                task_id: *task_id,
                message: error.clone(),
            }),
            ShutdownReason::Panicked(message) => Some(TimerError::Panicked(message.clone())),
            ShutdownReason::Cancelled | ShutdownReason::Drained => None,
        }
    }
}

/// Everything guarded by the queue lock
pub(crate) struct QueueState {
    pub(crate) queue: TaskQueue<TimerTask>,
    /// Flips to false exactly once
    pub(crate) accepting: bool,
    pub(crate) cancelled: bool,
    pub(crate) shutdown: Option<ShutdownReason>,
}

/// State shared between producers and the timer thread
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) state: Mutex<QueueState>,
    /// Signalled when the queue head changes or the timer stops accepting
    pub(crate) available: Condvar,
}

impl Shared {
    pub(crate) fn new(config: &TimerConfig) -> Self {
        Self {
            name: config.name.clone(),
            clock: Arc::clone(&config.clock),
            state: Mutex::new(QueueState {
                queue: TaskQueue::with_capacity(config.initial_capacity),
                accepting: true,
                cancelled: false,
                shutdown: None,
            }),
            available: Condvar::new(),
        }
    }
}

/// Start the timer thread
pub(crate) fn spawn(shared: Arc<Shared>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(shared.name.clone())
        .spawn(move || run(&shared))?;
    Ok(handle)
}

/// Thread entry point and error boundary.
///
/// Whatever ends the loop, the timer stops accepting tasks and drops every
/// pending one before the thread exits.
fn run(shared: &Shared) {
    info!(timer = %shared.name, "Timer thread started");

    let reason = match panic::catch_unwind(AssertUnwindSafe(|| main_loop(shared))) {
        Ok(reason) => reason,
        Err(payload) => ShutdownReason::Panicked(panic_message(payload.as_ref())),
    };

    let mut state = shared.state.lock();
    state.accepting = false;
    let pending = state.queue.take_all();
    state.shutdown = Some(reason.clone());
    drop(state);
    // Jobs may own the last handle to this timer; drop them unlocked
    let dropped = pending.len();
    drop(pending);

    match &reason {
        ShutdownReason::TaskFailed { task_id, error } => error!(
            timer = %shared.name,
            task_id = %task_id,
            error = %error,
            dropped = dropped,
            "Timer thread terminated by failing task"
        ),
        ShutdownReason::Panicked(message) => error!(
            timer = %shared.name,
            panic = %message,
            dropped = dropped,
            "Timer thread terminated by panicking task"
        ),
        _ => info!(timer = %shared.name, reason = ?reason, "Timer thread stopped"),
    }
}

/// Outcome of one pass over the queue head
enum Step {
    Fire(TimerTask, TaskContext),
    /// A cancelled head, popped under the lock and dropped after it
    Discard(TimerTask),
    Stop(ShutdownReason),
}

fn main_loop(shared: &Shared) -> ShutdownReason {
    loop {
        // Tasks leaving the queue are moved out of next_step, so a job dropped
        // with its task never runs its destructor under the queue lock
        let step = next_step(shared);

        let (task, ctx) = match step {
            Step::Fire(task, ctx) => (task, ctx),
            Step::Discard(task) => {
                trace!(task_id = %task.id(), "Discarded cancelled task");
                continue;
            }
            Step::Stop(reason) => return reason,
        };

        debug!(
            timer = %shared.name,
            task_id = %ctx.task_id,
            execution = ctx.execution,
            lateness_us = u64::try_from(ctx.lateness().as_micros()).unwrap_or(u64::MAX),
            "Firing task"
        );

        if let Err(err) = task.run(&ctx) {
            return ShutdownReason::TaskFailed {
                task_id: ctx.task_id,
                error: format!("{:#}", err),
            };
        }
    }
}

fn next_step(shared: &Shared) -> Step {
    let mut state = shared.state.lock();
    loop {
        while state.queue.is_empty() && state.accepting {
            shared.available.wait(&mut state);
        }

        // Empty and nothing more can arrive
        let Some(head) = state.queue.peek() else {
            return Step::Stop(if state.cancelled {
                ShutdownReason::Cancelled
            } else {
                ShutdownReason::Drained
            });
        };
        let execution_time = head.when;
        let (cancelled, once) = {
            let slot = head.item.slot();
            (slot.state == TaskState::Cancelled, slot.period == Period::Once)
        };

        if cancelled {
            if let Some(entry) = state.queue.pop() {
                return Step::Discard(entry.item);
            }
            continue;
        }

        let now = shared.clock.now();
        if execution_time > now {
            // Woken early by a new head, cancel_all or close; re-evaluate either way
            shared.available.wait_for(&mut state, execution_time - now);
            continue;
        }

        // One-shot tasks leave the queue; repeating ones stay at the head
        let task = if once {
            state.queue.pop().map(|entry| entry.item)
        } else {
            state.queue.peek().map(|head| head.item.clone())
        };
        let Some(task) = task else { continue };

        let mut slot = task.slot();
        // Cancelled between the check above and this lock
        if slot.state == TaskState::Cancelled {
            drop(slot);
            if !once {
                state.queue.pop();
            }
            return Step::Discard(task);
        }
        match slot.period {
            Period::Once => slot.state = TaskState::Executed,
            Period::FixedRate(period) => {
                let next = deadline_after(execution_time, period);
                state.queue.reschedule_min(next);
                slot.next_execution_time = Some(next);
            }
            Period::FixedDelay(period) => {
                let next = deadline_after(now, period);
                state.queue.reschedule_min(next);
                slot.next_execution_time = Some(next);
            }
        }
        slot.executions += 1;

        let ctx = TaskContext {
            task_id: task.id(),
            scheduled_at: execution_time,
            fired_at: now,
            period: slot.period,
            execution: slot.executions,
        };
        drop(slot);
        return Step::Fire(task, ctx);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

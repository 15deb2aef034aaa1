//! Scheduling facade used by producer threads
//!
//! Every operation takes the queue lock briefly; none of them waits for the
//! timer thread.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{self, deadline_after};
use crate::worker::{self, Shared, ShutdownReason};
use crate::{
    Job, Period, RepeatMode, Result, TaskState, TimerConfig, TimerError, TimerTask,
};

/// Delayed and periodic task scheduler backed by a single thread.
///
/// Tasks fire in deadline order on the timer thread. A task body that is
/// slow delays every task behind it; a task body that fails or panics stops
/// the timer for good.
///
/// Dropping the `Timer` behaves like [`close`](Self::close): tasks already
/// queued still run and the thread exits once the queue is empty.
pub struct Timer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    /// Start a timer with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(TimerConfig::default())
    }

    /// Start a timer thread for `config`
    pub fn with_config(config: TimerConfig) -> Result<Self> {
        let shared = Arc::new(Shared::new(&config));
        let thread = worker::spawn(Arc::clone(&shared))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Name of the timer thread
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Run `task` once after `delay`
    pub fn schedule(&self, task: &TimerTask, delay: TimeDelta) -> Result<()> {
        let when = self.after(delay)?;
        self.sched(task, when, Period::Once)
    }

    /// Run `task` once at `time`; a time in the past fires immediately
    pub fn schedule_at(&self, task: &TimerTask, time: DateTime<Utc>) -> Result<()> {
        let when = self.absolute(time)?;
        self.sched(task, when, Period::Once)
    }

    /// Run `task` after `delay`, then `period` after each time it fires
    pub fn schedule_with_fixed_delay(
        &self,
        task: &TimerTask,
        delay: TimeDelta,
        period: TimeDelta,
    ) -> Result<()> {
        let when = self.after(delay)?;
        let period = positive_period(period)?;
        self.sched(task, when, Period::FixedDelay(period))
    }

    /// Fixed-delay repetition starting at `first_time`
    pub fn schedule_with_fixed_delay_from(
        &self,
        task: &TimerTask,
        first_time: DateTime<Utc>,
        period: TimeDelta,
    ) -> Result<()> {
        let when = self.absolute(first_time)?;
        let period = positive_period(period)?;
        self.sched(task, when, Period::FixedDelay(period))
    }

    /// Run `task` after `delay`, then every `period` measured from the first
    /// deadline. Late executions are caught up back to back.
    pub fn schedule_at_fixed_rate(
        &self,
        task: &TimerTask,
        delay: TimeDelta,
        period: TimeDelta,
    ) -> Result<()> {
        let when = self.after(delay)?;
        let period = positive_period(period)?;
        self.sched(task, when, Period::FixedRate(period))
    }

    /// Fixed-rate repetition starting at `first_time`
    pub fn schedule_at_fixed_rate_from(
        &self,
        task: &TimerTask,
        first_time: DateTime<Utc>,
        period: TimeDelta,
    ) -> Result<()> {
        let when = self.absolute(first_time)?;
        let period = positive_period(period)?;
        self.sched(task, when, Period::FixedRate(period))
    }

    /// Wrap `job` in a new task and run it once after `delay`
    pub fn submit<J: Job>(&self, job: J, delay: TimeDelta) -> Result<TimerTask> {
        let task = TimerTask::new(job);
        self.schedule(&task, delay)?;
        Ok(task)
    }

    /// Wrap `job` in a new task and repeat it every `period`
    pub fn submit_repeating<J: Job>(
        &self,
        job: J,
        initial_delay: TimeDelta,
        period: TimeDelta,
        mode: RepeatMode,
    ) -> Result<TimerTask> {
        let when = self.after(initial_delay)?;
        let period = positive_period(period)?;
        let task = TimerTask::new(job);
        self.sched(&task, when, mode.period(period))?;
        Ok(task)
    }

    /// Cancel one task; see [`TimerTask::cancel`].
    ///
    /// Cancellation lives on the task, so this works for a task scheduled on
    /// any timer and does not check that `task` belongs to this one.
    pub fn cancel(&self, task: &TimerTask) -> bool {
        task.cancel()
    }

    /// Stop the timer: refuse new tasks and drop every queued one.
    ///
    /// A task body already running is not interrupted; the thread exits once
    /// it returns. Idempotent.
    pub fn cancel_all(&self) {
        let mut state = self.shared.state.lock();
        let first = state.accepting || !state.cancelled;
        state.accepting = false;
        state.cancelled = true;
        let pending = state.queue.take_all();
        self.shared.available.notify_one();
        drop(state);
        let dropped = pending.len();
        drop(pending);

        if first {
            info!(timer = %self.shared.name, dropped = dropped, "Timer cancelled");
        }
    }

    /// Refuse new tasks but let queued ones run.
    ///
    /// The thread exits once the queue is empty; repeating tasks keep it
    /// alive until they are cancelled.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.accepting {
            state.accepting = false;
            self.shared.available.notify_one();
            debug!(timer = %self.shared.name, queued = state.queue.len(), "Timer closed");
        }
    }

    /// Remove cancelled tasks from the queue and return how many were removed.
    ///
    /// Cancelled tasks are otherwise discarded lazily when they reach the
    /// head of the queue; purging only reclaims memory earlier.
    pub fn purge(&self) -> usize {
        let mut state = self.shared.state.lock();
        let purged = state
            .queue
            .purge_where(|task| task.slot().state == TaskState::Cancelled);
        drop(state);
        let removed = purged.len();
        drop(purged);

        if removed > 0 {
            info!(timer = %self.shared.name, removed = removed, "Purged cancelled tasks");
        }
        removed
    }

    /// Whether new submissions are accepted
    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }

    /// Number of queue entries, including cancelled tasks not yet discarded
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Why the timer thread stopped, once it has
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shared.state.lock().shutdown.clone()
    }

    /// Close the timer and wait for its thread to exit.
    ///
    /// Returns the task failure if a task body took the thread down. Blocks
    /// for as long as repeating tasks remain scheduled; call
    /// [`cancel_all`](Self::cancel_all) first to stop them.
    pub fn join(mut self) -> Result<ShutdownReason> {
        self.close();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| TimerError::Panicked("timer thread panicked".to_string()))?;
        }

        let reason = self
            .shutdown_reason()
            .ok_or_else(|| TimerError::IllegalState("Timer thread exited without a reason".into()))?;
        match reason.to_error() {
            Some(err) => Err(err),
            None => Ok(reason),
        }
    }

    fn after(&self, delay: TimeDelta) -> Result<Instant> {
        let delay = delay
            .to_std()
            .map_err(|_| TimerError::InvalidArgument("Negative delay.".into()))?;
        Ok(deadline_after(self.shared.clock.now(), delay))
    }

    fn absolute(&self, time: DateTime<Utc>) -> Result<Instant> {
        if time.timestamp_millis() < 0 {
            return Err(TimerError::InvalidArgument("Illegal execution time.".into()));
        }
        Ok(clock::to_instant(self.shared.clock.as_ref(), time))
    }

    fn sched(&self, task: &TimerTask, when: Instant, period: Period) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            warn!(timer = %self.shared.name, task_id = %task.id(), "Rejected task: timer not accepting");
            return Err(TimerError::IllegalState("Timer already cancelled.".into()));
        }

        {
            let mut slot = task.slot();
            if slot.state != TaskState::Created {
                return Err(TimerError::InvalidState(format!(
                    "Task already scheduled or cancelled (state {})",
                    slot.state
                )));
            }
            slot.next_execution_time = Some(when);
            slot.period = period;
            slot.state = TaskState::Scheduled;
        }

        state.queue.push(when, task.clone());
        let new_head = state
            .queue
            .peek()
            .is_some_and(|head| head.item.same_task(task));
        if new_head {
            self.shared.available.notify_one();
        }
        drop(state);

        debug!(
            timer = %self.shared.name,
            task_id = %task.id(),
            period_ms = period.signed_millis(),
            new_head = new_head,
            "Task scheduled"
        );
        Ok(())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Timer")
            .field("name", &self.shared.name)
            .field("accepting", &state.accepting)
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

fn positive_period(period: TimeDelta) -> Result<Duration> {
    match period.to_std() {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(TimerError::InvalidArgument("Non-positive period.".into())),
    }
}

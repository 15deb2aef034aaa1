//! ouroboros-timer: delayed and periodic task scheduling
//!
//! Any number of threads submit tasks with a delay, an absolute time and an
//! optional repeat period; one timer thread runs them in deadline order.
//!
//! # Example
//! ```rust,no_run
//! use chrono::TimeDelta;
//! use ouroboros_timer::{Timer, TimerTask};
//!
//! let timer = Timer::new()?;
//! let heartbeat = TimerTask::from_fn(|ctx| {
//!     tracing::info!(execution = ctx.execution, "heartbeat");
//! });
//! timer.schedule_at_fixed_rate(&heartbeat, TimeDelta::zero(), TimeDelta::seconds(5))?;
//!
//! // Later
//! heartbeat.cancel();
//! timer.cancel_all();
//! # Ok::<(), ouroboros_timer::TimerError>(())
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod state;
pub mod task;
pub mod timer;
mod worker;

// Re-exports
pub use clock::{Clock, SystemClock};
pub use config::TimerConfig;
pub use error::TimerError;
pub use queue::{Scheduled, TaskQueue};
pub use state::TaskState;
pub use task::{Job, Period, RepeatMode, TaskContext, TaskId, TimerTask};
pub use timer::Timer;
pub use worker::ShutdownReason;

/// Result type for timer operations
pub type Result<T> = std::result::Result<T, TimerError>;

//! Timer-specific error types

use thiserror::Error;

use crate::TaskId;

/// Timer-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// Malformed scheduling parameters (negative delay, non-positive period)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Task was already scheduled, cancelled or executed
    #[error("Invalid task state: {0}")]
    InvalidState(String),

    /// Timer no longer accepts new tasks
    #[error("Illegal timer state: {0}")]
    IllegalState(String),

    /// A task body returned an error and took the timer thread down
    #[error("Task {task_id} failed: {message}")]
    TaskFailed { task_id: TaskId, message: String },

    /// A task body panicked and took the timer thread down
    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Failed to spawn timer thread: {0}")]
    Spawn(String),
}

impl TimerError {
    /// Returns true if the error was raised synchronously by a bad submission
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            TimerError::InvalidArgument(_)
                | TimerError::InvalidState(_)
                | TimerError::IllegalState(_)
        )
    }

    /// Returns true if the error terminated the timer thread
    pub fn is_fatal(&self) -> bool {
        matches!(self, TimerError::TaskFailed { .. } | TimerError::Panicked(_))
    }
}

impl From<std::io::Error> for TimerError {
    fn from(err: std::io::Error) -> Self {
        TimerError::Spawn(err.to_string())
    }
}

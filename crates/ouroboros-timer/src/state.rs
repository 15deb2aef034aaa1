//! Task state machine

use serde::{Deserialize, Serialize};

/// Task state in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task has not been handed to a timer yet
    #[default]
    Created,
    /// Task sits in a timer queue; repeating tasks stay here between runs
    Scheduled,
    /// One-shot task has fired (or is running right now)
    Executed,
    /// Task was cancelled before it could fire
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled)
    }

    /// Valid state transitions
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Created, Self::Scheduled) => true,
            (Self::Created, Self::Cancelled) => true,

            // Repeating tasks are rescheduled in place
            (Self::Scheduled, Self::Scheduled) => true,
            (Self::Scheduled, Self::Executed) => true,
            (Self::Scheduled, Self::Cancelled) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Scheduled => "SCHEDULED",
            Self::Executed => "EXECUTED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

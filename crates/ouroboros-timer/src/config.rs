//! Timer configuration

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::queue::DEFAULT_CAPACITY;

static NEXT_SERIAL: AtomicUsize = AtomicUsize::new(0);

/// Timer configuration
#[derive(Clone)]
pub struct TimerConfig {
    /// Timer thread name
    pub name: String,
    /// Initial capacity of the task queue
    pub initial_capacity: usize,
    /// Time source for deadlines
    pub clock: Arc<dyn Clock>,
}

impl TimerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for TimerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerConfig")
            .field("name", &self.name)
            .field("initial_capacity", &self.initial_capacity)
            .field("clock", &"dyn Clock")
            .finish()
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            name: format!("Timer-{}", NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)),
            initial_capacity: DEFAULT_CAPACITY,
            clock: Arc::new(SystemClock),
        }
    }
}

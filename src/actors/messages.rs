//! Cycle results and scheduler lifecycle state

use std::time::Duration;

use crate::events::DataSavedEvent;

/// Outcome of one poll-and-save cycle.
///
/// Only `saved` and `errors` reach subscribers; the rest is for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub endpoints: usize,
    pub unreachable: usize,
    pub saved: usize,
    /// Failed writes, duplicates excluded
    pub errors: usize,
    pub duplicates: usize,
    pub sensor_faults: usize,
    pub sanity_skips: usize,
    pub alerts: usize,
    pub recoveries: usize,
    pub elapsed: Duration,
}

impl CycleSummary {
    pub fn data_saved_event(&self) -> DataSavedEvent {
        DataSavedEvent {
            saved: self.saved,
            errors: self.errors,
        }
    }
}

/// Outcome of one alert-check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertCheckSummary {
    pub endpoints: usize,
    pub unreachable: usize,
    /// Readings that went through the alert state tracker
    pub evaluated: usize,
    pub sensor_faults: usize,
    pub sanity_skips: usize,
    pub alerts: usize,
    pub recoveries: usize,
}

/// Lifecycle of a [`Scheduler`](super::scheduler::Scheduler):
/// `Idle -> Running -> Stopping -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl SchedulerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            _ => SchedulerState::Idle,
        }
    }
}

//! Polling engine and its scheduler
//!
//! ## Architecture Overview
//!
//! ```text
//!                       ┌──────────────────┐
//!                       │    Scheduler     │ start / stop / poll_now
//!                       └────────┬─────────┘
//!                 spawns         │          spawns
//!          ┌─────────────────────┴─────────────────────┐
//!  ┌───────▼────────┐                          ┌───────▼────────┐
//!  │ poll-and-save  │  (every 5 min)           │  alert-check   │  (every 5 s)
//!  │     loop       │                          │     loop       │
//!  └───────┬────────┘                          └───────┬────────┘
//!          │           PollingEngine cycles            │
//!          ├──────────► ProbeTransport ◄───────────────┤
//!          ├──────────► ReadingProcessor ◄─────────────┤
//!          ├──────────► AlertStateTracker ◄────────────┤  (one shared store)
//!          ├──► Repository                             │
//!          ├──► NotificationDispatcher (detached) ◄────┤
//!          └──► EventBus ◄─────────────────────────────┘
//! ```
//!
//! The loops share nothing but the alert state store and the event bus.

pub mod cycle;
pub mod messages;
pub mod scheduler;

pub use cycle::PollingEngine;
pub use messages::{AlertCheckSummary, CycleSummary, SchedulerState};
pub use scheduler::Scheduler;

//! Per-reading evaluation: calibration and classification, then the
//! hysteresis that turns classifications into alert transitions.

pub mod alert_state;
pub mod reading;

pub use alert_state::{AlertStateStore, AlertStateTracker, Transition};
pub use reading::{Classification, ProcessOutcome, ReadingProcessor};

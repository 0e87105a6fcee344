//! The practice run state machine and its response timer.

mod alarm;
mod tracker;

pub use alarm::{AlarmState, Expiry, ResponseAlarm};
pub use tracker::{
    CORRECT_SCORE, FinishedRun, INCORRECT_SCORE, ResponseReceipt, SessionState, SessionTracker,
    TrackerSettings,
};

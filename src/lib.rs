//! LMS Notify — Moodle-backed enrollment notifier.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod transport;

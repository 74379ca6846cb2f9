//! Rule evaluation and message dispatch.

pub mod engine;
pub mod rules;

pub use engine::{DispatchEngine, DispatchSummary, SendCheck};
pub use rules::{DedupWindow, Eligibility, Rule, RuleSet};

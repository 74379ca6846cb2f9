//! Notification rules as data.
//!
//! A rule names a template, a language, an eligibility predicate over
//! enrollments, a dedup window, and a variable binding. The engine evaluates
//! rules; nothing here touches the store or the transport.

use chrono::{DateTime, Duration, Utc};

use crate::config::NotifyConfig;
use crate::model::EnrollmentCandidate;

/// Eligibility predicate over enrollments, evaluated by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Progress strictly between 0 and 100.
    InProgress,
    /// Progress at least 100 and course end date exactly `days_ahead` days
    /// from today (0 = ends today, 1 = ends tomorrow).
    CompletedEndingIn { days_ahead: i64 },
}

/// Time span within which a prior PENDING/SENT attempt suppresses a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupWindow {
    /// Any prior attempt blocks, regardless of age.
    Unbounded,
    /// Only attempts created within the last N days block.
    Days(i64),
}

impl DedupWindow {
    /// Lower bound for the dedup query, computed once per dispatch so every
    /// job in the batch uses the same cutoff.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            DedupWindow::Unbounded => None,
            DedupWindow::Days(days) => Some(now - Duration::days(*days)),
        }
    }
}

/// Which template variables a rule renders, in `{{1}}`, `{{2}}`, ... order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableBinding {
    /// `[first_name, course_name, progress]`
    FirstNameCourseProgress,
    /// `[first_name, course_name]`
    FirstNameCourse,
}

/// A named dedup/eligibility policy.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub template_name: String,
    pub language: String,
    pub eligibility: Eligibility,
    pub window: DedupWindow,
    pub variables: VariableBinding,
}

impl Rule {
    /// Render template variables from current enrollment data.
    pub fn render_variables(&self, candidate: &EnrollmentCandidate) -> Vec<String> {
        match self.variables {
            VariableBinding::FirstNameCourseProgress => vec![
                candidate.first_name.clone(),
                candidate.course_name.clone(),
                format_progress(candidate.progress),
            ],
            VariableBinding::FirstNameCourse => vec![
                candidate.first_name.clone(),
                candidate.course_name.clone(),
            ],
        }
    }
}

/// Format a progress percentage rounded to 2 decimal places, keeping at
/// least one decimal ("45.0", "45.5", "45.55").
pub fn format_progress(progress: f64) -> String {
    let rounded = (progress * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.1}")
    } else {
        let two_dp = format!("{rounded:.2}");
        two_dp.trim_end_matches('0').to_string()
    }
}

/// The three enrollment-driven rule families, built from injected config.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub progress: Rule,
    pub review: Rule,
    pub completion: Rule,
}

impl RuleSet {
    pub fn from_config(config: &NotifyConfig) -> Self {
        let templates = &config.templates;
        Self {
            progress: Rule {
                name: "progress-update",
                template_name: templates.progress.clone(),
                language: templates.language.clone(),
                eligibility: Eligibility::InProgress,
                window: DedupWindow::Days(config.progress_dedup_days),
                variables: VariableBinding::FirstNameCourseProgress,
            },
            review: Rule {
                name: "pre-expiry-reminder",
                template_name: templates.review.clone(),
                language: templates.language.clone(),
                eligibility: Eligibility::CompletedEndingIn { days_ahead: 1 },
                window: DedupWindow::Unbounded,
                variables: VariableBinding::FirstNameCourse,
            },
            completion: Rule {
                name: "completion",
                template_name: templates.completion.clone(),
                language: templates.language.clone(),
                eligibility: Eligibility::CompletedEndingIn { days_ahead: 0 },
                window: DedupWindow::Unbounded,
                variables: VariableBinding::FirstNameCourseProgress,
            },
        }
    }

    pub fn all(&self) -> [&Rule; 3] {
        [&self.progress, &self.review, &self.completion]
    }
}

//! Domain rows shared between the store, the dispatch engine, and the
//! progress sync.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A student synchronized from the LMS.
///
/// `phone_number` is the single, explicit contact field — empty string means
/// "no usable phone" and excludes the student from every notification rule.
#[derive(Debug, Clone)]
pub struct Student {
    pub id: i64,
    pub moodle_user_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
}

/// A course synchronized from the LMS.
#[derive(Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub moodle_course_id: i64,
    pub reference_code: Option<String>,
    pub name: String,
    pub end_date: Option<NaiveDate>,
}

/// Association of a student with a course. Unique per (student, course).
///
/// `progress` is written only by the progress sync job; the dispatch engine
/// reads it and tolerates staleness.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub progress: f64,
}

/// Enrollment joined with the student/course fields the dispatch engine
/// needs to render a message. Always re-fetched inside the send-check job so
/// rendering never trusts data captured at dispatch time.
#[derive(Debug, Clone)]
pub struct EnrollmentCandidate {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub first_name: String,
    pub phone_number: String,
    pub course_name: String,
    pub course_end_date: Option<NaiveDate>,
    pub progress: f64,
}

/// Enrollment joined with the Moodle identifiers the progress sync needs.
/// Only enrollments whose student has a Moodle user id are listed.
#[derive(Debug, Clone)]
pub struct EnrollmentSyncRow {
    pub enrollment_id: i64,
    pub moodle_user_id: i64,
    pub moodle_course_id: i64,
}

/// Lifecycle status of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Log entry created, transport call not yet resolved.
    Pending,
    /// Transport returned success.
    Sent,
    /// Transport returned a non-success code, errored, or credentials
    /// were absent.
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SENT" => MessageStatus::Sent,
            "FAILED" => MessageStatus::Failed,
            _ => MessageStatus::Pending,
        }
    }
}

/// One send attempt. Append-only: after creation only `status`,
/// `status_code` and `response_payload` are ever updated.
#[derive(Debug, Clone)]
pub struct MessageLogEntry {
    pub id: i64,
    pub phone_number: String,
    pub template_name: String,
    pub student_id: i64,
    pub course_id: Option<i64>,
    pub variables: Vec<String>,
    pub status: MessageStatus,
    pub status_code: Option<u16>,
    pub response_payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a new log entry (always starts PENDING).
#[derive(Debug, Clone)]
pub struct NewMessageLog {
    pub phone_number: String,
    pub template_name: String,
    pub student_id: i64,
    pub course_id: Option<i64>,
    pub variables: Vec<String>,
}

/// Audit record for an external sync operation (Moodle progress pull, etc.).
#[derive(Debug, Clone)]
pub struct SyncAuditRecord {
    pub service: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub status: String,
    pub message: Option<String>,
}

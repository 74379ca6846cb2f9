//! Unified `Store` trait — single async interface for all persistence.
//!
//! Covers the enrollment/progress read surface consumed by the dispatch
//! engine, the append-only message log, and the sync audit trail.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::dispatch::rules::Eligibility;
use crate::error::DatabaseError;
use crate::model::{
    Course, EnrollmentCandidate, EnrollmentSyncRow, MessageLogEntry, MessageStatus, NewMessageLog,
    Student, SyncAuditRecord,
};

/// Fields for registering a student.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub moodle_user_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
}

/// Fields for registering a course.
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub moodle_course_id: i64,
    pub reference_code: Option<String>,
    pub name: String,
    pub end_date: Option<NaiveDate>,
}

/// Backend-agnostic persistence trait.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Students / courses / enrollments ────────────────────────────

    /// Register a student. Returns the generated id.
    async fn insert_student(&self, student: &NewStudent) -> Result<i64, DatabaseError>;

    /// Get a student by id.
    async fn get_student(&self, id: i64) -> Result<Option<Student>, DatabaseError>;

    /// Register a course. Returns the generated id.
    async fn insert_course(&self, course: &NewCourse) -> Result<i64, DatabaseError>;

    /// Get a course by id.
    async fn get_course(&self, id: i64) -> Result<Option<Course>, DatabaseError>;

    /// Register an enrollment. Fails on a duplicate (student, course) pair.
    async fn insert_enrollment(
        &self,
        student_id: i64,
        course_id: i64,
        progress: f64,
    ) -> Result<i64, DatabaseError>;

    /// Delete an enrollment (unenrollment upstream).
    async fn delete_enrollment(&self, id: i64) -> Result<(), DatabaseError>;

    /// Write back a recomputed progress percentage.
    async fn update_enrollment_progress(&self, id: i64, progress: f64)
    -> Result<(), DatabaseError>;

    /// List enrollments with Moodle identifiers, for the progress sync.
    async fn list_enrollments_for_sync(&self) -> Result<Vec<EnrollmentSyncRow>, DatabaseError>;

    // ── Dispatch read surface ───────────────────────────────────────

    /// List enrollments matching a rule's eligibility predicate.
    ///
    /// Students without a usable phone number are never candidates.
    /// `today` is passed in so date-relative predicates stay testable.
    async fn list_candidates(
        &self,
        eligibility: &Eligibility,
        today: NaiveDate,
    ) -> Result<Vec<EnrollmentCandidate>, DatabaseError>;

    /// Re-fetch a single enrollment with rendering fields.
    ///
    /// Returns `None` if the enrollment vanished — a benign race, not an
    /// error.
    async fn get_candidate(
        &self,
        enrollment_id: i64,
    ) -> Result<Option<EnrollmentCandidate>, DatabaseError>;

    // ── Message log (append-only) ───────────────────────────────────

    /// Create a new log entry with status PENDING. Returns the entry id.
    async fn create_message_log(&self, entry: &NewMessageLog) -> Result<i64, DatabaseError>;

    /// Dedup query: does an entry exist for (student, course, template) with
    /// one of `statuses`, optionally created at or after `created_after`?
    async fn message_log_exists(
        &self,
        student_id: i64,
        course_id: Option<i64>,
        template_name: &str,
        statuses: &[MessageStatus],
        created_after: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError>;

    /// Phone-scoped dedup query (welcome rule: one message per phone and
    /// template, regardless of course).
    async fn message_log_exists_for_phone(
        &self,
        phone_number: &str,
        template_name: &str,
        statuses: &[MessageStatus],
    ) -> Result<bool, DatabaseError>;

    /// Resolve a log entry after the transport call.
    async fn update_message_status(
        &self,
        id: i64,
        status: MessageStatus,
        status_code: Option<u16>,
        response_payload: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Get a log entry by id.
    async fn get_message_log(&self, id: i64) -> Result<Option<MessageLogEntry>, DatabaseError>;

    /// Count log entries for a template (operational visibility and tests).
    async fn count_message_logs(&self, template_name: &str) -> Result<i64, DatabaseError>;

    // ── Sync audit trail ────────────────────────────────────────────

    /// Append an audit record for an external sync operation.
    async fn record_sync_audit(&self, record: &SyncAuditRecord) -> Result<(), DatabaseError>;
}

//! libSQL backend — async `Store` trait implementation.
//!
//! Local file or in-memory databases via libsql's native async API. Schema is
//! created on open; timestamps are stored as RFC 3339 text, dates as
//! `YYYY-MM-DD` text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::dispatch::rules::Eligibility;
use crate::error::DatabaseError;
use crate::model::{
    Course, EnrollmentCandidate, EnrollmentSyncRow, MessageLogEntry, MessageStatus, NewMessageLog,
    Student, SyncAuditRecord,
};
use crate::store::traits::{NewCourse, NewStudent, Store};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and create the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS students (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    moodle_user_id INTEGER UNIQUE,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    phone_number TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS courses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    moodle_course_id INTEGER NOT NULL UNIQUE,
                    reference_code TEXT,
                    name TEXT NOT NULL,
                    end_date TEXT
                );

                CREATE TABLE IF NOT EXISTS enrollments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id INTEGER NOT NULL REFERENCES students(id),
                    course_id INTEGER NOT NULL REFERENCES courses(id),
                    progress REAL NOT NULL DEFAULT 0,
                    UNIQUE(student_id, course_id)
                );

                CREATE TABLE IF NOT EXISTS message_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    phone_number TEXT NOT NULL,
                    template_name TEXT NOT NULL,
                    student_id INTEGER NOT NULL,
                    course_id INTEGER,
                    variables TEXT NOT NULL DEFAULT '[]',
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    status_code INTEGER,
                    response_payload TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_message_log_dedup
                    ON message_log(student_id, course_id, template_name, status, created_at);
                CREATE INDEX IF NOT EXISTS idx_message_log_phone
                    ON message_log(phone_number, template_name, status);

                CREATE TABLE IF NOT EXISTS sync_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    service TEXT NOT NULL,
                    action TEXT NOT NULL,
                    entity_type TEXT NOT NULL,
                    entity_id INTEGER,
                    status TEXT NOT NULL,
                    message TEXT,
                    created_at TEXT NOT NULL
                );",
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Schema init failed: {e}")))?;
        debug!("Schema initialized");
        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(msg)
    } else {
        DatabaseError::Query(msg)
    }
}

/// Parse an RFC 3339 datetime string written by this backend.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn row_to_candidate(row: &libsql::Row) -> Result<EnrollmentCandidate, libsql::Error> {
    let end_date_str: Option<String> = row.get(6)?;
    Ok(EnrollmentCandidate {
        enrollment_id: row.get(0)?,
        student_id: row.get(1)?,
        course_id: row.get(2)?,
        first_name: row.get(3)?,
        phone_number: row.get(4)?,
        course_name: row.get(5)?,
        course_end_date: end_date_str.as_deref().and_then(parse_date),
        progress: row.get(7)?,
    })
}

fn row_to_log_entry(row: &libsql::Row) -> Result<MessageLogEntry, DatabaseError> {
    let variables_str: String = row.get(5).map_err(query_err)?;
    let variables: Vec<String> = serde_json::from_str(&variables_str)
        .map_err(|e| DatabaseError::Serialization(format!("variables column: {e}")))?;
    let status_str: String = row.get(6).map_err(query_err)?;
    let status_code: Option<i64> = row.get(7).map_err(query_err)?;
    let created_str: String = row.get(9).map_err(query_err)?;

    Ok(MessageLogEntry {
        id: row.get(0).map_err(query_err)?,
        phone_number: row.get(1).map_err(query_err)?,
        template_name: row.get(2).map_err(query_err)?,
        student_id: row.get(3).map_err(query_err)?,
        course_id: row.get(4).map_err(query_err)?,
        variables,
        status: MessageStatus::from_str(&status_str),
        status_code: status_code.map(|c| c as u16),
        response_payload: row.get(8).map_err(query_err)?,
        created_at: parse_datetime(&created_str),
    })
}

const CANDIDATE_SELECT: &str = "SELECT e.id, e.student_id, e.course_id, s.first_name, \
     s.phone_number, c.name, c.end_date, e.progress \
     FROM enrollments e \
     JOIN students s ON s.id = e.student_id \
     JOIN courses c ON c.id = e.course_id";

const LOG_SELECT: &str = "SELECT id, phone_number, template_name, student_id, course_id, \
     variables, status, status_code, response_payload, created_at FROM message_log";

// ── Store implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlBackend {
    async fn insert_student(&self, student: &NewStudent) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO students (moodle_user_id, first_name, last_name, email, phone_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                student.moodle_user_id,
                student.first_name.as_str(),
                student.last_name.as_str(),
                student.email.as_str(),
                student.phone_number.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_student(&self, id: i64) -> Result<Option<Student>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, moodle_user_id, first_name, last_name, email, phone_number, created_at
                 FROM students WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let created_str: String = row.get(6).map_err(query_err)?;
                Ok(Some(Student {
                    id: row.get(0).map_err(query_err)?,
                    moodle_user_id: row.get(1).map_err(query_err)?,
                    first_name: row.get(2).map_err(query_err)?,
                    last_name: row.get(3).map_err(query_err)?,
                    email: row.get(4).map_err(query_err)?,
                    phone_number: row.get(5).map_err(query_err)?,
                    created_at: parse_datetime(&created_str),
                }))
            }
            None => Ok(None),
        }
    }

    async fn insert_course(&self, course: &NewCourse) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO courses (moodle_course_id, reference_code, name, end_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                course.moodle_course_id,
                course.reference_code.clone(),
                course.name.as_str(),
                course.end_date.map(|d| d.format("%Y-%m-%d").to_string()),
            ],
        )
        .await
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_course(&self, id: i64) -> Result<Option<Course>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, moodle_course_id, reference_code, name, end_date
                 FROM courses WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let end_date_str: Option<String> = row.get(4).map_err(query_err)?;
                Ok(Some(Course {
                    id: row.get(0).map_err(query_err)?,
                    moodle_course_id: row.get(1).map_err(query_err)?,
                    reference_code: row.get(2).map_err(query_err)?,
                    name: row.get(3).map_err(query_err)?,
                    end_date: end_date_str.as_deref().and_then(parse_date),
                }))
            }
            None => Ok(None),
        }
    }

    async fn insert_enrollment(
        &self,
        student_id: i64,
        course_id: i64,
        progress: f64,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO enrollments (student_id, course_id, progress) VALUES (?1, ?2, ?3)",
            params![student_id, course_id, progress],
        )
        .await
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn delete_enrollment(&self, id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM enrollments WHERE id = ?1", params![id])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn update_enrollment_progress(
        &self,
        id: i64,
        progress: f64,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE enrollments SET progress = ?1 WHERE id = ?2",
                params![progress, id],
            )
            .await
            .map_err(query_err)?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "enrollment".to_string(),
                id,
            });
        }
        Ok(())
    }

    async fn list_enrollments_for_sync(&self) -> Result<Vec<EnrollmentSyncRow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT e.id, s.moodle_user_id, c.moodle_course_id
                 FROM enrollments e
                 JOIN students s ON s.id = e.student_id
                 JOIN courses c ON c.id = e.course_id
                 WHERE s.moodle_user_id IS NOT NULL",
                (),
            )
            .await
            .map_err(query_err)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            result.push(EnrollmentSyncRow {
                enrollment_id: row.get(0).map_err(query_err)?,
                moodle_user_id: row.get(1).map_err(query_err)?,
                moodle_course_id: row.get(2).map_err(query_err)?,
            });
        }
        Ok(result)
    }

    async fn list_candidates(
        &self,
        eligibility: &Eligibility,
        today: NaiveDate,
    ) -> Result<Vec<EnrollmentCandidate>, DatabaseError> {
        let mut rows = match eligibility {
            Eligibility::InProgress => {
                let sql = format!(
                    "{CANDIDATE_SELECT} WHERE e.progress > 0 AND e.progress < 100 \
                     AND s.phone_number <> ''"
                );
                self.conn().query(&sql, ()).await.map_err(query_err)?
            }
            Eligibility::CompletedEndingIn { days_ahead } => {
                let target = today + chrono::Duration::days(*days_ahead);
                let sql = format!(
                    "{CANDIDATE_SELECT} WHERE e.progress >= 100 AND c.end_date = ?1 \
                     AND s.phone_number <> ''"
                );
                self.conn()
                    .query(&sql, params![target.format("%Y-%m-%d").to_string()])
                    .await
                    .map_err(query_err)?
            }
        };

        let mut result = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            result.push(row_to_candidate(&row).map_err(query_err)?);
        }
        Ok(result)
    }

    async fn get_candidate(
        &self,
        enrollment_id: i64,
    ) -> Result<Option<EnrollmentCandidate>, DatabaseError> {
        let sql = format!("{CANDIDATE_SELECT} WHERE e.id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![enrollment_id])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_candidate(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn create_message_log(&self, entry: &NewMessageLog) -> Result<i64, DatabaseError> {
        let variables = serde_json::to_string(&entry.variables)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO message_log (phone_number, template_name, student_id, course_id,
                 variables, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', ?6)",
            params![
                entry.phone_number.as_str(),
                entry.template_name.as_str(),
                entry.student_id,
                entry.course_id,
                variables,
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(query_err)?;
        let id = conn.last_insert_rowid();
        debug!(
            id,
            template = %entry.template_name,
            student_id = entry.student_id,
            "Message log entry created"
        );
        Ok(id)
    }

    async fn message_log_exists(
        &self,
        student_id: i64,
        course_id: Option<i64>,
        template_name: &str,
        statuses: &[MessageStatus],
        created_after: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        if statuses.is_empty() {
            return Ok(false);
        }

        let mut sql = String::from(
            "SELECT 1 FROM message_log WHERE student_id = ?1 AND template_name = ?2",
        );
        let mut values: Vec<libsql::Value> = vec![
            libsql::Value::Integer(student_id),
            libsql::Value::Text(template_name.to_string()),
        ];

        match course_id {
            Some(cid) => {
                values.push(libsql::Value::Integer(cid));
                sql.push_str(&format!(" AND course_id = ?{}", values.len()));
            }
            None => sql.push_str(" AND course_id IS NULL"),
        }

        let placeholders: Vec<String> = statuses
            .iter()
            .map(|s| {
                values.push(libsql::Value::Text(s.as_str().to_string()));
                format!("?{}", values.len())
            })
            .collect();
        sql.push_str(&format!(" AND status IN ({})", placeholders.join(", ")));

        if let Some(bound) = created_after {
            values.push(libsql::Value::Text(bound.to_rfc3339()));
            sql.push_str(&format!(" AND created_at >= ?{}", values.len()));
        }
        sql.push_str(" LIMIT 1");

        let mut rows = self
            .conn()
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(query_err)?;
        Ok(rows.next().await.map_err(query_err)?.is_some())
    }

    async fn message_log_exists_for_phone(
        &self,
        phone_number: &str,
        template_name: &str,
        statuses: &[MessageStatus],
    ) -> Result<bool, DatabaseError> {
        if statuses.is_empty() {
            return Ok(false);
        }

        let mut values: Vec<libsql::Value> = vec![
            libsql::Value::Text(phone_number.to_string()),
            libsql::Value::Text(template_name.to_string()),
        ];
        let placeholders: Vec<String> = statuses
            .iter()
            .map(|s| {
                values.push(libsql::Value::Text(s.as_str().to_string()));
                format!("?{}", values.len())
            })
            .collect();
        let sql = format!(
            "SELECT 1 FROM message_log WHERE phone_number = ?1 AND template_name = ?2 \
             AND status IN ({}) LIMIT 1",
            placeholders.join(", ")
        );

        let mut rows = self
            .conn()
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(query_err)?;
        Ok(rows.next().await.map_err(query_err)?.is_some())
    }

    async fn update_message_status(
        &self,
        id: i64,
        status: MessageStatus,
        status_code: Option<u16>,
        response_payload: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE message_log SET status = ?1, status_code = ?2, response_payload = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    status_code.map(|c| c as i64),
                    response_payload,
                    id,
                ],
            )
            .await
            .map_err(query_err)?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message_log".to_string(),
                id,
            });
        }
        debug!(id, status = status.as_str(), "Message log status updated");
        Ok(())
    }

    async fn get_message_log(&self, id: i64) -> Result<Option<MessageLogEntry>, DatabaseError> {
        let sql = format!("{LOG_SELECT} WHERE id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![id])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_log_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn count_message_logs(&self, template_name: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM message_log WHERE template_name = ?1",
                params![template_name],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => row.get(0).map_err(query_err),
            None => Ok(0),
        }
    }

    async fn record_sync_audit(&self, record: &SyncAuditRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO sync_log (service, action, entity_type, entity_id, status, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.service.as_str(),
                    record.action.as_str(),
                    record.entity_type.as_str(),
                    record.entity_id,
                    record.status.as_str(),
                    record.message.clone(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

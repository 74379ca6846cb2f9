//! Course progress synchronization.
//!
//! Pulls a completion percentage per enrollment from the LMS and writes it
//! back, rounded to two decimals. The provider contract is deliberately
//! narrow: one percentage per (user, course) pair. How the LMS computes it
//! is its own business.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::audit;
use crate::config::MoodleConfig;
use crate::error::{ProviderError, Result};
use crate::store::Store;

/// Computes the current progress percentage for one enrollment.
#[async_trait]
pub trait ProgressProvider: Send + Sync {
    async fn course_progress(
        &self,
        moodle_user_id: i64,
        moodle_course_id: i64,
    ) -> std::result::Result<f64, ProviderError>;
}

// ── Moodle provider ─────────────────────────────────────────────────

/// Moodle web-service client (REST, JSON format).
pub struct MoodleProvider {
    config: MoodleConfig,
    client: reqwest::Client,
}

impl MoodleProvider {
    pub fn new(config: MoodleConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Issue one web-service call. Moodle reports errors as a 200 with an
    /// `exception` object, so both transport and body shape are checked.
    async fn call(
        &self,
        function: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<Value, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![
            ("wstoken", self.config.token.expose_secret().to_string()),
            ("moodlewsrestformat", "json".to_string()),
            ("wsfunction", function.to_string()),
        ];
        query.extend(params.iter().cloned());

        let response = self
            .client
            .get(&self.config.url)
            .query(&query)
            .timeout(Duration::from_secs(20))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("{function}: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{function}: {e}")))?;

        if let Some(exception) = body.get("exception") {
            return Err(ProviderError::RequestFailed(format!(
                "{function}: {exception}"
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl ProgressProvider for MoodleProvider {
    async fn course_progress(
        &self,
        moodle_user_id: i64,
        moodle_course_id: i64,
    ) -> std::result::Result<f64, ProviderError> {
        let body = self
            .call(
                "core_completion_get_course_completion_status",
                &[
                    ("userid", moodle_user_id.to_string()),
                    ("courseid", moodle_course_id.to_string()),
                ],
            )
            .await?;
        parse_progress(&body)
    }
}

/// Extract the percentage from the provider response. Accepts a bare number
/// or an object carrying a numeric `progress` / `percentage` field.
fn parse_progress(body: &Value) -> std::result::Result<f64, ProviderError> {
    let value = if body.is_number() {
        body.as_f64()
    } else {
        body.get("progress")
            .or_else(|| body.get("percentage"))
            .and_then(Value::as_f64)
    };
    match value {
        Some(p) if (0.0..=100.0).contains(&p) => Ok(p),
        Some(p) => Err(ProviderError::InvalidResponse(format!(
            "progress {p} out of range"
        ))),
        None => Err(ProviderError::InvalidResponse(
            "no numeric progress field in response".to_string(),
        )),
    }
}

// ── Sync job ────────────────────────────────────────────────────────

/// Result of one full progress sync pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub updated: usize,
    pub failed: usize,
}

/// Pulls progress for every syncable enrollment and writes it back.
///
/// Each enrollment is retried independently; one unreachable course does not
/// abort the pass.
pub struct ProgressSync {
    store: Arc<dyn Store>,
    provider: Arc<dyn ProgressProvider>,
    attempts: u32,
    retry_delay: Duration,
}

impl ProgressSync {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn ProgressProvider>) -> Self {
        Self {
            store,
            provider,
            attempts: 3,
            retry_delay: Duration::from_secs(30),
        }
    }

    /// Override the retry policy (tests use a zero delay).
    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub async fn run(&self) -> Result<SyncSummary> {
        let rows = self.store.list_enrollments_for_sync().await?;
        info!(enrollments = rows.len(), "Starting progress sync");

        let mut summary = SyncSummary::default();
        for row in rows {
            match self
                .fetch_with_retry(row.moodle_user_id, row.moodle_course_id)
                .await
            {
                Ok(progress) => {
                    let rounded = (progress * 100.0).round() / 100.0;
                    self.store
                        .update_enrollment_progress(row.enrollment_id, rounded)
                        .await?;
                    debug!(
                        enrollment_id = row.enrollment_id,
                        progress = rounded,
                        "Progress updated"
                    );
                    audit::record_best_effort(
                        self.store.as_ref(),
                        audit::sync_ok(
                            "moodle",
                            "progress_sync",
                            "enrollment",
                            Some(row.enrollment_id),
                        ),
                    )
                    .await;
                    summary.updated += 1;
                }
                Err(e) => {
                    warn!(
                        enrollment_id = row.enrollment_id,
                        "Progress sync failed after {} attempts: {e}", self.attempts
                    );
                    audit::record_best_effort(
                        self.store.as_ref(),
                        audit::sync_error(
                            "moodle",
                            "progress_sync",
                            "enrollment",
                            Some(row.enrollment_id),
                            &e.to_string(),
                        ),
                    )
                    .await;
                    summary.failed += 1;
                }
            }
        }

        info!(
            updated = summary.updated,
            failed = summary.failed,
            "Progress sync complete"
        );
        Ok(summary)
    }

    async fn fetch_with_retry(
        &self,
        moodle_user_id: i64,
        moodle_course_id: i64,
    ) -> std::result::Result<f64, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .provider
                .course_progress(moodle_user_id, moodle_course_id)
                .await
            {
                Ok(progress) => return Ok(progress),
                Err(e) if attempt < self.attempts => {
                    debug!(
                        moodle_user_id,
                        moodle_course_id, attempt, "Provider call failed, retrying: {e}"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

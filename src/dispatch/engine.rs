//! Dedup-and-dispatch engine.
//!
//! `dispatch()` fans a rule out into one independent send-check job per
//! eligible enrollment. Each job re-fetches its enrollment, re-derives the
//! rendering inputs, runs the dedup check, and only then creates a PENDING
//! log entry and hands off to the transport.
//!
//! The gap between the dedup check and the log insert is a known race: two
//! concurrent jobs for the same enrollment and rule can both pass the check.
//! Dedup is best-effort, not a delivery guarantee.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::TemplateConfig;
use crate::dispatch::rules::Rule;
use crate::error::Result;
use crate::model::{MessageStatus, NewMessageLog};
use crate::store::Store;
use crate::transport::MessageTransport;

/// Statuses that block a resend. FAILED is deliberately absent so failed
/// sends are retried by the next scheduled pass.
const DEDUP_STATUSES: [MessageStatus; 2] = [MessageStatus::Pending, MessageStatus::Sent];

/// Outcome of one send-check job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendCheck {
    /// Transport accepted the message; log entry is SENT.
    Sent { log_id: i64 },
    /// Transport refused or errored; log entry is FAILED.
    Failed { log_id: i64 },
    /// A PENDING/SENT entry already covers this (student, course, template).
    SkippedDuplicate,
    /// The enrollment vanished between dispatch and job execution.
    SkippedMissing,
    /// The student no longer has a usable phone number.
    SkippedNoPhone,
}

/// Aggregate result of one rule dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub candidates: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Jobs that errored before reaching the transport (store failures,
    /// panics). These did not produce a log entry.
    pub errors: usize,
}

/// Decides send-or-skip per enrollment and rule, and owns all message-log
/// bookkeeping around the transport call.
pub struct DispatchEngine {
    store: Arc<dyn Store>,
    transport: Arc<dyn MessageTransport>,
    templates: TemplateConfig,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn MessageTransport>,
        templates: TemplateConfig,
    ) -> Self {
        Self {
            store,
            transport,
            templates,
        }
    }

    /// Fan a rule out into independent per-enrollment send-check jobs.
    ///
    /// The dedup cutoff is computed once here so every job in the batch uses
    /// the same lower bound. Safe to re-run: the dedup check makes repeated
    /// dispatches idempotent.
    pub async fn dispatch(self: &Arc<Self>, rule: &Rule) -> Result<DispatchSummary> {
        let now = Utc::now();
        let cutoff = rule.window.cutoff(now);
        let candidates = self
            .store
            .list_candidates(&rule.eligibility, now.date_naive())
            .await?;

        info!(
            rule = rule.name,
            candidates = candidates.len(),
            "Dispatching rule"
        );

        let mut jobs = JoinSet::new();
        for candidate in &candidates {
            let engine = Arc::clone(self);
            let rule = rule.clone();
            let enrollment_id = candidate.enrollment_id;
            jobs.spawn(async move { engine.send_check(enrollment_id, &rule, cutoff).await });
        }

        let mut summary = DispatchSummary {
            candidates: candidates.len(),
            ..Default::default()
        };
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(Ok(SendCheck::Sent { .. })) => summary.sent += 1,
                Ok(Ok(SendCheck::Failed { .. })) => summary.failed += 1,
                Ok(Ok(_)) => summary.skipped += 1,
                Ok(Err(e)) => {
                    warn!(rule = rule.name, "Send-check job failed: {e}");
                    summary.errors += 1;
                }
                Err(e) => {
                    warn!(rule = rule.name, "Send-check job panicked: {e}");
                    summary.errors += 1;
                }
            }
        }

        info!(
            rule = rule.name,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            errors = summary.errors,
            "Dispatch complete"
        );
        Ok(summary)
    }

    /// Per-enrollment unit of work: re-fetch, dedup check, send, record.
    ///
    /// Idempotent under at-least-once redelivery: a re-run finds the entry
    /// the first run created and skips. Transport failures are recorded as
    /// FAILED and never propagate out of the job.
    pub async fn send_check(
        &self,
        enrollment_id: i64,
        rule: &Rule,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<SendCheck> {
        // Re-fetch: disappearance is a benign race, not an error.
        let Some(candidate) = self.store.get_candidate(enrollment_id).await? else {
            debug!(enrollment_id, rule = rule.name, "Enrollment gone, skipping");
            return Ok(SendCheck::SkippedMissing);
        };

        // Re-derive everything from current data; the candidate row captured
        // at dispatch time may be stale.
        if candidate.phone_number.is_empty() {
            debug!(enrollment_id, rule = rule.name, "No phone number, skipping");
            return Ok(SendCheck::SkippedNoPhone);
        }

        let already_attempted = self
            .store
            .message_log_exists(
                candidate.student_id,
                Some(candidate.course_id),
                &rule.template_name,
                &DEDUP_STATUSES,
                cutoff,
            )
            .await?;
        if already_attempted {
            debug!(
                enrollment_id,
                rule = rule.name,
                template = %rule.template_name,
                "Recent attempt exists, skipping"
            );
            return Ok(SendCheck::SkippedDuplicate);
        }

        let variables = rule.render_variables(&candidate);
        let log_id = self
            .store
            .create_message_log(&NewMessageLog {
                phone_number: candidate.phone_number.clone(),
                template_name: rule.template_name.clone(),
                student_id: candidate.student_id,
                course_id: Some(candidate.course_id),
                variables: variables.clone(),
            })
            .await?;

        self.deliver(
            log_id,
            rule.name,
            &candidate.phone_number,
            &rule.template_name,
            &rule.language,
            &variables,
        )
        .await
    }

    /// Send a one-off welcome message when an enrollment is registered.
    ///
    /// Dedup is phone-scoped and unbounded: one welcome per phone and
    /// template, ever.
    pub async fn send_welcome(&self, student_id: i64) -> Result<SendCheck> {
        let Some(student) = self.store.get_student(student_id).await? else {
            debug!(student_id, "Student gone, skipping welcome");
            return Ok(SendCheck::SkippedMissing);
        };
        if student.phone_number.is_empty() {
            return Ok(SendCheck::SkippedNoPhone);
        }

        let template = self.templates.welcome.clone();
        let already_sent = self
            .store
            .message_log_exists_for_phone(&student.phone_number, &template, &DEDUP_STATUSES)
            .await?;
        if already_sent {
            return Ok(SendCheck::SkippedDuplicate);
        }

        let log_id = self
            .store
            .create_message_log(&NewMessageLog {
                phone_number: student.phone_number.clone(),
                template_name: template.clone(),
                student_id,
                course_id: None,
                variables: vec![],
            })
            .await?;

        self.deliver(
            log_id,
            "welcome",
            &student.phone_number,
            &template,
            &self.templates.welcome_language,
            &[],
        )
        .await
    }

    /// Invoke the transport and resolve the log entry. One attempt, one
    /// status transition; errors end as FAILED, never as a propagated error.
    #[allow(clippy::too_many_arguments)]
    async fn deliver(
        &self,
        log_id: i64,
        rule_name: &str,
        recipient: &str,
        template_name: &str,
        language: &str,
        variables: &[String],
    ) -> Result<SendCheck> {
        match self
            .transport
            .send_template(recipient, template_name, language, variables)
            .await
        {
            Ok(outcome) => {
                let status = if outcome.is_success() {
                    MessageStatus::Sent
                } else {
                    MessageStatus::Failed
                };
                self.store
                    .update_message_status(
                        log_id,
                        status,
                        Some(outcome.status_code),
                        Some(&outcome.body),
                    )
                    .await?;
                if status == MessageStatus::Sent {
                    info!(log_id, rule = rule_name, "Message sent");
                    Ok(SendCheck::Sent { log_id })
                } else {
                    warn!(
                        log_id,
                        rule = rule_name,
                        status_code = outcome.status_code,
                        "Provider refused message"
                    );
                    Ok(SendCheck::Failed { log_id })
                }
            }
            Err(e) => {
                warn!(log_id, rule = rule_name, "Transport call failed: {e}");
                self.store
                    .update_message_status(log_id, MessageStatus::Failed, None, Some(&e.to_string()))
                    .await?;
                Ok(SendCheck::Failed { log_id })
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::config::NotifyConfig;
    use crate::dispatch::rules::RuleSet;
    use crate::error::TransportError;
    use crate::store::{LibSqlBackend, NewCourse, NewStudent};
    use crate::transport::SendOutcome;

    /// What the mock transport should do on each call.
    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Ok200,
        Status(u16),
        MalformedBody,
        NetworkError,
        MissingCredentials,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct RecordedCall {
        recipient: String,
        template: String,
        language: String,
        variables: Vec<String>,
    }

    struct MockTransport {
        behavior: Behavior,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl MockTransport {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageTransport for MockTransport {
        async fn send_template(
            &self,
            recipient: &str,
            template_name: &str,
            language: &str,
            variables: &[String],
        ) -> std::result::Result<SendOutcome, TransportError> {
            self.calls.lock().unwrap().push(RecordedCall {
                recipient: recipient.to_string(),
                template: template_name.to_string(),
                language: language.to_string(),
                variables: variables.to_vec(),
            });
            match self.behavior {
                Behavior::Ok200 => Ok(SendOutcome {
                    status_code: 200,
                    body: "{\"messages\":[{\"id\":\"wamid.test\"}]}".to_string(),
                }),
                Behavior::Status(code) => Ok(SendOutcome {
                    status_code: code,
                    body: "{\"error\":{\"message\":\"refused\"}}".to_string(),
                }),
                Behavior::MalformedBody => Ok(SendOutcome {
                    status_code: 200,
                    body: "<html>bad gateway</html>".to_string(),
                }),
                Behavior::NetworkError => Err(TransportError::RequestFailed {
                    endpoint: "http://test".to_string(),
                    reason: "connection reset".to_string(),
                }),
                Behavior::MissingCredentials => Err(TransportError::MissingCredentials),
            }
        }
    }

    struct Fixture {
        store: Arc<LibSqlBackend>,
        transport: Arc<MockTransport>,
        engine: Arc<DispatchEngine>,
        rules: RuleSet,
    }

    async fn fixture(behavior: Behavior) -> Fixture {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = MockTransport::new(behavior);
        let config = NotifyConfig::default();
        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&transport) as Arc<dyn MessageTransport>,
            config.templates.clone(),
        ));
        let rules = RuleSet::from_config(&config);
        Fixture {
            store,
            transport,
            engine,
            rules,
        }
    }

    async fn seed(
        store: &LibSqlBackend,
        n: i64,
        phone: &str,
        progress: f64,
        end_date: Option<NaiveDate>,
    ) -> (i64, i64, i64) {
        let student_id = store
            .insert_student(&NewStudent {
                moodle_user_id: Some(1000 + n),
                first_name: "Ana".to_string(),
                last_name: "Lopez".to_string(),
                email: format!("ana{n}@example.com"),
                phone_number: phone.to_string(),
            })
            .await
            .unwrap();
        let course_id = store
            .insert_course(&NewCourse {
                moodle_course_id: 2000 + n,
                reference_code: None,
                name: format!("Course {n}"),
                end_date,
            })
            .await
            .unwrap();
        let enrollment_id = store
            .insert_enrollment(student_id, course_id, progress)
            .await
            .unwrap();
        (enrollment_id, student_id, course_id)
    }

    // ── Scenario A: clean send ──────────────────────────────────────

    #[tokio::test]
    async fn first_send_creates_entry_and_transitions_to_sent() {
        let fx = fixture(Behavior::Ok200).await;
        let (enrollment_id, student_id, course_id) =
            seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        let SendCheck::Sent { log_id } = outcome else {
            panic!("expected Sent, got {outcome:?}");
        };

        let calls = fx.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].recipient, "34600000001");
        assert_eq!(calls[0].template, "progress_student_service_v1");
        assert_eq!(calls[0].language, "es");
        assert_eq!(calls[0].variables, vec!["Ana", "Course 1", "45.0"]);

        let entry = fx.store.get_message_log(log_id).await.unwrap().unwrap();
        assert_eq!(entry.status, MessageStatus::Sent);
        assert_eq!(entry.status_code, Some(200));
        assert_eq!(entry.student_id, student_id);
        assert_eq!(entry.course_id, Some(course_id));
        assert_eq!(entry.variables, vec!["Ana", "Course 1", "45.0"]);
    }

    // ── Scenario B: dedup skip ──────────────────────────────────────

    #[tokio::test]
    async fn recent_sent_entry_blocks_resend() {
        let fx = fixture(Behavior::Ok200).await;
        let (enrollment_id, student_id, course_id) =
            seed(&fx.store, 1, "34600000001", 45.0, None).await;

        // Prior SENT entry, created just now — inside any window.
        let prior = fx
            .store
            .create_message_log(&NewMessageLog {
                phone_number: "34600000001".to_string(),
                template_name: "progress_student_service_v1".to_string(),
                student_id,
                course_id: Some(course_id),
                variables: vec![],
            })
            .await
            .unwrap();
        fx.store
            .update_message_status(prior, MessageStatus::Sent, Some(200), None)
            .await
            .unwrap();

        let cutoff = Some(Utc::now() - Duration::days(2));
        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, cutoff)
            .await
            .unwrap();

        assert_eq!(outcome, SendCheck::SkippedDuplicate);
        assert!(fx.transport.calls().is_empty());
        assert_eq!(
            fx.store
                .count_message_logs("progress_student_service_v1")
                .await
                .unwrap(),
            1
        );
    }

    // ── Scenario C: enrollment vanished ─────────────────────────────

    #[tokio::test]
    async fn missing_enrollment_skips_silently() {
        let fx = fixture(Behavior::Ok200).await;
        let (enrollment_id, ..) = seed(&fx.store, 1, "34600000001", 45.0, None).await;
        fx.store.delete_enrollment(enrollment_id).await.unwrap();

        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();

        assert_eq!(outcome, SendCheck::SkippedMissing);
        assert!(fx.transport.calls().is_empty());
        assert_eq!(
            fx.store
                .count_message_logs("progress_student_service_v1")
                .await
                .unwrap(),
            0
        );
    }

    // ── Scenario D: transport exception ─────────────────────────────

    #[tokio::test]
    async fn network_error_marks_failed_without_propagating() {
        let fx = fixture(Behavior::NetworkError).await;
        let (enrollment_id, ..) = seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        let SendCheck::Failed { log_id } = outcome else {
            panic!("expected Failed, got {outcome:?}");
        };

        let entry = fx.store.get_message_log(log_id).await.unwrap().unwrap();
        assert_eq!(entry.status, MessageStatus::Failed);
        assert!(entry.status_code.is_none());
        assert!(
            entry
                .response_payload
                .unwrap()
                .contains("connection reset")
        );
    }

    // ── Status transitions ──────────────────────────────────────────

    #[tokio::test]
    async fn non_200_status_marks_failed() {
        let fx = fixture(Behavior::Status(401)).await;
        let (enrollment_id, ..) = seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        let SendCheck::Failed { log_id } = outcome else {
            panic!("expected Failed, got {outcome:?}");
        };
        let entry = fx.store.get_message_log(log_id).await.unwrap().unwrap();
        assert_eq!(entry.status, MessageStatus::Failed);
        assert_eq!(entry.status_code, Some(401));
    }

    #[tokio::test]
    async fn malformed_response_body_marks_failed() {
        let fx = fixture(Behavior::MalformedBody).await;
        let (enrollment_id, ..) = seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        assert!(matches!(outcome, SendCheck::Failed { .. }));
    }

    #[tokio::test]
    async fn missing_credentials_marks_failed_immediately() {
        let fx = fixture(Behavior::MissingCredentials).await;
        let (enrollment_id, ..) = seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        let SendCheck::Failed { log_id } = outcome else {
            panic!("expected Failed, got {outcome:?}");
        };
        let entry = fx.store.get_message_log(log_id).await.unwrap().unwrap();
        assert_eq!(entry.status, MessageStatus::Failed);
    }

    // ── Idempotence under redelivery ────────────────────────────────

    #[tokio::test]
    async fn rerun_after_success_skips() {
        let fx = fixture(Behavior::Ok200).await;
        let (enrollment_id, ..) = seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let first = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        assert!(matches!(first, SendCheck::Sent { .. }));

        let second = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        assert_eq!(second, SendCheck::SkippedDuplicate);
        assert_eq!(fx.transport.calls().len(), 1);
        assert_eq!(
            fx.store
                .count_message_logs("progress_student_service_v1")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn pending_entry_blocks_redelivered_job() {
        let fx = fixture(Behavior::Ok200).await;
        let (enrollment_id, student_id, course_id) =
            seed(&fx.store, 1, "34600000001", 45.0, None).await;

        // First delivery attempt died after creating the PENDING entry.
        fx.store
            .create_message_log(&NewMessageLog {
                phone_number: "34600000001".to_string(),
                template_name: "progress_student_service_v1".to_string(),
                student_id,
                course_id: Some(course_id),
                variables: vec![],
            })
            .await
            .unwrap();

        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        assert_eq!(outcome, SendCheck::SkippedDuplicate);
        assert!(fx.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_entry_does_not_block_retry() {
        let fx = fixture(Behavior::Ok200).await;
        let (enrollment_id, student_id, course_id) =
            seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let prior = fx
            .store
            .create_message_log(&NewMessageLog {
                phone_number: "34600000001".to_string(),
                template_name: "progress_student_service_v1".to_string(),
                student_id,
                course_id: Some(course_id),
                variables: vec![],
            })
            .await
            .unwrap();
        fx.store
            .update_message_status(prior, MessageStatus::Failed, Some(500), None)
            .await
            .unwrap();

        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, None)
            .await
            .unwrap();
        assert!(matches!(outcome, SendCheck::Sent { .. }));
        assert_eq!(
            fx.store
                .count_message_logs("progress_student_service_v1")
                .await
                .unwrap(),
            2
        );
    }

    // ── Window correctness ──────────────────────────────────────────

    #[tokio::test]
    async fn entry_older_than_window_is_stale() {
        let fx = fixture(Behavior::Ok200).await;
        let (enrollment_id, student_id, course_id) =
            seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let prior = fx
            .store
            .create_message_log(&NewMessageLog {
                phone_number: "34600000001".to_string(),
                template_name: "progress_student_service_v1".to_string(),
                student_id,
                course_id: Some(course_id),
                variables: vec![],
            })
            .await
            .unwrap();
        fx.store
            .update_message_status(prior, MessageStatus::Sent, Some(200), None)
            .await
            .unwrap();

        // Cutoff after the prior entry's creation: the entry is outside the
        // window, so the send proceeds.
        let cutoff = Some(Utc::now() + Duration::hours(1));
        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, cutoff)
            .await
            .unwrap();
        assert!(matches!(outcome, SendCheck::Sent { .. }));

        // Cutoff before the creation: the entry blocks.
        let cutoff = Some(Utc::now() - Duration::days(1));
        let outcome = fx
            .engine
            .send_check(enrollment_id, &fx.rules.progress, cutoff)
            .await
            .unwrap();
        assert_eq!(outcome, SendCheck::SkippedDuplicate);
    }

    // ── Dispatch fan-out ────────────────────────────────────────────

    #[tokio::test]
    async fn dispatch_sends_to_each_eligible_enrollment() {
        let fx = fixture(Behavior::Ok200).await;
        seed(&fx.store, 1, "34600000001", 45.0, None).await;
        seed(&fx.store, 2, "34600000002", 99.9, None).await;
        seed(&fx.store, 3, "34600000003", 1.0, None).await;
        // Not eligible: boundaries and missing phone
        seed(&fx.store, 4, "34600000004", 0.0, None).await;
        seed(&fx.store, 5, "34600000005", 100.0, None).await;
        seed(&fx.store, 6, "", 50.0, None).await;

        let summary = fx.engine.dispatch(&fx.rules.progress).await.unwrap();
        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.sent, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.errors, 0);
        assert_eq!(fx.transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn dispatch_rerun_is_idempotent() {
        let fx = fixture(Behavior::Ok200).await;
        seed(&fx.store, 1, "34600000001", 45.0, None).await;

        let first = fx.engine.dispatch(&fx.rules.progress).await.unwrap();
        assert_eq!(first.sent, 1);

        let second = fx.engine.dispatch(&fx.rules.progress).await.unwrap();
        assert_eq!(second.sent, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(fx.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn completion_dispatch_targets_courses_ending_today() {
        let fx = fixture(Behavior::Ok200).await;
        let today = Utc::now().date_naive();
        seed(&fx.store, 1, "34600000001", 100.0, Some(today)).await;
        seed(
            &fx.store,
            2,
            "34600000002",
            100.0,
            Some(today + Duration::days(1)),
        )
        .await;
        seed(&fx.store, 3, "34600000003", 60.0, Some(today)).await;

        let summary = fx.engine.dispatch(&fx.rules.completion).await.unwrap();
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.sent, 1);

        let calls = fx.transport.calls();
        assert_eq!(calls[0].template, "completion_student_service_v1");
        assert_eq!(calls[0].variables, vec!["Ana", "Course 1", "100.0"]);
    }

    #[tokio::test]
    async fn review_dispatch_sends_two_variables() {
        let fx = fixture(Behavior::Ok200).await;
        let tomorrow = Utc::now().date_naive() + Duration::days(1);
        seed(&fx.store, 1, "34600000001", 100.0, Some(tomorrow)).await;

        let summary = fx.engine.dispatch(&fx.rules.review).await.unwrap();
        assert_eq!(summary.sent, 1);

        let calls = fx.transport.calls();
        assert_eq!(calls[0].template, "review_student_service_v1");
        assert_eq!(calls[0].variables, vec!["Ana", "Course 1"]);
    }

    // ── Welcome ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn welcome_sends_once_per_phone() {
        let fx = fixture(Behavior::Ok200).await;
        let (_, student_id, _) = seed(&fx.store, 1, "34600000001", 0.0, None).await;

        let first = fx.engine.send_welcome(student_id).await.unwrap();
        assert!(matches!(first, SendCheck::Sent { .. }));

        let second = fx.engine.send_welcome(student_id).await.unwrap();
        assert_eq!(second, SendCheck::SkippedDuplicate);

        let calls = fx.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].template, "welcome_student_service_v1");
        assert_eq!(calls[0].language, "en_US");
        assert!(calls[0].variables.is_empty());
    }

    #[tokio::test]
    async fn welcome_skips_student_without_phone() {
        let fx = fixture(Behavior::Ok200).await;
        let (_, student_id, _) = seed(&fx.store, 1, "", 0.0, None).await;

        let outcome = fx.engine.send_welcome(student_id).await.unwrap();
        assert_eq!(outcome, SendCheck::SkippedNoPhone);
        assert!(fx.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn welcome_skips_missing_student() {
        let fx = fixture(Behavior::Ok200).await;
        let outcome = fx.engine.send_welcome(424242).await.unwrap();
        assert_eq!(outcome, SendCheck::SkippedMissing);
    }
}

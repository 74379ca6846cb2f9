//! Configuration types.
//!
//! Everything the notifier needs — transport credentials, template names,
//! dedup windows, schedules — is injected through [`NotifyConfig`] and
//! validated once at startup. No module-level template constants.

use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

/// WhatsApp Cloud API credentials.
///
/// Both fields may be absent: the transport then fails each send immediately
/// (recorded as FAILED) without attempting a network call.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub token: Option<SecretString>,
    pub phone_id: Option<String>,
    /// API base, overridable for tests.
    pub api_base: String,
}

impl WhatsAppConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://graph.facebook.com/v22.0";

    /// Build from `WHATSAPP_TOKEN` / `WHATSAPP_PHONE_ID` / `WHATSAPP_API_BASE`.
    pub fn from_env() -> Self {
        Self {
            token: std::env::var("WHATSAPP_TOKEN")
                .ok()
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            phone_id: std::env::var("WHATSAPP_PHONE_ID")
                .ok()
                .filter(|p| !p.is_empty()),
            api_base: std::env::var("WHATSAPP_API_BASE")
                .unwrap_or_else(|_| Self::DEFAULT_API_BASE.to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some() && self.phone_id.is_some()
    }
}

/// Moodle web-service endpoint for the progress data contract.
#[derive(Debug, Clone)]
pub struct MoodleConfig {
    pub url: String,
    pub token: SecretString,
}

impl MoodleConfig {
    /// Returns `None` if `MOODLE_URL` is not set (progress sync disabled).
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("MOODLE_URL").ok()?;
        let token = std::env::var("MOODLE_TOKEN").unwrap_or_default();
        Some(Self {
            url,
            token: SecretString::from(token),
        })
    }
}

/// Template names and language codes for the built-in rules.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub progress: String,
    pub review: String,
    pub completion: String,
    pub welcome: String,
    /// Language code for the enrollment-driven rules.
    pub language: String,
    /// The welcome template lives in a different Meta language bucket.
    pub welcome_language: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            progress: "progress_student_service_v1".to_string(),
            review: "review_student_service_v1".to_string(),
            completion: "completion_student_service_v1".to_string(),
            welcome: "welcome_student_service_v1".to_string(),
            language: "es".to_string(),
            welcome_language: "en_US".to_string(),
        }
    }
}

/// Cron expressions (6-field, with seconds) for the scheduled entry points.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub progress_rule: String,
    pub review_rule: String,
    pub completion_rule: String,
    pub progress_sync: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            // Progress nudges every 30 minutes; date-driven rules once a day.
            progress_rule: "0 */30 * * * *".to_string(),
            review_rule: "0 0 9 * * *".to_string(),
            completion_rule: "0 0 10 * * *".to_string(),
            progress_sync: "0 15 * * * *".to_string(),
        }
    }
}

/// Top-level notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub db_path: String,
    pub whatsapp: WhatsAppConfig,
    pub moodle: Option<MoodleConfig>,
    pub templates: TemplateConfig,
    pub schedules: ScheduleConfig,
    /// Dedup window for the progress rule, in days.
    pub progress_dedup_days: i64,
    /// Scheduler tick resolution in seconds.
    pub tick_secs: u64,
}

impl NotifyConfig {
    /// Build config from environment variables and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut templates = TemplateConfig::default();
        if let Ok(t) = std::env::var("NOTIFY_PROGRESS_TEMPLATE") {
            templates.progress = t;
        }
        if let Ok(t) = std::env::var("NOTIFY_REVIEW_TEMPLATE") {
            templates.review = t;
        }
        if let Ok(t) = std::env::var("NOTIFY_COMPLETION_TEMPLATE") {
            templates.completion = t;
        }
        if let Ok(t) = std::env::var("NOTIFY_WELCOME_TEMPLATE") {
            templates.welcome = t;
        }
        if let Ok(l) = std::env::var("NOTIFY_LANGUAGE") {
            templates.language = l;
        }

        let mut schedules = ScheduleConfig::default();
        if let Ok(s) = std::env::var("NOTIFY_PROGRESS_CRON") {
            schedules.progress_rule = s;
        }
        if let Ok(s) = std::env::var("NOTIFY_REVIEW_CRON") {
            schedules.review_rule = s;
        }
        if let Ok(s) = std::env::var("NOTIFY_COMPLETION_CRON") {
            schedules.completion_rule = s;
        }
        if let Ok(s) = std::env::var("NOTIFY_SYNC_CRON") {
            schedules.progress_sync = s;
        }

        let progress_dedup_days: i64 = std::env::var("NOTIFY_PROGRESS_DEDUP_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);

        let tick_secs: u64 = std::env::var("NOTIFY_TICK_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let config = Self {
            db_path: std::env::var("NOTIFY_DB_PATH")
                .unwrap_or_else(|_| "./data/lms-notify.db".to_string()),
            whatsapp: WhatsAppConfig::from_env(),
            moodle: MoodleConfig::from_env(),
            templates,
            schedules,
            progress_dedup_days,
            tick_secs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate values that would otherwise fail at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progress_dedup_days < 1 {
            return Err(ConfigError::InvalidValue {
                key: "NOTIFY_PROGRESS_DEDUP_DAYS".to_string(),
                message: format!("must be >= 1, got {}", self.progress_dedup_days),
            });
        }
        if self.tick_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "NOTIFY_TICK_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        for (key, expr) in [
            ("NOTIFY_PROGRESS_CRON", &self.schedules.progress_rule),
            ("NOTIFY_REVIEW_CRON", &self.schedules.review_rule),
            ("NOTIFY_COMPLETION_CRON", &self.schedules.completion_rule),
            ("NOTIFY_SYNC_CRON", &self.schedules.progress_sync),
        ] {
            cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("invalid cron expression {expr:?}: {e}"),
            })?;
        }
        for (key, name) in [
            ("NOTIFY_PROGRESS_TEMPLATE", &self.templates.progress),
            ("NOTIFY_REVIEW_TEMPLATE", &self.templates.review),
            ("NOTIFY_COMPLETION_TEMPLATE", &self.templates.completion),
            ("NOTIFY_WELCOME_TEMPLATE", &self.templates.welcome),
        ] {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "template name must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/lms-notify.db".to_string(),
            whatsapp: WhatsAppConfig {
                token: None,
                phone_id: None,
                api_base: WhatsAppConfig::DEFAULT_API_BASE.to_string(),
            },
            moodle: None,
            templates: TemplateConfig::default(),
            schedules: ScheduleConfig::default(),
            progress_dedup_days: 2,
            tick_secs: 30,
        }
    }
}

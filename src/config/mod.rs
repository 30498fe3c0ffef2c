//! Service configuration read from `nudge.toml`.
//!
//! Every section and field has a default, so an empty (or missing) file is a
//! valid local-development configuration. Environment variables are applied on
//! top of the file, after `.env` has been loaded.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 8080
//! callback_base_url = "https://nudge.example.com"
//!
//! [windows]
//! remind_after = "10m"
//! escalate_after = "30m"
//!
//! [store]
//! db_path = ".nudge/nudge.db"
//!
//! [slack]
//! signing_secret = "..."
//! client_id = "..."
//! client_secret = "..."
//!
//! [scheduler]
//! backend = "local"          # or "cloud_tasks"
//! poll_interval = "5s"
//!
//! [messages]
//! remind = "<@{user}> please take a look when you can."
//!
//! [logging]
//! format = "pretty"          # or "json"
//! ```

pub mod duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use duration::{format_duration, parse_duration};

use crate::reminder::{LifecycleConfig, MessageTemplates};

pub const DEFAULT_CONFIG_FILE: &str = "nudge.toml";

/// HTTP listener and callback addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL the scheduler calls back into (e.g. `https://nudge.example.com`).
    #[serde(default)]
    pub callback_base_url: Option<String>,
    /// When set, `/check/*` requests must carry `Authorization: Bearer <token>`.
    #[serde(default)]
    pub callback_token: Option<String>,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            callback_base_url: None,
            callback_token: None,
        }
    }
}

/// Reminder and escalation windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    #[serde(default = "default_remind_after")]
    pub remind_after: String,
    #[serde(default = "default_escalate_after")]
    pub escalate_after: String,
    #[serde(default = "default_flag_write_attempts")]
    pub flag_write_attempts: u32,
}

fn default_remind_after() -> String {
    "10m".to_string()
}

fn default_escalate_after() -> String {
    "30m".to_string()
}

fn default_flag_write_attempts() -> u32 {
    3
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            remind_after: default_remind_after(),
            escalate_after: default_escalate_after(),
            flag_write_attempts: default_flag_write_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".nudge/nudge.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Slack app credentials and Web API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub oauth_redirect_url: Option<String>,
    /// Secret name prefix for per-team bot tokens.
    #[serde(default = "default_token_prefix")]
    pub token_prefix: String,
    /// `limit` passed to `conversations.replies`; only the first page is read.
    #[serde(default = "default_reply_page_limit")]
    pub reply_page_limit: u32,
    /// Also watch plain channel `message` events, not just `app_mention`.
    #[serde(default)]
    pub watch_channel_messages: bool,
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_token_prefix() -> String {
    "slack_token_".to_string()
}

fn default_reply_page_limit() -> u32 {
    200
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: default_slack_api_base(),
            signing_secret: None,
            client_id: None,
            client_secret: None,
            oauth_redirect_url: None,
            token_prefix: default_token_prefix(),
            reply_page_limit: default_reply_page_limit(),
            watch_channel_messages: false,
        }
    }
}

impl SlackConfig {
    /// Secret name holding the bot token of `team_id`.
    pub fn token_secret_name(&self, team_id: &str) -> String {
        format!("{}{}", self.token_prefix, team_id)
    }
}

/// Which scheduler delivers the remind/escalate callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerBackend {
    /// SQLite-backed queue drained by the in-process worker.
    #[default]
    Local,
    /// Google Cloud Tasks HTTP targets.
    CloudTasks,
}

impl std::fmt::Display for SchedulerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerBackend::Local => write!(f, "local"),
            SchedulerBackend::CloudTasks => write!(f, "cloud_tasks"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub backend: SchedulerBackend,
    /// How often the local worker looks for due tasks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Delivery attempts before a local task is marked dead.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_cloud_tasks_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_remind_queue")]
    pub remind_queue: String,
    #[serde(default = "default_escalate_queue")]
    pub escalate_queue: String,
    /// Service account used for the OIDC token on callback requests.
    #[serde(default)]
    pub service_account: Option<String>,
    /// OIDC audience; defaults to `server.callback_base_url`.
    #[serde(default)]
    pub audience: Option<String>,
    /// OAuth access token for the Cloud Tasks API.
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_poll_interval() -> String {
    "5s".to_string()
}

fn default_max_attempts() -> u32 {
    8
}

fn default_cloud_tasks_api_base() -> String {
    "https://cloudtasks.googleapis.com/v2".to_string()
}

fn default_remind_queue() -> String {
    "remind-queue".to_string()
}

fn default_escalate_queue() -> String {
    "escalate-queue".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backend: SchedulerBackend::default(),
            poll_interval: default_poll_interval(),
            max_attempts: default_max_attempts(),
            api_base: default_cloud_tasks_api_base(),
            project: None,
            region: None,
            remind_queue: default_remind_queue(),
            escalate_queue: default_escalate_queue(),
            service_account: None,
            audience: None,
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Write a daily-rolling log file here in addition to stderr.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// The complete nudge.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NudgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub windows: WindowsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub messages: MessageTemplates,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NudgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse nudge.toml")
    }

    /// Load from `path`, or defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load `.env`, the config file and environment overrides, in that order.
    pub fn resolve(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize nudge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides. `lookup` returns the value of a variable.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid PORT"),
            }
        }
        if let Some(v) = get("APP_BASE_URL") {
            self.server.callback_base_url = Some(v);
        }
        if let Some(v) = get("NUDGE_CALLBACK_TOKEN") {
            self.server.callback_token = Some(v);
        }
        if let Some(v) = get("REMIND_AFTER") {
            self.windows.remind_after = v;
        }
        if let Some(v) = get("ESCALATE_AFTER") {
            self.windows.escalate_after = v;
        }
        if let Some(v) = get("NUDGE_DB_PATH") {
            self.store.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = Some(v);
        }
        if let Some(v) = get("SLACK_CLIENT_ID") {
            self.slack.client_id = Some(v);
        }
        if let Some(v) = get("SLACK_CLIENT_SECRET") {
            self.slack.client_secret = Some(v);
        }
        if let Some(v) = get("OAUTH_REDIRECT_URL") {
            self.slack.oauth_redirect_url = Some(v);
        }
        if let Some(v) = get("GCP_PROJECT") {
            self.scheduler.project = Some(v);
        }
        if let Some(v) = get("REGION") {
            self.scheduler.region = Some(v);
        }
        if let Some(v) = get("TASKS_SERVICE_ACCOUNT") {
            self.scheduler.service_account = Some(v);
        }
        if let Some(v) = get("TASKS_AUDIENCE") {
            self.scheduler.audience = Some(v);
        }
    }

    pub fn remind_after(&self) -> Result<chrono::Duration> {
        parse_duration(&self.windows.remind_after)
            .map_err(|e| anyhow::anyhow!("Invalid windows.remind_after '{}': {}", self.windows.remind_after, e))
    }

    pub fn escalate_after(&self) -> Result<chrono::Duration> {
        parse_duration(&self.windows.escalate_after).map_err(|e| {
            anyhow::anyhow!(
                "Invalid windows.escalate_after '{}': {}",
                self.windows.escalate_after,
                e
            )
        })
    }

    pub fn poll_interval(&self) -> Result<std::time::Duration> {
        let d = parse_duration(&self.scheduler.poll_interval).map_err(|e| {
            anyhow::anyhow!(
                "Invalid scheduler.poll_interval '{}': {}",
                self.scheduler.poll_interval,
                e
            )
        })?;
        d.to_std().context("poll_interval out of range")
    }

    /// Lifecycle settings derived from `[windows]` and `[messages]`.
    pub fn lifecycle_config(&self) -> Result<LifecycleConfig> {
        let config = LifecycleConfig {
            remind_after: self.remind_after()?,
            escalate_after: self.escalate_after()?,
            flag_write_attempts: self.windows.flag_write_attempts,
            messages: self.messages.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    /// OIDC audience for scheduler callbacks.
    pub fn callback_audience(&self) -> Option<String> {
        self.scheduler
            .audience
            .clone()
            .or_else(|| self.server.callback_base_url.clone())
    }

    /// Return every problem that would stop the service from starting.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let remind = self.remind_after();
        let escalate = self.escalate_after();
        if let Err(e) = &remind {
            errors.push(e.to_string());
        }
        if let Err(e) = &escalate {
            errors.push(e.to_string());
        }
        if let (Ok(remind), Ok(escalate)) = (remind, escalate)
            && escalate <= remind
        {
            errors.push(format!(
                "windows.escalate_after ({}) must be longer than windows.remind_after ({})",
                format_duration(escalate),
                format_duration(remind)
            ));
        }
        if self.windows.flag_write_attempts == 0 {
            errors.push("windows.flag_write_attempts must be at least 1".to_string());
        }
        if let Err(e) = self.poll_interval() {
            errors.push(e.to_string());
        }
        if self.scheduler.max_attempts == 0 {
            errors.push("scheduler.max_attempts must be at least 1".to_string());
        }

        if self.scheduler.backend == SchedulerBackend::CloudTasks {
            if self.scheduler.project.is_none() {
                errors.push("scheduler.project (GCP_PROJECT) is required for cloud_tasks".into());
            }
            if self.scheduler.region.is_none() {
                errors.push("scheduler.region (REGION) is required for cloud_tasks".into());
            }
            if self.server.callback_base_url.is_none() {
                errors.push(
                    "server.callback_base_url (APP_BASE_URL) is required for cloud_tasks".into(),
                );
            }
        }

        if let Some(base) = &self.server.callback_base_url
            && url::Url::parse(base).is_err()
        {
            errors.push(format!("server.callback_base_url '{}' is not a valid URL", base));
        }

        errors
    }

    /// Like `validate`, but as a single error for startup paths.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "))
        }
    }

    /// Non-fatal gaps worth logging at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.slack.signing_secret.is_none() {
            warnings.push(
                "slack.signing_secret is not set; Slack requests will be rejected".to_string(),
            );
        }
        if self.slack.client_id.is_none() || self.slack.client_secret.is_none() {
            warnings.push("Slack OAuth client is not configured; installs will fail".to_string());
        }
        warnings
    }
}

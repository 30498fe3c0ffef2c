//! Google Cloud Tasks backend.
//!
//! Each callback becomes an HTTP task on its own queue, targeting
//! `{callback_base_url}/check/remind` or `/check/escalate` with an OIDC token.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{SecondsFormat, TimeZone, Utc};
use nudge_common::{CallbackKind, SchedulerPort, TaskPayload};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::config::NudgeConfig;

#[derive(Debug, Clone)]
pub struct CloudTasksConfig {
    pub api_base: String,
    pub project: String,
    pub region: String,
    pub remind_queue: String,
    pub escalate_queue: String,
    pub callback_base_url: String,
    pub service_account: Option<String>,
    pub audience: Option<String>,
    pub access_token: Option<String>,
}

impl CloudTasksConfig {
    pub fn from_config(config: &NudgeConfig) -> Result<Self> {
        let s = &config.scheduler;
        Ok(Self {
            api_base: s.api_base.trim_end_matches('/').to_string(),
            project: s.project.clone().context("scheduler.project is required")?,
            region: s.region.clone().context("scheduler.region is required")?,
            remind_queue: s.remind_queue.clone(),
            escalate_queue: s.escalate_queue.clone(),
            callback_base_url: config
                .server
                .callback_base_url
                .clone()
                .context("server.callback_base_url is required")?
                .trim_end_matches('/')
                .to_string(),
            service_account: s.service_account.clone(),
            audience: config.callback_audience(),
            access_token: s.access_token.clone(),
        })
    }
}

pub struct CloudTasksScheduler {
    http: reqwest::Client,
    config: CloudTasksConfig,
}

impl CloudTasksScheduler {
    pub fn new(config: CloudTasksConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Cloud Tasks HTTP client")?;
        Ok(Self { http, config })
    }

    fn queue_path(&self, callback: CallbackKind) -> String {
        let queue = match callback {
            CallbackKind::Remind => &self.config.remind_queue,
            CallbackKind::Escalate => &self.config.escalate_queue,
        };
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.config.project, self.config.region, queue
        )
    }

    /// Build the `CreateTask` request body.
    pub fn task_request(
        &self,
        run_at: i64,
        callback: CallbackKind,
        payload: &TaskPayload,
    ) -> Result<serde_json::Value> {
        let body = serde_json::to_vec(payload).context("Failed to encode task payload")?;
        let schedule_time = Utc
            .timestamp_opt(run_at, 0)
            .single()
            .context("run_at out of range")?
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut http_request = json!({
            "url": format!("{}{}", self.config.callback_base_url, callback.path()),
            "httpMethod": "POST",
            "headers": { "Content-Type": "application/json" },
            "body": BASE64.encode(body),
        });
        if let Some(account) = &self.config.service_account {
            let audience = self
                .config
                .audience
                .clone()
                .unwrap_or_else(|| self.config.callback_base_url.clone());
            http_request["oidcToken"] = json!({
                "serviceAccountEmail": account,
                "audience": audience,
            });
        }

        Ok(json!({
            "task": {
                "name": format!(
                    "{}/tasks/{}",
                    self.queue_path(callback),
                    task_id(callback, payload)
                ),
                "scheduleTime": schedule_time,
                "httpRequest": http_request,
            }
        }))
    }
}

/// Deterministic task id so a redelivered mention does not enqueue twice.
pub fn task_id(callback: CallbackKind, payload: &TaskPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(callback.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(payload.key().to_string().as_bytes());
    format!("{}-{}", callback.as_str(), hex::encode(hasher.finalize()))
}

#[async_trait]
impl SchedulerPort for CloudTasksScheduler {
    async fn schedule_at(
        &self,
        run_at: i64,
        callback: CallbackKind,
        payload: &TaskPayload,
    ) -> Result<()> {
        let url = format!(
            "{}/{}/tasks",
            self.config.api_base,
            self.queue_path(callback)
        );
        let mut request = self.http.post(&url).json(&self.task_request(run_at, callback, payload)?);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Failed to create {} task", callback))?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            tracing::debug!(key = %payload.key(), callback = %callback, "Task already exists");
            return Ok(());
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Cloud Tasks API error (status={}): {}", status, body);
        }

        tracing::debug!(key = %payload.key(), callback = %callback, run_at, "Cloud task created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_common::MentionKey;

    fn scheduler() -> CloudTasksScheduler {
        CloudTasksScheduler::new(CloudTasksConfig {
            api_base: "https://cloudtasks.googleapis.com/v2".into(),
            project: "acme".into(),
            region: "asia-northeast1".into(),
            remind_queue: "remind-queue".into(),
            escalate_queue: "escalate-queue".into(),
            callback_base_url: "https://nudge.example.com".into(),
            service_account: Some("tasks@acme.iam.gserviceaccount.com".into()),
            audience: None,
            access_token: None,
        })
        .unwrap()
    }

    fn payload() -> TaskPayload {
        TaskPayload::for_key(&MentionKey::new("T1", "C1", "100.0", "U9"), None)
    }

    #[test]
    fn test_task_request_shape() {
        let req = scheduler()
            .task_request(1_700_000_000, CallbackKind::Escalate, &payload())
            .unwrap();
        let task = &req["task"];
        assert_eq!(task["scheduleTime"], "2023-11-14T22:13:20Z");
        assert!(
            task["name"]
                .as_str()
                .unwrap()
                .starts_with("projects/acme/locations/asia-northeast1/queues/escalate-queue/tasks/escalate-")
        );

        let http = &task["httpRequest"];
        assert_eq!(http["url"], "https://nudge.example.com/check/escalate");
        assert_eq!(http["httpMethod"], "POST");
        assert_eq!(http["oidcToken"]["audience"], "https://nudge.example.com");

        let body = BASE64.decode(http["body"].as_str().unwrap()).unwrap();
        let decoded: TaskPayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded, payload());
    }

    #[test]
    fn test_task_id_is_deterministic_per_callback() {
        let p = payload();
        assert_eq!(task_id(CallbackKind::Remind, &p), task_id(CallbackKind::Remind, &p));
        assert_ne!(task_id(CallbackKind::Remind, &p), task_id(CallbackKind::Escalate, &p));

        let other = TaskPayload::for_key(&MentionKey::new("T1", "C1", "100.0", "U8"), None);
        assert_ne!(task_id(CallbackKind::Remind, &p), task_id(CallbackKind::Remind, &other));
    }

    #[test]
    fn test_from_config_requires_cloud_settings() {
        let mut config = NudgeConfig::default();
        assert!(CloudTasksConfig::from_config(&config).is_err());

        config.scheduler.project = Some("acme".into());
        config.scheduler.region = Some("us-central1".into());
        config.server.callback_base_url = Some("https://nudge.example.com/".into());
        let cloud = CloudTasksConfig::from_config(&config).unwrap();
        assert_eq!(cloud.callback_base_url, "https://nudge.example.com");
        assert_eq!(cloud.audience.as_deref(), Some("https://nudge.example.com/"));
    }
}

//! Typed error hierarchy for the nudge service.
//!
//! Two top-level enums cover the two subsystems:
//! - `LifecycleError`: mention lifecycle operations (`on_mention`, `check_*`)
//! - `SlackError`: Slack Web API calls
//!
//! Store errors live in `nudge_common::StoreError` so the ports can return them.

use nudge_common::{CallbackKind, StoreError, ValidationError};
use thiserror::Error;

/// Errors surfaced by the mention lifecycle orchestrator.
///
/// A missing watch record is never an error here: stale callbacks succeed.
/// Every variant below means the caller should let the scheduler redeliver.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid mention {key}: {source}")]
    Invalid {
        key: String,
        #[source]
        source: ValidationError,
    },

    #[error("Reply check failed for {key}: {source}")]
    ReplyCheckFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Notification failed for {key}: {source}")]
    NotifyFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Scheduling {callback} callback failed for {key}: {source}")]
    ScheduleFailed {
        key: String,
        callback: CallbackKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("Persistence failed for {key}: {source}")]
    PersistenceFailed {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Tenant lookup failed for team {team_id}: {source}")]
    TenantLookupFailed {
        team_id: String,
        #[source]
        source: StoreError,
    },
}

impl LifecycleError {
    /// Short machine-readable kind, used as a log field and in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "invalid",
            Self::ReplyCheckFailed { .. } => "reply_check_failed",
            Self::NotifyFailed { .. } => "notify_failed",
            Self::ScheduleFailed { .. } => "schedule_failed",
            Self::PersistenceFailed { .. } => "persistence_failed",
            Self::TenantLookupFailed { .. } => "tenant_lookup_failed",
        }
    }
}

/// Errors from the Slack Web API client.
#[derive(Debug, Error)]
pub enum SlackError {
    #[error("Slack API {method} returned error: {code}")]
    Api { method: &'static str, code: String },

    #[error("Slack API {method} request failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Slack API {method} returned an unexpected body: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("No bot token available for team {team_id}: {source}")]
    MissingCredential {
        team_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Slack user '{0}' not found")]
    UserNotFound(String),
}

impl SlackError {
    /// The error codes Slack uses when a bot token is no longer usable.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Api { code, .. } => matches!(
                code.as_str(),
                "invalid_auth" | "token_revoked" | "account_inactive" | "not_authed"
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_error_persistence_failed_carries_key() {
        let err = LifecycleError::PersistenceFailed {
            key: "T1:C1:1.0:U1".to_string(),
            source: StoreError::Backend(anyhow::anyhow!("database is locked")),
        };
        match &err {
            LifecycleError::PersistenceFailed { key, source } => {
                assert_eq!(key, "T1:C1:1.0:U1");
                assert!(!source.is_not_found());
            }
            _ => panic!("Expected PersistenceFailed"),
        }
        assert!(err.to_string().contains("T1:C1:1.0:U1"));
        assert_eq!(err.kind(), "persistence_failed");
    }

    #[test]
    fn lifecycle_error_schedule_failed_names_callback() {
        let err = LifecycleError::ScheduleFailed {
            key: "T1:C1:1.0:U1".to_string(),
            callback: CallbackKind::Escalate,
            source: anyhow::anyhow!("queue unavailable"),
        };
        assert!(err.to_string().contains("escalate"));
        assert!(err.to_string().contains("queue unavailable"));
    }

    #[test]
    fn lifecycle_error_variants_are_distinct() {
        let notify = LifecycleError::NotifyFailed {
            key: "k".into(),
            source: anyhow::anyhow!("x"),
        };
        let reply = LifecycleError::ReplyCheckFailed {
            key: "k".into(),
            source: anyhow::anyhow!("x"),
        };
        assert!(matches!(notify, LifecycleError::NotifyFailed { .. }));
        assert!(!matches!(reply, LifecycleError::NotifyFailed { .. }));
        assert_ne!(notify.kind(), reply.kind());
    }

    #[test]
    fn slack_error_auth_failures() {
        let revoked = SlackError::Api {
            method: "chat.postMessage",
            code: "token_revoked".to_string(),
        };
        assert!(revoked.is_auth_failure());

        let not_in_channel = SlackError::Api {
            method: "chat.postMessage",
            code: "not_in_channel".to_string(),
        };
        assert!(!not_in_channel.is_auth_failure());
        assert!(!SlackError::UserNotFound("alice".into()).is_auth_failure());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
        assert_std_error(&LifecycleError::Invalid {
            key: "k".into(),
            source: ValidationError::required("user_id"),
        });
        assert_std_error(&SlackError::UserNotFound("bob".into()));
    }
}

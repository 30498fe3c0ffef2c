use std::time::Duration;

use async_trait::async_trait;
use nudge_common::{NotificationPort, ReplyOracle};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::credentials::CredentialProvider;
use super::dto::{
    ApiEnvelope, Member, OAuthAccessResponse, OpenConversationResponse, RepliesResponse,
    UsersListResponse,
};
use crate::errors::SlackError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// `users.list` pages read before giving up on a name lookup.
const MAX_USER_PAGES: usize = 20;

/// Slack Web API client acting as each tenant's bot.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    credentials: CredentialProvider,
    reply_page_limit: u32,
}

impl SlackClient {
    pub fn new(
        api_base: impl Into<String>,
        credentials: CredentialProvider,
        reply_page_limit: u32,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("nudge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
            reply_page_limit,
        })
    }

    pub fn credentials(&self) -> &CredentialProvider {
        &self.credentials
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Send a request and unwrap Slack's `ok`/`error` envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SlackError> {
        let http_err = |source| SlackError::Http { method, source };
        let body: serde_json::Value = request
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?
            .json()
            .await
            .map_err(http_err)?;

        let envelope: ApiEnvelope = serde_json::from_value(body.clone())
            .map_err(|source| SlackError::Decode { method, source })?;
        if !envelope.ok {
            return Err(SlackError::Api {
                method,
                code: envelope.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }
        serde_json::from_value(body).map_err(|source| SlackError::Decode { method, source })
    }

    /// Call a method as `team_id`'s bot. A rejected token is evicted from the
    /// cache so the next call re-reads the secret.
    async fn call_as<T, F>(&self, team_id: &str, method: &'static str, build: F) -> Result<T, SlackError>
    where
        T: DeserializeOwned,
        F: FnOnce(&reqwest::Client, String) -> reqwest::RequestBuilder,
    {
        let token = self
            .credentials
            .token(team_id)
            .await
            .map_err(|source| SlackError::MissingCredential {
                team_id: team_id.to_string(),
                source,
            })?;
        let request = build(&self.http, self.url(method)).bearer_auth(token);
        let result = self.send(method, request).await;
        if let Err(e) = &result
            && e.is_auth_failure()
        {
            tracing::warn!(team = %team_id, method, error = %e, "Bot token rejected, evicting from cache");
            self.credentials.invalidate(team_id);
        }
        result
    }

    /// First page of replies in the thread rooted at `parent_ts`, newer than `oldest`.
    pub async fn conversation_replies(
        &self,
        team_id: &str,
        channel_id: &str,
        parent_ts: &str,
        oldest: &str,
    ) -> Result<RepliesResponse, SlackError> {
        let limit = self.reply_page_limit.to_string();
        self.call_as(team_id, "conversations.replies", |http, url| {
            http.get(url).query(&[
                ("channel", channel_id),
                ("ts", parent_ts),
                ("oldest", oldest),
                ("limit", limit.as_str()),
            ])
        })
        .await
    }

    pub async fn post_message(
        &self,
        team_id: &str,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<(), SlackError> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = json!(ts);
        }
        let _: ApiEnvelope = self
            .call_as(team_id, "chat.postMessage", |http, url| http.post(url).json(&body))
            .await?;
        Ok(())
    }

    /// Open (or reuse) the DM channel with `user_id`.
    pub async fn open_dm(&self, team_id: &str, user_id: &str) -> Result<String, SlackError> {
        let resp: OpenConversationResponse = self
            .call_as(team_id, "conversations.open", |http, url| {
                http.post(url).json(&json!({ "users": user_id }))
            })
            .await?;
        Ok(resp.channel.id)
    }

    /// Resolve a handle, display name, real name or email to a user id.
    pub async fn find_user_id(&self, team_id: &str, query: &str) -> Result<String, SlackError> {
        let mut cursor = String::new();
        for _ in 0..MAX_USER_PAGES {
            let page: UsersListResponse = self
                .call_as(team_id, "users.list", |http, url| {
                    let mut params = vec![("limit", "200")];
                    if !cursor.is_empty() {
                        params.push(("cursor", cursor.as_str()));
                    }
                    http.get(url).query(&params)
                })
                .await?;

            if let Some(member) = page
                .members
                .iter()
                .find(|m: &&Member| !m.deleted && m.matches(query))
            {
                return Ok(member.id.clone());
            }

            match page.response_metadata {
                Some(meta) if !meta.next_cursor.is_empty() => cursor = meta.next_cursor,
                _ => break,
            }
        }
        Err(SlackError::UserNotFound(query.to_string()))
    }

    /// Exchange an OAuth `code` for a bot token (`oauth.v2.access`).
    pub async fn oauth_access(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<OAuthAccessResponse, SlackError> {
        let mut form = vec![
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
        ];
        if let Some(uri) = redirect_uri {
            form.push(("redirect_uri", uri));
        }
        let request = self.http.post(self.url("oauth.v2.access")).form(&form);
        self.send("oauth.v2.access", request).await
    }
}

#[async_trait]
impl ReplyOracle for SlackClient {
    async fn has_replied(
        &self,
        team_id: &str,
        channel_id: &str,
        parent_ts: &str,
        user_id: &str,
        since_ts: &str,
    ) -> anyhow::Result<bool> {
        let replies = self
            .conversation_replies(team_id, channel_id, parent_ts, since_ts)
            .await?;
        if replies.has_more {
            tracing::debug!(team = %team_id, channel = %channel_id, ts = %parent_ts, "Only the first page of replies was checked");
        }
        Ok(replies
            .messages
            .iter()
            .filter(|m| m.ts != parent_ts)
            .any(|m| m.user.as_deref() == Some(user_id)))
    }
}

#[async_trait]
impl NotificationPort for SlackClient {
    async fn post_to_thread(
        &self,
        team_id: &str,
        channel_id: &str,
        parent_ts: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        self.post_message(team_id, channel_id, Some(parent_ts), text)
            .await?;
        Ok(())
    }

    async fn post_direct(&self, team_id: &str, user_id: &str, text: &str) -> anyhow::Result<()> {
        let channel = self.open_dm(team_id, user_id).await?;
        self.post_message(team_id, &channel, None, text).await?;
        Ok(())
    }
}

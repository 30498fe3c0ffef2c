//! Per-team bot token resolution.
//!
//! Lookup order: in-memory cache, then the tenant's `credential_ref`, then the
//! secret store under that name.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use nudge_common::TenantStore;

use crate::store::SecretStore;

/// Process-wide cache of bot tokens keyed by team id.
#[derive(Default)]
pub struct CredentialCache {
    tokens: RwLock<HashMap<String, String>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, team_id: &str) -> Option<String> {
        self.tokens.read().ok()?.get(team_id).cloned()
    }

    pub fn insert(&self, team_id: &str, token: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(team_id.to_string(), token.to_string());
        }
    }

    /// Drop one team's token, e.g. after Slack reports it revoked.
    pub fn invalidate(&self, team_id: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.remove(team_id);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves a team's bot token through the tenant record and secret store.
#[derive(Clone)]
pub struct CredentialProvider {
    cache: Arc<CredentialCache>,
    tenants: Arc<dyn TenantStore>,
    secrets: Arc<dyn SecretStore>,
}

impl CredentialProvider {
    pub fn new(
        cache: Arc<CredentialCache>,
        tenants: Arc<dyn TenantStore>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            cache,
            tenants,
            secrets,
        }
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    pub async fn token(&self, team_id: &str) -> Result<String> {
        if let Some(token) = self.cache.get(team_id) {
            return Ok(token);
        }

        let tenant = self
            .tenants
            .get(team_id)
            .await
            .with_context(|| format!("Team {} is not installed", team_id))?;
        let token = self
            .secrets
            .get_secret(&tenant.credential_ref)
            .await
            .with_context(|| format!("Failed to read secret {}", tenant.credential_ref))?
            .ok_or_else(|| anyhow::anyhow!("Secret {} not found", tenant.credential_ref))?;

        self.cache.insert(team_id, &token);
        tracing::debug!(team = %team_id, "Bot token loaded into cache");
        Ok(token)
    }

    pub fn invalidate(&self, team_id: &str) {
        self.cache.invalidate(team_id);
    }
}

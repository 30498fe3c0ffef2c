//! SQLite persistence for watch records, tenants, secrets and the local
//! scheduler queue.

pub mod db;

use async_trait::async_trait;
use nudge_common::{MentionKey, MentionRecord, MentionStore, StoreError, Tenant, TenantStore};

pub use db::{DbHandle, MentionFlag, NudgeDb, ScheduledTask, TaskStatus};

/// Named secret storage (bot tokens written by the OAuth install).
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> anyhow::Result<Option<String>>;

    async fn put_secret(&self, name: &str, value: &str) -> anyhow::Result<()>;
}

/// Port adapter over `DbHandle`.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbHandle,
}

impl SqliteStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn handle(&self) -> &DbHandle {
        &self.db
    }

    pub async fn list_tenants(&self) -> anyhow::Result<Vec<Tenant>> {
        self.db.call(|db| db.list_tenants()).await
    }

    pub async fn list_mentions(
        &self,
        team_id: Option<String>,
        limit: u32,
    ) -> anyhow::Result<Vec<MentionRecord>> {
        self.db
            .call(move |db| db.list_mentions(team_id.as_deref(), limit))
            .await
    }

    /// Delete watch records created before `cutoff` (epoch seconds).
    pub async fn prune_mentions(&self, cutoff: i64) -> anyhow::Result<usize> {
        self.db.call(move |db| db.prune_mentions(cutoff)).await
    }

    async fn mark(&self, key: &MentionKey, flag: MentionFlag) -> Result<(), StoreError> {
        let key = key.clone();
        let updated = self
            .db
            .call(move |db| db.set_mention_flag(&key, flag))
            .await
            .map_err(StoreError::Backend)?;
        if updated {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl MentionStore for SqliteStore {
    async fn save(&self, record: &MentionRecord) -> Result<(), StoreError> {
        record.validate()?;
        let record = record.clone();
        self.db
            .call(move |db| db.insert_mention(&record))
            .await
            .map_err(StoreError::Backend)?;
        Ok(())
    }

    async fn find(&self, key: &MentionKey) -> Result<MentionRecord, StoreError> {
        let key = key.clone();
        self.db
            .call(move |db| db.get_mention(&key))
            .await
            .map_err(StoreError::Backend)?
            .ok_or(StoreError::NotFound)
    }

    async fn mark_reminded(&self, key: &MentionKey) -> Result<(), StoreError> {
        self.mark(key, MentionFlag::Reminded).await
    }

    async fn mark_escalated(&self, key: &MentionKey) -> Result<(), StoreError> {
        self.mark(key, MentionFlag::Escalated).await
    }
}

#[async_trait]
impl TenantStore for SqliteStore {
    async fn get(&self, team_id: &str) -> Result<Tenant, StoreError> {
        let team_id = team_id.to_string();
        self.db
            .call(move |db| db.get_tenant(&team_id))
            .await
            .map_err(StoreError::Backend)?
            .ok_or(StoreError::NotFound)
    }

    async fn set_manager(
        &self,
        team_id: &str,
        manager_user_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let team_id = team_id.to_string();
        let manager = manager_user_id.map(str::to_string);
        let updated = self
            .db
            .call(move |db| db.set_manager(&team_id, manager.as_deref()))
            .await
            .map_err(StoreError::Backend)?;
        if updated {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn upsert_credential_ref(
        &self,
        team_id: &str,
        credential_ref: &str,
    ) -> Result<(), StoreError> {
        let tenant = Tenant {
            team_id: team_id.to_string(),
            manager_user_id: None,
            credential_ref: credential_ref.to_string(),
            created_at: now(),
        };
        tenant.validate()?;
        self.db
            .call(move |db| {
                db.upsert_credential_ref(&tenant.team_id, &tenant.credential_ref, tenant.created_at)
            })
            .await
            .map_err(StoreError::Backend)
    }
}

#[async_trait]
impl SecretStore for SqliteStore {
    async fn get_secret(&self, name: &str) -> anyhow::Result<Option<String>> {
        let name = name.to_string();
        self.db.call(move |db| db.get_secret(&name)).await
    }

    async fn put_secret(&self, name: &str, value: &str) -> anyhow::Result<()> {
        let name = name.to_string();
        let value = value.to_string();
        self.db
            .call(move |db| db.put_secret(&name, &value, now()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::new(DbHandle::in_memory().unwrap())
    }

    fn key() -> MentionKey {
        MentionKey::new("T1", "C1", "100.0", "U9")
    }

    #[tokio::test]
    async fn test_save_find_and_mark() {
        let store = store();
        store
            .save(&MentionRecord::detected(key(), 1000))
            .await
            .unwrap();

        store.mark_reminded(&key()).await.unwrap();
        store.mark_reminded(&key()).await.unwrap();

        let record = store.find(&key()).await.unwrap();
        assert!(record.reminded);
        assert!(!record.escalated);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let store = store();
        assert!(store.find(&key()).await.unwrap_err().is_not_found());
        assert!(store.mark_escalated(&key()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_record() {
        let store = store();
        let err = store
            .save(&MentionRecord::detected(key(), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_tenant_lifecycle() {
        let store = store();
        assert!(store.get("T1").await.unwrap_err().is_not_found());
        assert!(
            store
                .set_manager("T1", Some("M1"))
                .await
                .unwrap_err()
                .is_not_found()
        );

        store.upsert_credential_ref("T1", "slack_token_T1").await.unwrap();
        store.set_manager("T1", Some("M1")).await.unwrap();
        let tenant = store.get("T1").await.unwrap();
        assert_eq!(tenant.manager_user_id.as_deref(), Some("M1"));

        store.set_manager("T1", None).await.unwrap();
        assert_eq!(store.get("T1").await.unwrap().manager_user_id, None);
    }

    #[tokio::test]
    async fn test_upsert_credential_ref_rejects_blank_ref() {
        let store = store();
        let err = store.upsert_credential_ref("T1", "").await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_secret_round_trip() {
        let store = store();
        store.put_secret("slack_token_T1", "xoxb-abc").await.unwrap();
        assert_eq!(
            store.get_secret("slack_token_T1").await.unwrap().as_deref(),
            Some("xoxb-abc")
        );
        assert_eq!(store.get_secret("slack_token_T2").await.unwrap(), None);
    }
}

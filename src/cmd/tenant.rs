//! Workspace administration: `nudge tenant`.

use std::path::Path;

use anyhow::{Context, Result};
use nudge::common::TenantStore;
use nudge::config::NudgeConfig;
use nudge::store::{DbHandle, SecretStore, SqliteStore};

use super::super::TenantCommands;

fn open_store(config: &NudgeConfig) -> Result<SqliteStore> {
    let db = DbHandle::open(&config.store.db_path)
        .with_context(|| format!("Failed to open database {}", config.store.db_path.display()))?;
    Ok(SqliteStore::new(db))
}

pub async fn cmd_tenant(config_path: &Path, command: TenantCommands) -> Result<()> {
    let config = NudgeConfig::resolve(config_path)?;
    let store = open_store(&config)?;

    match command {
        TenantCommands::List => {
            let tenants = store.list_tenants().await?;
            if tenants.is_empty() {
                println!("No workspaces installed.");
                return Ok(());
            }
            println!("{:<14} {:<14} CREDENTIAL", "TEAM", "MANAGER");
            for tenant in tenants {
                println!(
                    "{:<14} {:<14} {}",
                    tenant.team_id,
                    tenant.manager_user_id.as_deref().unwrap_or("-"),
                    tenant.credential_ref
                );
            }
        }
        TenantCommands::Show { team_id } => {
            let tenant = store
                .get(&team_id)
                .await
                .with_context(|| format!("Team {} is not installed", team_id))?;
            println!("team_id        = {}", tenant.team_id);
            println!(
                "manager        = {}",
                tenant.manager_user_id.as_deref().unwrap_or("(none)")
            );
            println!("credential_ref = {}", tenant.credential_ref);
            println!("installed      = {}", format_epoch(tenant.created_at));
        }
        TenantCommands::Register { team_id, token } => {
            let secret_name = config.slack.token_secret_name(&team_id);
            store.put_secret(&secret_name, &token).await?;
            store
                .upsert_credential_ref(&team_id, &secret_name)
                .await
                .with_context(|| format!("Failed to register team {}", team_id))?;
            println!("Registered {} (token stored as {})", team_id, secret_name);
        }
        TenantCommands::SetManager { team_id, user_id } => {
            store
                .set_manager(&team_id, Some(&user_id))
                .await
                .with_context(|| format!("Failed to set manager for team {}", team_id))?;
            println!("Manager for {} set to {}", team_id, user_id);
        }
        TenantCommands::UnsetManager { team_id } => {
            store
                .set_manager(&team_id, None)
                .await
                .with_context(|| format!("Failed to clear manager for team {}", team_id))?;
            println!("Manager for {} cleared", team_id);
        }
    }

    Ok(())
}

pub(super) fn format_epoch(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

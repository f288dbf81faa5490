// src/core/settings.rs
//! Runtime configuration store backed by the `config` table

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

pub mod keys {
    pub const KEYWORDS: &str = "keywords";
    pub const LOCATION: &str = "location";
    pub const SCHEDULE_INTERVAL: &str = "schedule_interval";
    pub const TARGET_INDUSTRIES: &str = "target_industries";
    pub const ENABLED_SOURCES: &str = "enabled_sources";
}

pub const DEFAULT_INTERVAL_MINUTES: u64 = 30;
/// One week
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

const DEFAULTS: [(&str, &str); 5] = [
    (
        keys::KEYWORDS,
        r#"["Technical Project Manager", "Product Owner"]"#,
    ),
    (keys::LOCATION, "London"),
    (keys::SCHEDULE_INTERVAL, "30"),
    (
        keys::TARGET_INDUSTRIES,
        r#"["FinTech", "Capital Markets", "Asset Management", "Security Brokers", "Fund House", "Investment Banking"]"#,
    ),
    (
        keys::ENABLED_SOURCES,
        r#"["indeed", "totaljobs", "cwjobs", "reed", "glassdoor", "linkedin"]"#,
    ),
];

pub struct SettingsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert default values for keys that are not set yet
    pub async fn seed_defaults(&self) -> Result<()> {
        for (key, value) in DEFAULTS {
            sqlx::query("INSERT OR IGNORE INTO config (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(self.pool)
                .await
                .with_context(|| format!("Failed to seed config key {}", key))?;
        }
        info!("Default configuration seeded");
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool)
            .await
            .with_context(|| format!("Failed to read config key {}", key))?;
        Ok(value)
    }

    pub async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get(key)
            .await?
            .unwrap_or_else(|| default.to_string()))
    }

    /// Last write wins
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool)
        .await
        .with_context(|| format!("Failed to write config key {}", key))?;
        Ok(())
    }

    pub async fn bulk_set(&self, entries: &[(String, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO config (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to write config key {}", key))?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM config ORDER BY key ASC",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// List-valued key; a non-array value counts as a single entry
    pub async fn get_list(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .get(key)
            .await?
            .map(|raw| parse_list(&raw))
            .unwrap_or_default())
    }

    /// Minutes between scheduled cycles, between one minute and one week
    pub async fn schedule_interval_minutes(&self) -> Result<u64> {
        let raw = self.get(keys::SCHEDULE_INTERVAL).await?;
        Ok(raw
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_INTERVAL_MINUTES)
            .clamp(1, MAX_INTERVAL_MINUTES))
    }
}

pub fn parse_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<String>>(trimmed) {
        Ok(items) => items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => vec![trimmed.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Database;

    #[tokio::test]
    async fn test_seed_does_not_overwrite() {
        let db = Database::in_memory().await.unwrap();
        let settings = SettingsRepository::new(db.pool());

        settings.set(keys::LOCATION, "Manchester").await.unwrap();
        settings.seed_defaults().await.unwrap();

        assert_eq!(
            settings.get(keys::LOCATION).await.unwrap().as_deref(),
            Some("Manchester")
        );
        assert_eq!(settings.get_list(keys::KEYWORDS).await.unwrap().len(), 2);
        assert_eq!(settings.get_list(keys::ENABLED_SOURCES).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_set_and_bulk_set_last_write_wins() {
        let db = Database::in_memory().await.unwrap();
        let settings = SettingsRepository::new(db.pool());

        settings.set("a", "1").await.unwrap();
        settings
            .bulk_set(&[
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "3".to_string()),
            ])
            .await
            .unwrap();

        assert_eq!(settings.get_or("a", "x").await.unwrap(), "2");
        assert_eq!(settings.get_or("missing", "x").await.unwrap(), "x");
        assert_eq!(settings.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_schedule_interval_fallbacks() {
        let db = Database::in_memory().await.unwrap();
        let settings = SettingsRepository::new(db.pool());

        assert_eq!(settings.schedule_interval_minutes().await.unwrap(), 30);
        settings.set(keys::SCHEDULE_INTERVAL, "45").await.unwrap();
        assert_eq!(settings.schedule_interval_minutes().await.unwrap(), 45);
        settings.set(keys::SCHEDULE_INTERVAL, "soon").await.unwrap();
        assert_eq!(settings.schedule_interval_minutes().await.unwrap(), 30);
        settings.set(keys::SCHEDULE_INTERVAL, "0").await.unwrap();
        assert_eq!(settings.schedule_interval_minutes().await.unwrap(), 1);
        settings
            .set(keys::SCHEDULE_INTERVAL, "400000000000000000")
            .await
            .unwrap();
        assert_eq!(
            settings.schedule_interval_minutes().await.unwrap(),
            MAX_INTERVAL_MINUTES
        );
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(r#"["a", " b ", ""]"#), vec!["a", "b"]);
        assert_eq!(parse_list("FinTech"), vec!["FinTech"]);
        assert!(parse_list("  ").is_empty());
        assert!(parse_list("[]").is_empty());
    }
}

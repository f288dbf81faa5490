// src/core/database.rs
//! SQLite connection management and schema migrations

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

use crate::core::FsOps;

const MIGRATIONS: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS job_posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        company TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        link TEXT NOT NULL UNIQUE,
        posted_date TEXT,
        posted_date_text TEXT NOT NULL DEFAULT '',
        salary TEXT NOT NULL DEFAULT 'N/A',
        applicants TEXT NOT NULL DEFAULT 'N/A',
        job_type TEXT NOT NULL DEFAULT 'N/A',
        source TEXT NOT NULL DEFAULT '',
        match_score INTEGER NOT NULL DEFAULT 0
            CHECK (match_score BETWEEN 0 AND 100),
        match_reasoning TEXT NOT NULL DEFAULT '',
        is_applied BOOLEAN NOT NULL DEFAULT FALSE,
        user_remarks TEXT,
        user_feedback TEXT,
        is_external BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_job_posts_score ON job_posts(match_score);",
    "CREATE INDEX IF NOT EXISTS idx_job_posts_company ON job_posts(company);",
    r#"
    CREATE TABLE IF NOT EXISTS agent_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL DEFAULT (datetime('now')),
        agent_name TEXT NOT NULL,
        message TEXT NOT NULL,
        status TEXT NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_agent_logs_timestamp ON agent_logs(timestamp);",
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
];

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create new database connection with automatic setup
    pub async fn new(database_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = database_path.parent() {
            FsOps::ensure_dir_exists(parent).await?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path.display());
        let pool = SqlitePool::connect(&database_url).await.with_context(|| {
            format!("Failed to connect to database: {}", database_path.display())
        })?;

        info!(
            "Database connection established: {}",
            database_path.display()
        );

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get pool reference for custom operations
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Database migration failed")?;
        }

        info!("Database migrations completed");
        Ok(())
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }
}

//! Schema migrations for the metadata store.

use anyhow::{Context, Result};
use sqlx::{Pool, Postgres, Row};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up_sql: &'static str,
}

pub struct MigrationManager {
    pool: Pool<Postgres>,
    migrations: Vec<Migration>,
}

impl MigrationManager {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            migrations: all_migrations(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create schema_migrations table")?;
        Ok(())
    }

    pub async fn current_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) as version FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .context("failed to read current schema version")?;
        Ok(row.get::<i32, _>("version") as u32)
    }

    pub async fn run_pending(&self) -> Result<()> {
        self.init().await?;
        let current = self.current_version().await?;
        for migration in self.migrations.iter().filter(|m| m.version > current) {
            info!(version = migration.version, name = migration.name, "applying migration");
            let mut tx = self.pool.begin().await?;
            sqlx::query(migration.up_sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {} ({}) failed", migration.version, migration.name))?;
            sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
                .bind(migration.version as i32)
                .bind(migration.name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }
}

fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        name: "initial_schema",
        up_sql: r#"
            CREATE TABLE apps (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE app_collaborators (
                app_id UUID NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                permission TEXT NOT NULL CHECK (permission IN ('owner', 'collaborator')),
                account_id UUID NOT NULL,
                PRIMARY KEY (app_id, email)
            );

            CREATE TABLE deployments (
                id UUID PRIMARY KEY,
                app_id UUID NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                deployment_key TEXT NOT NULL UNIQUE,
                current_package_id UUID,
                history_version BIGINT NOT NULL DEFAULT 0,
                UNIQUE (app_id, name)
            );

            CREATE TABLE packages (
                id UUID PRIMARY KEY,
                deployment_id UUID NOT NULL REFERENCES deployments(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                app_version_raw TEXT NOT NULL,
                blob_url TEXT NOT NULL,
                size BIGINT NOT NULL,
                package_hash TEXT NOT NULL,
                manifest_blob_url TEXT,
                is_disabled BOOLEAN NOT NULL DEFAULT FALSE,
                is_mandatory BOOLEAN NOT NULL DEFAULT FALSE,
                rollout SMALLINT,
                description TEXT,
                release_method TEXT NOT NULL,
                original_label TEXT,
                original_deployment TEXT,
                diff_package_map JSONB,
                upload_time TIMESTAMPTZ NOT NULL,
                released_by TEXT NOT NULL,
                UNIQUE (deployment_id, label)
            );

            CREATE INDEX packages_deployment_upload_time_idx ON packages (deployment_id, upload_time);
        "#,
    }]
}

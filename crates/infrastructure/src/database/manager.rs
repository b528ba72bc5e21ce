use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};
use trainer_core::{
    config::DatabaseConfig,
    traits::{ModelVersionRepository, RunRepository, ScheduleRepository},
    TrainerResult,
};

use super::migrations::run_migrations;
use super::sqlite::{
    SqliteModelVersionRepository, SqliteRunRepository, SqliteScheduleRepository,
};

/// SQLite 连接池与仓库工厂
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 按配置创建连接池，启用外键约束和WAL模式
    pub async fn new(config: &DatabaseConfig) -> TrainerResult<Self> {
        if is_memory_url(&config.url) {
            return Self::in_memory().await;
        }

        info!("创建SQLite数据库连接池: {}", config.url);

        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    /// 内存数据库，每个连接都是独立的库，因此只保留一个永不回收的连接
    pub async fn in_memory() -> TrainerResult<Self> {
        debug!("创建内存SQLite数据库");

        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> TrainerResult<()> {
        run_migrations(&self.pool).await
    }

    pub async fn health_check(&self) -> TrainerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn run_repository(&self) -> Arc<dyn RunRepository> {
        Arc::new(SqliteRunRepository::new(self.pool.clone()))
    }

    pub fn model_version_repository(&self) -> Arc<dyn ModelVersionRepository> {
        Arc::new(SqliteModelVersionRepository::new(self.pool.clone()))
    }

    pub fn schedule_repository(&self) -> Arc<dyn ScheduleRepository> {
        Arc::new(SqliteScheduleRepository::new(self.pool.clone()))
    }
}

fn is_memory_url(url: &str) -> bool {
    url == "sqlite::memory:" || url.contains(":memory:") || url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_manager_migrates_and_reports_healthy() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        // 迁移可重复执行
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(manager.pool())
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(name,)| name.as_str()).collect();
        assert_eq!(
            names,
            vec!["metrics", "model_runs", "model_versions", "training_schedule"]
        );
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trainer.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..DatabaseConfig::default()
        };

        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();
        manager.close().await;

        assert!(path.exists());
    }

    #[test]
    fn test_memory_url_detection() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file:test?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite://trainer.db"));
    }
}

use sqlx::SqlitePool;
use trainer_core::TrainerResult;
use tracing::debug;

/// 运行数据库迁移，所有语句都是幂等的
pub async fn run_migrations(pool: &SqlitePool) -> TrainerResult<()> {
    debug!("Running SQLite database migrations");

    // 训练运行表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_runs (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'queued',
            start_time DATETIME NOT NULL,
            end_time DATETIME,
            duration TEXT,
            triggered_by TEXT NOT NULL DEFAULT 'manual',
            logs TEXT NOT NULL DEFAULT '',
            rank INTEGER,
            reg_param REAL,
            alpha REAL,
            max_iter INTEGER,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 模型版本表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version_tag TEXT NOT NULL,
            artifact_path TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 指标表，随模型版本级联删除
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model_version_id INTEGER NOT NULL,
            metric_name TEXT NOT NULL,
            metric_value REAL NOT NULL,
            timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (model_version_id) REFERENCES model_versions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 训练计划表（单例）
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS training_schedule (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cron_expression TEXT NOT NULL,
            is_paused INTEGER NOT NULL DEFAULT 0,
            rank INTEGER,
            reg_param REAL,
            alpha REAL,
            max_iter INTEGER,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_model_runs_status ON model_runs(status)",
        "CREATE INDEX IF NOT EXISTS idx_model_runs_triggered_by ON model_runs(triggered_by)",
        "CREATE INDEX IF NOT EXISTS idx_model_runs_start_time ON model_runs(start_time)",
        "CREATE INDEX IF NOT EXISTS idx_model_versions_version_tag ON model_versions(version_tag)",
        "CREATE INDEX IF NOT EXISTS idx_metrics_model_version_id ON metrics(model_version_id)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("SQLite database migrations completed");
    Ok(())
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use trainer_core::{
    models::{Metric, ModelVersion, NewMetric, NewModelVersion},
    traits::ModelVersionRepository,
    TrainerError, TrainerResult,
};

const VERSION_COLUMNS: &str = "id, version_tag, artifact_path, is_active, created_at";

pub struct SqliteModelVersionRepository {
    pool: SqlitePool,
}

impl SqliteModelVersionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> TrainerResult<ModelVersion> {
        Ok(ModelVersion {
            id: row.try_get("id")?,
            version_tag: row.try_get("version_tag")?,
            artifact_path: row.try_get("artifact_path")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_metric(row: &sqlx::sqlite::SqliteRow) -> TrainerResult<Metric> {
        Ok(Metric {
            id: row.try_get("id")?,
            model_version_id: row.try_get("model_version_id")?,
            metric_name: row.try_get("metric_name")?,
            metric_value: row.try_get("metric_value")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

#[async_trait]
impl ModelVersionRepository for SqliteModelVersionRepository {
    #[instrument(skip(self, version), fields(version_tag = %version.version_tag))]
    async fn create_version(&self, version: &NewModelVersion) -> TrainerResult<ModelVersion> {
        let result = sqlx::query(
            "INSERT INTO model_versions (version_tag, artifact_path, is_active, created_at) VALUES ($1, $2, 0, $3)",
        )
        .bind(&version.version_tag)
        .bind(&version.artifact_path)
        .bind(version.created_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("创建模型版本成功: {} (ID: {})", version.version_tag, id);

        Ok(ModelVersion {
            id,
            version_tag: version.version_tag.clone(),
            artifact_path: version.artifact_path.clone(),
            is_active: false,
            created_at: version.created_at,
        })
    }

    #[instrument(skip(self, metrics), fields(count = metrics.len()))]
    async fn add_metrics(
        &self,
        version_id: i64,
        metrics: &[NewMetric],
        timestamp: DateTime<Utc>,
    ) -> TrainerResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for metric in metrics {
            let result = sqlx::query(
                "INSERT INTO metrics (model_version_id, metric_name, metric_value, timestamp) VALUES ($1, $2, $3, $4)",
            )
            .bind(version_id)
            .bind(&metric.metric_name)
            .bind(metric.metric_value)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!("写入模型指标 {} 条, 版本ID: {}", inserted, version_id);
        Ok(inserted)
    }

    async fn list_versions(&self) -> TrainerResult<Vec<ModelVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM model_versions ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_version).collect()
    }

    async fn get_version(&self, id: i64) -> TrainerResult<Option<ModelVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM model_versions WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_version).transpose()
    }

    async fn active_version(&self) -> TrainerResult<Option<ModelVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions WHERE is_active = 1 ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_version).transpose()
    }

    #[instrument(skip(self))]
    async fn set_active(&self, id: i64) -> TrainerResult<ModelVersion> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {VERSION_COLUMNS} FROM model_versions WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await?;
        let mut version = match row {
            Some(row) => Self::row_to_version(&row)?,
            None => return Err(TrainerError::ModelVersionNotFound { id }),
        };

        sqlx::query("UPDATE model_versions SET is_active = 0 WHERE id != $1 AND is_active = 1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE model_versions SET is_active = 1 WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        version.is_active = true;
        debug!("激活模型版本: {}", version.version_tag);
        Ok(version)
    }

    async fn metrics_for_version(&self, id: i64) -> TrainerResult<Vec<Metric>> {
        let rows = sqlx::query(
            "SELECT id, model_version_id, metric_name, metric_value, timestamp FROM metrics \
             WHERE model_version_id = $1 ORDER BY timestamp DESC, id DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_metric).collect()
    }

    #[instrument(skip(self))]
    async fn delete_version(&self, id: i64) -> TrainerResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM metrics WHERE model_version_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM model_versions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

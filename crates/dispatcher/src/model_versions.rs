use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use trainer_core::{
    models::{Metric, ModelVersion},
    traits::ModelVersionRepository,
    TrainerError, TrainerResult,
};

/// 某个版本的全部指标
#[derive(Debug, Clone, Serialize)]
pub struct VersionMetrics {
    pub version_id: i64,
    pub version_tag: String,
    pub metrics: Vec<Metric>,
}

/// 模型版本的查询与激活
pub struct ModelVersionService {
    versions: Arc<dyn ModelVersionRepository>,
}

impl ModelVersionService {
    pub fn new(versions: Arc<dyn ModelVersionRepository>) -> Self {
        Self { versions }
    }

    /// 按创建时间倒序
    pub async fn list(&self) -> TrainerResult<Vec<ModelVersion>> {
        self.versions.list_versions().await
    }

    pub async fn active(&self) -> TrainerResult<Option<ModelVersion>> {
        self.versions.active_version().await
    }

    /// 激活指定版本，同一事务内清除其他版本的激活标记
    pub async fn activate(&self, id: i64) -> TrainerResult<ModelVersion> {
        let version = self.versions.set_active(id).await?;
        info!(version_id = id, version_tag = %version.version_tag, "模型版本已激活");
        Ok(version)
    }

    pub async fn metrics(&self, version_id: i64) -> TrainerResult<VersionMetrics> {
        let version = self
            .versions
            .get_version(version_id)
            .await?
            .ok_or(TrainerError::ModelVersionNotFound { id: version_id })?;
        let metrics = self.versions.metrics_for_version(version_id).await?;

        Ok(VersionMetrics {
            version_id,
            version_tag: version.version_tag,
            metrics,
        })
    }

    /// 删除版本及其指标
    pub async fn delete(&self, id: i64) -> TrainerResult<()> {
        if !self.versions.delete_version(id).await? {
            return Err(TrainerError::ModelVersionNotFound { id });
        }
        info!(version_id = id, "模型版本已删除");
        Ok(())
    }
}

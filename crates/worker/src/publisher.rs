use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use trainer_core::{
    config::TrainingConfig,
    models::{HyperParameters, MetricKind, ModelVersion, NewMetric, NewModelVersion},
    traits::{ModelVersionRepository, RunRepository},
};

use crate::metric_parser::MetricMap;

/// 训练成功后发布模型版本与指标
///
/// 版本单独提交，指标随后批量写入；指标写入失败只记录告警，版本保留。
/// 新版本不会被自动激活。
pub struct VersionPublisher {
    versions: Arc<dyn ModelVersionRepository>,
    runs: Arc<dyn RunRepository>,
    config: TrainingConfig,
}

impl VersionPublisher {
    pub fn new(
        versions: Arc<dyn ModelVersionRepository>,
        runs: Arc<dyn RunRepository>,
        config: &TrainingConfig,
    ) -> Self {
        Self {
            versions,
            runs,
            config: config.clone(),
        }
    }

    #[instrument(skip(self, params, metrics), fields(version_tag = %version_tag))]
    pub async fn publish(
        &self,
        run_id: &str,
        version_tag: &str,
        params: &HyperParameters,
        metrics: &MetricMap,
    ) -> Option<ModelVersion> {
        let artifact_path = self.config.artifact_path(version_tag);
        let new_version = NewModelVersion {
            version_tag: version_tag.to_string(),
            artifact_path: artifact_path.clone(),
            created_at: Utc::now(),
        };

        let version = match self.versions.create_version(&new_version).await {
            Ok(version) => version,
            Err(e) => {
                warn!(run_id, "保存模型版本失败: {}", e);
                self.append(
                    run_id,
                    &format!("Warning: Failed to save model version to database: {e}\n"),
                )
                .await;
                return None;
            }
        };

        self.append(
            run_id,
            &format!(
                "{}\nModel version saved to database: {version_tag}\n  Model path: {artifact_path}\n",
                format_hyper_parameters(params)
            ),
        )
        .await;

        let rows = metric_rows(metrics);
        if rows.is_empty() {
            warn!(run_id, "训练日志中未提取到任何指标");
            self.append(run_id, "Warning: No metrics extracted from training logs\n")
                .await;
            return Some(version);
        }

        match self.versions.add_metrics(version.id, &rows, Utc::now()).await {
            Ok(count) => {
                info!(run_id, version_id = version.id, "保存模型指标 {} 条", count);
                self.append(run_id, &format!("Saved {count} metrics to database\n"))
                    .await;
            }
            Err(e) => {
                warn!(run_id, version_id = version.id, "保存模型指标失败: {}", e);
                self.append(
                    run_id,
                    &format!("Warning: Failed to save metrics to database: {e}\n"),
                )
                .await;
            }
        }

        Some(version)
    }

    async fn append(&self, run_id: &str, text: &str) {
        if let Err(e) = self.runs.append_log(run_id, text).await {
            warn!(run_id, "追加运行日志失败: {}", e);
        }
    }
}

/// 指标行按截断值升序、指标类型固定顺序展开
pub fn metric_rows(metrics: &MetricMap) -> Vec<NewMetric> {
    metrics
        .iter()
        .flat_map(|(k, values)| {
            MetricKind::ALL.iter().filter_map(move |kind| {
                values.get(kind).map(|value| NewMetric {
                    metric_name: kind.metric_name(*k),
                    metric_value: *value,
                })
            })
        })
        .collect()
}

pub fn format_hyper_parameters(params: &HyperParameters) -> String {
    format!(
        "Hyperparameters: rank={}, regParam={}, alpha={}, maxIter={}",
        params.rank, params.reg_param, params.alpha, params.max_iter
    )
}

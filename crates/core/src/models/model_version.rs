use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 训练成功后产出的模型版本，除 is_active 外不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelVersion {
    pub id: i64,
    pub version_tag: String,
    pub artifact_path: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 待写入的模型版本
#[derive(Debug, Clone)]
pub struct NewModelVersion {
    pub version_tag: String,
    pub artifact_path: String,
    pub created_at: DateTime<Utc>,
}

/// 附属于某个模型版本的标量指标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub id: i64,
    pub model_version_id: i64,
    pub metric_name: String,
    pub metric_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// 待写入的指标
#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub metric_name: String,
    pub metric_value: f64,
}

/// 训练进程输出的指标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    #[serde(rename = "precision")]
    Precision,
    #[serde(rename = "recall")]
    Recall,
    #[serde(rename = "map")]
    Map,
    #[serde(rename = "ndcg")]
    Ndcg,
    #[serde(rename = "coverage")]
    Coverage,
    #[serde(rename = "hitRate")]
    HitRate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Precision,
        MetricKind::Recall,
        MetricKind::Map,
        MetricKind::Ndcg,
        MetricKind::Coverage,
        MetricKind::HitRate,
    ];

    /// 日志协议中的字段名
    pub fn wire_key(&self) -> &'static str {
        match self {
            MetricKind::Precision => "precision",
            MetricKind::Recall => "recall",
            MetricKind::Map => "map",
            MetricKind::Ndcg => "ndcg",
            MetricKind::Coverage => "coverage",
            MetricKind::HitRate => "hitRate",
        }
    }

    pub fn from_wire_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_key() == key)
    }

    /// 首字母大写、其余小写，与历史数据中的指标名保持一致 (hitRate -> Hitrate)
    pub fn display_name(&self) -> String {
        let key = self.wire_key();
        let mut chars = key.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
            None => String::new(),
        }
    }

    /// 指标名，例如 `Precision@10`
    pub fn metric_name(&self, k: u32) -> String {
        format!("{}@{}", self.display_name(), k)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert_eq!(MetricKind::Precision.metric_name(10), "Precision@10");
        assert_eq!(MetricKind::Map.metric_name(20), "Map@20");
        assert_eq!(MetricKind::Ndcg.metric_name(10), "Ndcg@10");
        assert_eq!(MetricKind::HitRate.metric_name(5), "Hitrate@5");
    }

    #[test]
    fn test_wire_keys() {
        for kind in MetricKind::ALL {
            assert_eq!(MetricKind::from_wire_key(kind.wire_key()), Some(kind));
        }
        assert_eq!(MetricKind::from_wire_key("hitrate"), None);
        assert_eq!(MetricKind::from_wire_key("rmse"), None);
    }
}

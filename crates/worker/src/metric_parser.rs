//! 训练进程输出的指标行协议
//!
//! 结构化格式（每个截断值一行）:
//!
//! ```text
//! METRIC|k=10|precision=0.50|recall=0.40|map=0.30|ndcg=0.60|coverage=0.90|hitRate=0.70
//! ```
//!
//! 前缀可以出现在行内任意位置，`k` 与六个指标字段都是必填的。
//! 同一个 `k` 的后一行整体替换前一行。
//!
//! 旧格式 `NDCG@10 = 0.61` 只在 k=10 尚无 ndcg 时补充写入。

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use trainer_core::models::MetricKind;

pub const METRIC_PREFIX: &str = "METRIC|";
const LEGACY_CUTOFF: u32 = 10;

static LEGACY_NDCG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"NDCG@10\s*=\s*([\d.]+)").expect("legacy NDCG pattern is valid"));

/// 截断值 -> (指标类型 -> 值)
pub type MetricMap = BTreeMap<u32, BTreeMap<MetricKind, f64>>;

/// 一条结构化指标行
#[derive(Debug, Clone, PartialEq)]
pub struct MetricLine {
    pub k: u32,
    pub values: BTreeMap<MetricKind, f64>,
}

/// 带前缀但不符合协议的行
#[derive(Debug, Error, PartialEq)]
pub enum MetricLineError {
    #[error("缺少字段: {0}")]
    MissingField(&'static str),

    #[error("字段 {field} 的值无效: {value}")]
    InvalidValue { field: String, value: String },

    #[error("无法解析的片段: {0}")]
    MalformedSegment(String),
}

/// 解析结构化指标行
///
/// 不含前缀时返回 `Ok(None)`；含前缀但字段缺失或数值非法时返回错误。
/// 未知字段被忽略。
pub fn parse_metric_line(line: &str) -> Result<Option<MetricLine>, MetricLineError> {
    let Some(start) = line.find(METRIC_PREFIX) else {
        return Ok(None);
    };
    let body = &line[start + METRIC_PREFIX.len()..];

    let mut k: Option<u32> = None;
    let mut values = BTreeMap::new();

    for segment in body.split('|') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| MetricLineError::MalformedSegment(segment.to_string()))?;
        // 数值止于第一个空白，其后的注释（如 "0.70 (val)"）忽略
        let key = key.trim();
        let value = value.split_whitespace().next().unwrap_or_default();

        if key == "k" {
            let cutoff = value.parse::<u32>().map_err(|_| MetricLineError::InvalidValue {
                field: key.to_string(),
                value: value.to_string(),
            })?;
            k = Some(cutoff);
        } else if let Some(kind) = MetricKind::from_wire_key(key) {
            let parsed = value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| MetricLineError::InvalidValue {
                    field: key.to_string(),
                    value: value.to_string(),
                })?;
            values.insert(kind, parsed);
        }
    }

    let k = k.ok_or(MetricLineError::MissingField("k"))?;
    if let Some(missing) = MetricKind::ALL.iter().find(|kind| !values.contains_key(kind)) {
        return Err(MetricLineError::MissingField(missing.wire_key()));
    }

    Ok(Some(MetricLine { k, values }))
}

/// 解析旧格式的 NDCG@10 行
pub fn parse_legacy_ndcg(line: &str) -> Option<f64> {
    LEGACY_NDCG
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// 在整个运行期间累积指标
#[derive(Debug, Default, Clone)]
pub struct MetricParser {
    metrics: MetricMap,
    legacy_ndcg: Option<f64>,
    rejected_lines: usize,
}

impl MetricParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 处理一行输出，两种格式相互独立
    pub fn observe(&mut self, line: &str) {
        match parse_metric_line(line) {
            Ok(Some(parsed)) => {
                self.metrics.insert(parsed.k, parsed.values);
            }
            Ok(None) => {}
            Err(_) => self.rejected_lines += 1,
        }

        if let Some(value) = parse_legacy_ndcg(line) {
            self.legacy_ndcg = Some(value);
            self.metrics
                .entry(LEGACY_CUTOFF)
                .or_default()
                .entry(MetricKind::Ndcg)
                .or_insert(value);
        }
    }

    pub fn metrics(&self) -> &MetricMap {
        &self.metrics
    }

    pub fn into_metrics(self) -> MetricMap {
        self.metrics
    }

    /// 最近一次旧格式 NDCG@10 的值
    pub fn legacy_ndcg(&self) -> Option<f64> {
        self.legacy_ndcg
    }

    /// 带前缀但被拒绝的行数
    pub fn rejected_lines(&self) -> usize {
        self.rejected_lines
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE_A: &str =
        "METRIC|k=10|precision=0.50|recall=0.40|map=0.30|ndcg=0.60|coverage=0.90|hitRate=0.70";
    const LINE_B: &str =
        "METRIC|k=10|precision=0.55|recall=0.45|map=0.35|ndcg=0.65|coverage=0.95|hitRate=0.75";

    #[test]
    fn test_structured_line_yields_all_six_values() {
        let mut parser = MetricParser::new();
        parser.observe(LINE_A);

        let metrics = parser.metrics();
        assert_eq!(metrics.len(), 1);
        let k10 = &metrics[&10];
        assert_eq!(k10.len(), 6);
        assert_eq!(k10[&MetricKind::Precision], 0.50);
        assert_eq!(k10[&MetricKind::Recall], 0.40);
        assert_eq!(k10[&MetricKind::Map], 0.30);
        assert_eq!(k10[&MetricKind::Ndcg], 0.60);
        assert_eq!(k10[&MetricKind::Coverage], 0.90);
        assert_eq!(k10[&MetricKind::HitRate], 0.70);
    }

    #[test]
    fn test_second_line_for_same_k_replaces_first() {
        let mut parser = MetricParser::new();
        parser.observe(LINE_A);
        parser.observe(LINE_B);

        let k10 = &parser.metrics()[&10];
        assert_eq!(k10[&MetricKind::Precision], 0.55);
        assert_eq!(k10[&MetricKind::HitRate], 0.75);
    }

    #[test]
    fn test_prefix_may_appear_mid_line() {
        let line = format!("2024-01-01 INFO trainer: {LINE_A}");
        let parsed = parse_metric_line(&line).unwrap().unwrap();
        assert_eq!(parsed.k, 10);
    }

    #[test]
    fn test_legacy_line_creates_entry_when_absent() {
        let mut parser = MetricParser::new();
        parser.observe("Validation NDCG@10 = 0.61");

        let k10 = &parser.metrics()[&10];
        assert_eq!(k10.len(), 1);
        assert_eq!(k10[&MetricKind::Ndcg], 0.61);
        assert_eq!(parser.legacy_ndcg(), Some(0.61));
    }

    #[test]
    fn test_legacy_line_does_not_override_structured_entry() {
        let mut parser = MetricParser::new();
        parser.observe(LINE_A);
        parser.observe("NDCG@10=0.99");

        assert_eq!(parser.metrics()[&10][&MetricKind::Ndcg], 0.60);
    }

    #[test]
    fn test_first_legacy_value_wins() {
        let mut parser = MetricParser::new();
        parser.observe("NDCG@10 = 0.10");
        parser.observe("NDCG@10 = 0.20");
        assert_eq!(parser.metrics()[&10][&MetricKind::Ndcg], 0.10);
    }

    #[test]
    fn test_structured_line_after_legacy_replaces_entry() {
        let mut parser = MetricParser::new();
        parser.observe("NDCG@10 = 0.10");
        parser.observe(LINE_A);
        assert_eq!(parser.metrics()[&10].len(), 6);
        assert_eq!(parser.metrics()[&10][&MetricKind::Ndcg], 0.60);
    }

    #[test]
    fn test_malformed_lines_are_rejected_explicitly() {
        assert_eq!(
            parse_metric_line("METRIC|k=10|precision=0.5|recall=0.4|map=0.3|ndcg=0.6|coverage=0.9"),
            Err(MetricLineError::MissingField("hitRate"))
        );
        assert_eq!(
            parse_metric_line("METRIC|precision=0.5|recall=0.4|map=0.3|ndcg=0.6|coverage=0.9|hitRate=0.7"),
            Err(MetricLineError::MissingField("k"))
        );
        assert!(matches!(
            parse_metric_line("METRIC|k=ten|precision=0.5|recall=0.4|map=0.3|ndcg=0.6|coverage=0.9|hitRate=0.7"),
            Err(MetricLineError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_metric_line("METRIC|k=10|precision=abc|recall=0.4|map=0.3|ndcg=0.6|coverage=0.9|hitRate=0.7"),
            Err(MetricLineError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_metric_line("METRIC|k=10|precision"),
            Err(MetricLineError::MalformedSegment(_))
        ));
    }

    #[test]
    fn test_values_stop_at_first_whitespace() {
        let line = parse_metric_line(
            "METRIC|k=10|precision=0.50|recall=0.40|map=0.30|ndcg=0.60 best|coverage=0.90|hitRate=0.70 (val)",
        )
        .unwrap()
        .unwrap();
        assert_eq!(line.k, 10);
        assert_eq!(line.values[&MetricKind::Ndcg], 0.60);
        assert_eq!(line.values[&MetricKind::HitRate], 0.70);

        let mut parser = MetricParser::new();
        parser.observe("METRIC|k=5 |precision=0.1|recall=0.2|map=0.3|ndcg=0.4|coverage=0.5|hitRate=0.6\t(test)");
        assert_eq!(parser.metrics()[&5][&MetricKind::HitRate], 0.6);
        assert_eq!(parser.rejected_lines(), 0);

        assert!(matches!(
            parse_metric_line("METRIC|k=10|precision= |recall=0.4|map=0.3|ndcg=0.6|coverage=0.9|hitRate=0.7"),
            Err(MetricLineError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_lines_contribute_nothing() {
        let mut parser = MetricParser::new();
        parser.observe("METRIC|k=10|precision=abc|recall=0.4|map=0.3|ndcg=0.6|coverage=0.9|hitRate=0.7");
        parser.observe("epoch 3 loss=0.12");
        assert!(parser.is_empty());
        assert_eq!(parser.rejected_lines(), 1);
    }

    #[test]
    fn test_unrelated_lines_are_ignored() {
        assert_eq!(parse_metric_line("training epoch 1/10"), Ok(None));
        assert_eq!(parse_legacy_ndcg("NDCG@20 = 0.5"), None);
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::HyperParameters;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://trainer.db".to_string(),
            max_connections: 5,
            min_connections: 1,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        if !self.url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!("数据库URL必须是SQLite格式"));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            cors_enabled: true,
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("API绑定地址不能为空"));
        }
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!("无效的API绑定地址: {}", self.bind_address));
        }
        Ok(())
    }
}

/// Training process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// 解释器，例如 python3
    pub interpreter: String,
    /// 训练脚本路径，相对路径基于 working_dir
    pub script_path: String,
    pub working_dir: String,
    /// `{version_tag}` 会被替换为版本标签
    pub artifact_path_template: String,
    pub terminate_grace_seconds: u64,
    pub kill_grace_seconds: u64,
    pub drain_timeout_millis: u64,
    pub yield_every_lines: usize,
    /// 设置后启用独立于读循环的取消看门狗
    pub cancel_poll_interval_millis: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_path: "train_model.py".to_string(),
            working_dir: ".".to_string(),
            artifact_path_template: "models/als_model_{version_tag}".to_string(),
            terminate_grace_seconds: 5,
            kill_grace_seconds: 2,
            drain_timeout_millis: 100,
            yield_every_lines: 5,
            cancel_poll_interval_millis: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interpreter.trim().is_empty() {
            return Err(anyhow::anyhow!("训练解释器不能为空"));
        }
        if self.script_path.trim().is_empty() {
            return Err(anyhow::anyhow!("训练脚本路径不能为空"));
        }
        if self.working_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("训练工作目录不能为空"));
        }
        if !self.artifact_path_template.contains("{version_tag}") {
            return Err(anyhow::anyhow!("模型产物路径模板必须包含 {{version_tag}}"));
        }
        if self.terminate_grace_seconds == 0 || self.kill_grace_seconds == 0 {
            return Err(anyhow::anyhow!("进程终止等待时间必须大于0"));
        }
        if self.yield_every_lines == 0 {
            return Err(anyhow::anyhow!("yield_every_lines 必须大于0"));
        }
        if self.cancel_poll_interval_millis == Some(0) {
            return Err(anyhow::anyhow!("取消轮询间隔必须大于0"));
        }
        Ok(())
    }

    /// 按版本标签生成模型产物路径
    pub fn artifact_path(&self, version_tag: &str) -> String {
        self.artifact_path_template
            .replace("{version_tag}", version_tag)
    }
}

/// 兜底超参数，调用方与计划都未给出时使用
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub rank: i64,
    pub reg_param: f64,
    pub alpha: f64,
    pub max_iter: i64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        HyperParameters::default().into()
    }
}

impl From<HyperParameters> for DefaultsConfig {
    fn from(params: HyperParameters) -> Self {
        Self {
            rank: params.rank,
            reg_param: params.reg_param,
            alpha: params.alpha,
            max_iter: params.max_iter,
        }
    }
}

impl DefaultsConfig {
    pub fn hyper_parameters(&self) -> HyperParameters {
        HyperParameters {
            rank: self.rank,
            reg_param: self.reg_param,
            alpha: self.alpha,
            max_iter: self.max_iter,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rank <= 0 || self.max_iter <= 0 {
            return Err(anyhow::anyhow!("默认 rank 与 max_iter 必须大于0"));
        }
        if !(self.reg_param.is_finite() && self.reg_param > 0.0) {
            return Err(anyhow::anyhow!("默认 reg_param 必须大于0"));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(anyhow::anyhow!("默认 alpha 必须大于0"));
        }
        Ok(())
    }
}

/// Schedule ticker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub tick_interval_seconds: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: 30,
        }
    }
}

impl ScheduleSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_seconds == 0 {
            return Err(anyhow::anyhow!("计划检查间隔必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow::anyhow!("不支持的日志格式: {}", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(anyhow::anyhow!("无效的日志级别: {}", self.level));
        }
        Ok(())
    }
}

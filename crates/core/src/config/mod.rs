//! 应用配置
//!
//! 配置来源按优先级从低到高：内置默认值、TOML 配置文件、`TRAINER_` 前缀的环境变量。

pub mod app_config;
pub mod sections;

pub use app_config::AppConfig;
pub use sections::{
    ApiConfig, DatabaseConfig, DefaultsConfig, LogFormat, LoggingConfig, ScheduleSettings,
    TrainingConfig,
};

use thiserror::Error;

/// 训练编排错误类型定义
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("训练运行未找到: {id}")]
    RunNotFound { id: String },

    #[error("模型版本未找到: {id}")]
    ModelVersionNotFound { id: i64 },

    #[error("训练计划未配置")]
    ScheduleNotConfigured,

    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("运行标识生成失败: {base} 在 {attempts} 次尝试后仍然冲突")]
    IdentifierExhausted { base: String, attempts: u32 },

    #[error("训练进程启动失败: {0}")]
    Launch(String),

    #[error("训练进程执行错误: {0}")]
    Process(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type TrainerResult<T> = std::result::Result<T, TrainerError>;

impl TrainerError {
    pub fn run_not_found<S: Into<String>>(id: S) -> Self {
        Self::RunNotFound { id: id.into() }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 对外暴露的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            TrainerError::Validation(_) | TrainerError::InvalidCron { .. } => "VALIDATION_ERROR",
            TrainerError::RunNotFound { .. }
            | TrainerError::ModelVersionNotFound { .. }
            | TrainerError::ScheduleNotConfigured => "NOT_FOUND",
            TrainerError::IdentifierExhausted { .. } => "IDENTIFIER_EXHAUSTED",
            TrainerError::Launch(_) => "LAUNCH_ERROR",
            TrainerError::Process(_) | TrainerError::Io(_) => "PROCESS_ERROR",
            TrainerError::Database(_) => "DATABASE_ERROR",
            TrainerError::Configuration(_) => "CONFIGURATION_ERROR",
            TrainerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == "NOT_FOUND"
    }

    pub fn is_validation(&self) -> bool {
        self.code() == "VALIDATION_ERROR"
    }
}

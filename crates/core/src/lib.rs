pub mod config;
pub mod duration;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{TrainerError, TrainerResult};
pub use models::{
    HyperParameterOverrides, HyperParameters, Metric, MetricKind, ModelVersion, NewMetric,
    NewModelVersion, Run, RunPage, RunQuery, RunStatus, ScheduleConfig, ScheduleUpdate, SortOrder,
    TriggerSource,
};
pub use traits::{ModelVersionRepository, RunRepository, ScheduleRepository};

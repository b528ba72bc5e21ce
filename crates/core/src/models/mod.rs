pub mod model_version;
pub mod run;
pub mod schedule;

pub use model_version::{Metric, MetricKind, ModelVersion, NewMetric, NewModelVersion};
pub use run::{
    HyperParameterOverrides, HyperParameters, Run, RunPage, RunQuery, RunStatus, SortOrder,
    TriggerSource,
};
pub use schedule::{ScheduleConfig, ScheduleUpdate};

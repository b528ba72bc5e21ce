pub mod metric_parser;
pub mod publisher;
pub mod supervisor;
pub mod termination;

pub use metric_parser::{MetricLine, MetricLineError, MetricMap, MetricParser};
pub use publisher::VersionPublisher;
pub use supervisor::{version_tag, ProcessSupervisor, RunOutcome, TrainingCommand};
pub use termination::{escalate, EscalationPolicy, ProcessControl, TerminationOutcome};

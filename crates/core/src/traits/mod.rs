pub mod repository;

pub use repository::{ModelVersionRepository, RunRepository, ScheduleRepository};

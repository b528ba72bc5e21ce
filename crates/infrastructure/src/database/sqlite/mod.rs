pub mod sqlite_model_version_repository;
pub mod sqlite_run_repository;
pub mod sqlite_schedule_repository;

pub use sqlite_model_version_repository::SqliteModelVersionRepository;
pub use sqlite_run_repository::SqliteRunRepository;
pub use sqlite_schedule_repository::SqliteScheduleRepository;

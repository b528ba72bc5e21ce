pub mod database;

pub use database::{
    DatabaseManager, SqliteModelVersionRepository, SqliteRunRepository, SqliteScheduleRepository,
};

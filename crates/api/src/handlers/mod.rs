pub mod health;
pub mod model_versions;
pub mod runs;
pub mod schedule;
pub mod statistics;

pub mod config;
pub mod database;
pub mod job_repository;
pub mod status_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use job_repository::HarvestJobRepository;
pub use status_repository::IngestionStatusRepository;

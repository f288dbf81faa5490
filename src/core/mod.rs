// src/core/mod.rs
//! Storage, configuration and file-system services shared by the pipeline

pub mod audit;
pub mod database;
pub mod fs_ops;
pub mod job_store;
pub mod settings;

pub use audit::AuditLog;
pub use database::Database;
pub use fs_ops::FsOps;
pub use job_store::{BatchInsert, JobRepository};
pub use settings::SettingsRepository;

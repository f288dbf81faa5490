// src/types/mod.rs
pub mod job;
pub mod log;
pub mod profile;

pub use job::{JobRecord, JobUpdate, RawJob};
pub use log::{AgentLogEntry, Severity};
pub use profile::RelevanceProfile;

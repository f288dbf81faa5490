// src/pipeline/mod.rs
pub mod approval;
pub mod corrector;
pub mod error_tracker;
pub mod evaluator;
pub mod orchestrator;
pub mod profile;
pub mod schedule;
pub mod validator;

pub use approval::{
    operator_channel, run_console_operator, ApprovalDecision, ApprovalGate, OperatorChannel,
    OperatorInbox, RepairProposal,
};
pub use corrector::{RepairOutcome, RepairState, SelfCorrector};
pub use error_tracker::{ErrorEntry, ErrorTracker};
pub use evaluator::Evaluator;
pub use orchestrator::{CycleOutcome, Orchestrator, PipelineDeps, PipelineSettings, PipelineStatus};
pub use profile::ProfileStore;
pub use schedule::{Clock, ScheduleConfig, ScheduleWindow, SystemClock};
pub use validator::Validator;

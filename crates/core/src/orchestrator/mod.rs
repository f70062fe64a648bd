//! Job orchestration.
//!
//! The orchestrator owns admission, rate limiting, and the background task
//! of every job until it reaches a terminal state.

mod config;
mod runner;
mod types;

pub use config::PacingConfig;
pub use runner::JobOrchestrator;
pub use types::{OrchestratorError, OrchestratorStatus, SubmitError};

//! Phase orchestration for one step.
//!
//! `PhaseOrchestrator` moves a step file through the schema's phases,
//! appends each settled phase to the project's execution log, keeps the
//! running phase's timeout monitor in the step file between polls, and
//! audits every transition. Each CLI invocation opens, acts, and saves, so
//! no state lives outside the step file and the log.

pub mod runner;

pub use runner::{PhaseOrchestrator, PollReport};

//! Execution orchestration.
//!
//! Covers the execution lifecycle handle, the session and execution
//! registries, the per-execution runner, stall/deadline timing and
//! provider-limit detection.

pub mod execution;
pub mod limit_detector;
pub mod runner;
pub mod session_manager;
pub mod stall_detector;

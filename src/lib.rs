#![forbid(unsafe_code)]

//! `crossdebug`: cross-boundary debug session orchestrator.
//!
//! Pairs a test debug session with a nested session attached to the
//! secondary process the test spawns, launching and owning the headless
//! debug server the nested session connects to.

pub mod config;
pub mod detection;
pub mod errors;
pub mod host;
pub mod interceptor;
pub mod models;
pub mod orchestrator;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use orchestrator::Orchestrator;

//! Core domain types and traits for the cirun build runner.
//!
//! This crate contains:
//! - Build identifiers and terminal build states
//! - Runner configuration model
//! - The `Build` collaborator trait the executors drive
//! - The `Executor` trait and attempt outcome
//! - Signaling handles shared between executors and log watchers
//! - The build log resource

pub mod build;
pub mod config;
pub mod error;
pub mod executor;
pub mod id;
pub mod log;
pub mod signal;
pub mod state;

pub use build::Build;
pub use config::{DockerConfig, RunnerConfig, SshConfig};
pub use error::{Error, Result};
pub use executor::{BuildOutcome, Executor};
pub use id::BuildId;
pub use log::BuildLog;
pub use signal::{AbortHandle, FinishSender, WatcherShutdown};
pub use state::BuildState;

//! KDL configuration parsing for cirun.
//!
//! This crate handles parsing of the runner configuration file
//! (`config.kdl`): global settings and one block per registered runner.

pub mod error;
pub mod runner;

pub use error::{ConfigError, ConfigResult};
pub use runner::{RunnerFile, load_runner_config, parse_runner_config};

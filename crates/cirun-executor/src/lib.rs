//! Build execution backends for cirun.
//!
//! Provides executor implementations for running one build attempt:
//! - Local shell
//! - Docker container
//! - Docker container reached over SSH
//!
//! All of them share [`LifecycleController`] for preparation, supervision
//! and cleanup.

pub mod docker;
pub mod docker_ssh;
pub mod lifecycle;
pub mod shell;

pub use cirun_core::executor::{BuildOutcome, Executor};
pub use docker::{DockerCommandExecutor, DockerExecutor};
pub use docker_ssh::DockerSshExecutor;
pub use lifecycle::{DEFAULT_TIMEOUT, LifecycleController, effective_timeout};
pub use shell::ShellExecutor;

use cirun_core::RunnerConfig;

/// Backends a runner can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Shell,
    Docker,
    DockerSsh,
}

impl ExecutorKind {
    /// Every identifier the selector accepts.
    pub const IDENTIFIERS: &'static [&'static str] = &["", "shell", "docker", "docker-ssh"];

    /// Map a configured identifier to a backend. Case sensitive.
    pub fn parse(identifier: &str) -> Option<Self> {
        match identifier {
            "" | "shell" => Some(ExecutorKind::Shell),
            "docker" => Some(ExecutorKind::Docker),
            "docker-ssh" => Some(ExecutorKind::DockerSsh),
            _ => None,
        }
    }

    pub fn default_builds_dir(&self) -> &'static str {
        match self {
            ExecutorKind::Shell => shell::DEFAULT_BUILDS_DIR,
            ExecutorKind::Docker => docker::DEFAULT_BUILDS_DIR,
            ExecutorKind::DockerSsh => docker_ssh::DEFAULT_BUILDS_DIR,
        }
    }

    pub fn create(&self) -> Box<dyn Executor> {
        match self {
            ExecutorKind::Shell => Box::new(ShellExecutor::new()),
            ExecutorKind::Docker => Box::new(DockerCommandExecutor::new()),
            ExecutorKind::DockerSsh => Box::new(DockerSshExecutor::new()),
        }
    }
}

/// Select the executor configured for this runner.
///
/// Returns `None` for an unknown backend identifier; callers must treat that
/// as a fatal configuration error.
pub fn new_executor(config: &RunnerConfig) -> Option<Box<dyn Executor>> {
    ExecutorKind::parse(&config.executor).map(|kind| kind.create())
}

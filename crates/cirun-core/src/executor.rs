//! Executor trait.
//!
//! Executors run one build attempt on a backend (local shell, container,
//! container over SSH). They are created per attempt and driven in order:
//! `prepare`, `start`, `wait`, `cleanup`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{AbortHandle, Build, BuildState, Result, RunnerConfig};

/// Verdict of an attempt, as it was reported to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub state: BuildState,
    /// Trace suffix sent with the state. Empty on success and abort.
    pub message: String,
}

impl BuildOutcome {
    pub fn success() -> Self {
        Self {
            state: BuildState::Success,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: BuildState::Failed,
            message: message.into(),
        }
    }
}

/// Trait for build executors.
#[async_trait]
pub trait Executor: Send {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Generate the script, open the build log and set up signaling.
    async fn prepare(&mut self, config: Arc<RunnerConfig>, build: Arc<dyn Build>) -> Result<()>;

    /// Launch the job. Must eventually deliver one completion result.
    async fn start(&mut self) -> Result<()>;

    /// Block until the attempt resolves, then report it.
    async fn wait(&mut self) -> Result<BuildOutcome>;

    /// Release everything the attempt holds. Never fails.
    async fn cleanup(&mut self);

    /// Handle for aborting the attempt from outside. `None` before `prepare`.
    fn abort_handle(&self) -> Option<AbortHandle>;
}

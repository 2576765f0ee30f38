//! The build collaborator driven by executors.
//!
//! A `Build` knows how to turn a job into a script, where its log lives, how
//! to stream the trace while the job runs and how to submit the verdict.
//! Executors never talk to the server themselves.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::{AbortHandle, BuildId, BuildLog, BuildState, Result, RunnerConfig, WatcherShutdown};

#[async_trait]
pub trait Build: Send + Sync {
    /// Server assigned id of this build.
    fn id(&self) -> BuildId;

    /// Configured timeout in seconds. Zero or negative means unset.
    fn timeout(&self) -> i64;

    /// Generate the executable script, rooted at `builds_dir`.
    fn generate_script(&self, builds_dir: &Path) -> Result<Vec<u8>>;

    /// Create the log the backend writes output to.
    fn create_build_log(&self) -> Result<BuildLog>;

    /// Remove the log artifact. Best effort.
    fn delete_build_log(&self);

    /// Stream the trace until `shutdown` is requested.
    ///
    /// May raise `abort`, e.g. when the server reports the build as cancelled.
    async fn watch_trace(
        &self,
        config: Arc<RunnerConfig>,
        abort: AbortHandle,
        shutdown: WatcherShutdown,
    );

    /// Submit the final state. Called exactly once per attempt.
    async fn finish_build(&self, config: Arc<RunnerConfig>, state: BuildState, message: String);
}

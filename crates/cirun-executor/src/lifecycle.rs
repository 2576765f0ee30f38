//! Lifecycle shared by every backend.
//!
//! A backend composes one [`LifecycleController`] and delegates `prepare`,
//! `wait` and `cleanup` to it. Only starting the job (and optionally killing
//! it on abort) is backend specific.

use cirun_core::signal::{
    AbortReceiver, FinishReceiver, abort_channel, finish_channel, shutdown_channel,
};
use cirun_core::{
    AbortHandle, Build, BuildLog, BuildOutcome, Error, FinishSender, Result, RunnerConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// Timeout applied when the build does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Invoked when the attempt is aborted or times out, before the verdict is
/// reported.
pub type AbortCallback = Box<dyn FnOnce(&LifecycleController) + Send + Sync>;

/// Timeout for a build: its own if positive, `default` otherwise.
pub fn effective_timeout(build_timeout: i64, default: Duration) -> Duration {
    if build_timeout > 0 {
        Duration::from_secs(build_timeout as u64)
    } else {
        default
    }
}

/// Per-attempt state and the prepare / wait / cleanup logic.
pub struct LifecycleController {
    default_builds_dir: &'static str,
    default_timeout: Duration,
    watcher_grace: Option<Duration>,

    config: Option<Arc<RunnerConfig>>,
    build: Option<Arc<dyn Build>>,
    builds_dir: PathBuf,
    script: Vec<u8>,
    build_log: Option<BuildLog>,

    abort_handle: Option<AbortHandle>,
    abort_rx: Option<AbortReceiver>,
    finish_tx: Option<FinishSender>,
    finish_rx: Option<FinishReceiver>,
    on_abort: Option<AbortCallback>,

    span: Span,
}

impl LifecycleController {
    pub fn new(default_builds_dir: &'static str) -> Self {
        Self {
            default_builds_dir,
            default_timeout: DEFAULT_TIMEOUT,
            watcher_grace: None,
            config: None,
            build: None,
            builds_dir: PathBuf::from(default_builds_dir),
            script: Vec::new(),
            build_log: None,
            abort_handle: None,
            abort_rx: None,
            finish_tx: None,
            finish_rx: None,
            on_abort: None,
            span: Span::none(),
        }
    }

    /// Override the timeout used when the build has none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Bound the wait for the trace watcher to stop. Unbounded by default.
    pub fn with_watcher_grace(mut self, grace: Duration) -> Self {
        self.watcher_grace = Some(grace);
        self
    }

    pub fn default_builds_dir(&self) -> &'static str {
        self.default_builds_dir
    }

    pub fn builds_dir(&self) -> &Path {
        &self.builds_dir
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }

    pub fn config(&self) -> Option<&Arc<RunnerConfig>> {
        self.config.as_ref()
    }

    pub fn build(&self) -> Option<&Arc<dyn Build>> {
        self.build.as_ref()
    }

    pub fn build_log(&self) -> Option<&BuildLog> {
        self.build_log.as_ref()
    }

    /// Span tagging everything logged for this attempt.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort_handle.clone()
    }

    /// Sender a backend uses to deliver its completion result.
    pub fn finish_sender(&self) -> Result<FinishSender> {
        self.finish_tx.clone().ok_or(Error::NotPrepared)
    }

    /// Install the backend's abort hook, replacing any previous one.
    pub fn set_abort_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(&LifecycleController) + Send + Sync + 'static,
    {
        self.on_abort = Some(Box::new(callback));
    }

    pub fn prepare(&mut self, config: Arc<RunnerConfig>, build: Arc<dyn Build>) -> Result<()> {
        self.span = info_span!(
            "build",
            runner = %config.short_description(),
            build_id = %build.id(),
        );
        let span = self.span.clone();
        let _enter = span.enter();

        let (abort_handle, abort_rx) = abort_channel();
        let (finish_tx, finish_rx) = finish_channel();
        self.abort_handle = Some(abort_handle);
        self.abort_rx = Some(abort_rx);
        self.finish_tx = Some(finish_tx);
        self.finish_rx = Some(finish_rx);

        self.builds_dir = match config.builds_dir.as_deref() {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(self.default_builds_dir),
        };
        self.config = Some(config);
        self.build = Some(build.clone());

        debug!(builds_dir = %self.builds_dir.display(), "Generating build script");
        self.script = build.generate_script(&self.builds_dir)?;

        let build_log = build.create_build_log()?;
        debug!(log = %build_log.path().display(), "Created build log");
        self.build_log = Some(build_log);
        Ok(())
    }

    /// Resolve the attempt and report it.
    ///
    /// The first of abort, timeout and completion decides the verdict. The
    /// trace watcher is stopped and awaited before the verdict goes out.
    pub async fn wait(&mut self) -> Result<BuildOutcome> {
        let span = self.span.clone();
        self.wait_inner().instrument(span).await
    }

    async fn wait_inner(&mut self) -> Result<BuildOutcome> {
        let (Some(config), Some(build), Some(abort_handle)) = (
            self.config.clone(),
            self.build.clone(),
            self.abort_handle.clone(),
        ) else {
            return Err(Error::NotPrepared);
        };
        let (Some(mut abort_rx), Some(mut finish_rx)) = (self.abort_rx.take(), self.finish_rx.take())
        else {
            return Err(Error::NotPrepared);
        };
        // Backends hold their own clones; a sender vanishing unheard must be
        // observable as a closed channel.
        self.finish_tx = None;

        let (stop_tx, shutdown) = shutdown_channel();
        let mut watcher: JoinHandle<()> = tokio::spawn({
            let build = build.clone();
            let config = config.clone();
            async move { build.watch_trace(config, abort_handle, shutdown).await }
                .instrument(Span::current())
        });

        let timeout = effective_timeout(build.timeout(), self.default_timeout);

        debug!(timeout_secs = timeout.as_secs(), "Waiting for signals...");
        let outcome = tokio::select! {
            biased;

            Some(()) = abort_rx.recv() => {
                info!("Build got aborted.");
                self.run_abort_callback();
                BuildOutcome::failed(String::new())
            }

            result = finish_rx.recv() => match result {
                Some(Ok(())) => {
                    info!("Build succeeded.");
                    BuildOutcome::success()
                }
                Some(Err(e)) => {
                    info!(error = %e, "Build failed.");
                    BuildOutcome::failed(format!("\nBuild failed with {}", e))
                }
                None => {
                    warn!("Backend went away without reporting a result");
                    BuildOutcome::failed("\nBuild failed with execution finished without reporting a result")
                }
            },

            _ = tokio::time::sleep(timeout) => {
                info!(timeout_secs = timeout.as_secs(), "Build timed out.");
                self.run_abort_callback();
                BuildOutcome::failed(format!(
                    "\nCI Timeout. Execution took longer than {} seconds",
                    timeout.as_secs()
                ))
            }
        };

        debug!("Waiting for build log updater to finish");
        let _ = stop_tx.send(());
        match self.watcher_grace {
            None => {
                if let Err(e) = watcher.await {
                    warn!(error = %e, "Trace watcher terminated abnormally");
                }
            }
            Some(grace) => match tokio::time::timeout(grace, &mut watcher).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Trace watcher terminated abnormally"),
                Err(_) => {
                    warn!(
                        grace_ms = grace.as_millis() as u64,
                        "Trace watcher ignored shutdown, cancelling it"
                    );
                    watcher.abort();
                    let _ = watcher.await;
                }
            },
        }
        debug!("Build log updater finished.");

        build
            .finish_build(config, outcome.state, outcome.message.clone())
            .await;
        Ok(outcome)
    }

    fn run_abort_callback(&mut self) {
        if let Some(callback) = self.on_abort.take() {
            callback(self);
        }
    }

    /// Release the attempt's resources. Safe at any point of the lifecycle.
    pub fn cleanup(&mut self) {
        let _enter = self.span.enter();

        if let Some(build) = &self.build {
            build.delete_build_log();
        }

        if let Some(build_log) = self.build_log.take() {
            if let Err(e) = build_log.close() {
                warn!(error = %e, "Failed to close build log");
            }
        }
    }
}

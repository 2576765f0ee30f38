//! Local shell executor implementation.

use async_trait::async_trait;
use cirun_core::{
    AbortHandle, Build, BuildOutcome, Error, Executor, FinishSender, Result, RunnerConfig,
};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info, warn};

use crate::lifecycle::LifecycleController;

/// Builds directory used when the runner config does not set one.
pub const DEFAULT_BUILDS_DIR: &str = "tmp/builds";

/// Runs the build script with a local shell, feeding it on stdin.
pub struct ShellExecutor {
    base: LifecycleController,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::with_controller(LifecycleController::new(DEFAULT_BUILDS_DIR))
    }

    pub fn with_controller(base: LifecycleController) -> Self {
        Self { base }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.base
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a process exit status onto a completion result.
pub(crate) fn exit_status_result(status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(Error::ExecutionFailed(format!("exit code {}", code))),
        None => Err(Error::ExecutionFailed(
            "process terminated by signal".to_string(),
        )),
    }
}

/// Spawn `cmd` with `script` on stdin and supervise it until it exits or is
/// killed. The result goes to `finish`; firing the returned sender kills the
/// process.
pub(crate) fn spawn_supervised(
    base: &LifecycleController,
    mut cmd: Command,
    finish: FinishSender,
) -> Result<oneshot::Sender<()>> {
    let log = base.build_log().ok_or(Error::NotPrepared)?;
    cmd.stdin(Stdio::piped())
        .stdout(log.stdio()?)
        .stderr(log.stdio()?)
        .kill_on_drop(true);
    // Own process group, so a kill reaches everything the script started.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Internal("child stdin not captured".to_string()))?;
    let script = base.script().to_vec();
    let span = base.span().clone();

    tokio::spawn(
        async move {
            if let Err(e) = stdin.write_all(&script).await {
                warn!(error = %e, "Failed to write build script");
            }
            // Dropping stdin closes it so the shell sees EOF.
        }
        .instrument(span.clone()),
    );

    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(
        async move {
            let result = supervise(child, pid, kill_rx).await;
            finish.finish(result);
        }
        .instrument(span),
    );
    Ok(kill_tx)
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: oneshot::Receiver<()>,
) -> Result<()> {
    tokio::select! {
        status = child.wait() => {
            let status = status?;
            debug!(exit_code = ?status.code(), "Build process exited");
            exit_status_result(status)
        }
        Ok(()) = &mut kill_rx => {
            info!("Killing build process");
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill build process");
            }
            Err(Error::ExecutionFailed("process killed".to_string()))
        }
    }
}

/// SIGKILL the process group led by `pid`.
///
/// The leader is not reaped yet when this runs, so the group id is still
/// valid.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = raw, "Killed build process group"),
        Err(e) => warn!(pgid = raw, error = %e, "Failed to kill build process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn prepare(&mut self, config: Arc<RunnerConfig>, build: Arc<dyn Build>) -> Result<()> {
        self.base.prepare(config, build)
    }

    async fn start(&mut self) -> Result<()> {
        let config = self.base.config().ok_or(Error::NotPrepared)?.clone();
        let finish = self.base.finish_sender()?;

        info!(shell = %config.shell(), "Starting build script");
        let cmd = Command::new(config.shell());
        let kill = spawn_supervised(&self.base, cmd, finish)?;
        self.base.set_abort_callback(move |_| {
            let _ = kill.send(());
        });
        Ok(())
    }

    async fn wait(&mut self) -> Result<BuildOutcome> {
        self.base.wait().await
    }

    async fn cleanup(&mut self) {
        self.base.cleanup();
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        self.base.abort_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tests::FakeBuild;
    use cirun_core::BuildState;
    use std::time::Duration;

    fn config() -> Arc<RunnerConfig> {
        Arc::new(RunnerConfig {
            name: "shell-test".to_string(),
            token: "shelltoken".to_string(),
            shell: Some("sh".to_string()),
            ..Default::default()
        })
    }

    fn build_with_script(script: &str) -> Arc<FakeBuild> {
        let mut build = FakeBuild::new();
        build.script = script.to_string();
        Arc::new(build)
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_mapping() {
        use std::os::unix::process::ExitStatusExt;

        assert!(exit_status_result(ExitStatus::from_raw(0)).is_ok());
        let err = exit_status_result(ExitStatus::from_raw(2 << 8)).unwrap_err();
        assert_eq!(err.to_string(), "execution failed: exit code 2");
        let err = exit_status_result(ExitStatus::from_raw(9)).unwrap_err();
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_default_builds_dir() {
        let executor = ShellExecutor::new();
        assert_eq!(executor.name(), "shell");
        assert_eq!(executor.controller().default_builds_dir(), "tmp/builds");
    }

    #[tokio::test]
    async fn test_start_before_prepare() {
        let mut executor = ShellExecutor::new();
        assert!(matches!(executor.start().await, Err(Error::NotPrepared)));
        assert!(executor.abort_handle().is_none());
    }

    #[tokio::test]
    async fn test_successful_script() {
        let build = build_with_script("echo hello from shell\nexit 0\n");
        let mut executor = ShellExecutor::new();
        executor.prepare(config(), build.clone()).await.unwrap();
        executor.start().await.unwrap();

        let outcome = executor.wait().await.unwrap();
        assert_eq!(outcome.state, BuildState::Success);

        let log = std::fs::read_to_string(build.log_path()).unwrap();
        assert!(log.contains("hello from shell"));

        executor.cleanup().await;
        assert!(!build.log_path().exists());
    }

    #[tokio::test]
    async fn test_failing_script() {
        let build = build_with_script("echo oops >&2\nexit 3\n");
        let mut executor = ShellExecutor::new();
        executor.prepare(config(), build.clone()).await.unwrap();
        executor.start().await.unwrap();

        let outcome = executor.wait().await.unwrap();
        assert_eq!(outcome.state, BuildState::Failed);
        assert!(outcome.message.contains("exit code 3"));

        let log = std::fs::read_to_string(build.log_path()).unwrap();
        assert!(log.contains("oops"));
        executor.cleanup().await;
    }

    #[tokio::test]
    async fn test_abort_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        // The inner shell is a grandchild of the executor.
        let build = build_with_script(&format!(
            "sh -c 'sleep 1; echo survived > {}'\n",
            marker.display()
        ));
        let mut executor = ShellExecutor::new();
        executor.prepare(config(), build.clone()).await.unwrap();
        executor.start().await.unwrap();

        let abort = executor.abort_handle().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            abort.abort();
        });

        let started = std::time::Instant::now();
        let outcome = executor.wait().await.unwrap();
        assert_eq!(outcome.state, BuildState::Failed);
        assert!(outcome.message.is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));
        executor.cleanup().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists(), "script kept running after abort");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let mut fake = FakeBuild::new();
        fake.script = "sleep 30\n".to_string();
        fake.timeout = 1;
        let build = Arc::new(fake);

        let mut executor = ShellExecutor::new();
        executor.prepare(config(), build.clone()).await.unwrap();
        executor.start().await.unwrap();

        let outcome = executor.wait().await.unwrap();
        assert_eq!(outcome.state, BuildState::Failed);
        assert!(outcome.message.contains("1 seconds"));
        executor.cleanup().await;
    }

    #[tokio::test]
    async fn test_missing_shell_fails_start() {
        let build = build_with_script("true\n");
        let config = Arc::new(RunnerConfig {
            shell: Some("/nonexistent/shell".to_string()),
            ..Default::default()
        });
        let mut executor = ShellExecutor::new();
        executor.prepare(config, build).await.unwrap();

        assert!(matches!(executor.start().await, Err(Error::Io(_))));
        executor.cleanup().await;
    }
}

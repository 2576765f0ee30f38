//! A build driven from the command line.
//!
//! Stands in for a server-assigned build: the script comes from the command
//! line, the trace is forwarded to stdout and the verdict is kept in memory.

use async_trait::async_trait;
use cirun_core::{
    AbortHandle, Build, BuildId, BuildLog, BuildOutcome, BuildState, Error, Result, RunnerConfig,
    WatcherShutdown,
};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const TRACE_INTERVAL: Duration = Duration::from_millis(500);

pub struct LocalBuild {
    id: BuildId,
    commands: Vec<String>,
    timeout: i64,
    log_dir: TempDir,
    outcome: Mutex<Option<BuildOutcome>>,
}

impl LocalBuild {
    pub fn new(id: BuildId, commands: Vec<String>, timeout: i64) -> Result<Self> {
        Ok(Self {
            id,
            commands,
            timeout,
            log_dir: tempfile::Builder::new().prefix("cirun-").tempdir()?,
            outcome: Mutex::new(None),
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.path().join(format!("build-{}.log", self.id))
    }

    /// The verdict, once `finish_build` ran.
    pub fn outcome(&self) -> Option<BuildOutcome> {
        self.outcome.lock().ok().and_then(|o| o.clone())
    }

    /// Copy log bytes past `offset` to stdout, returning the new offset.
    async fn forward_trace(&self, offset: u64) -> u64 {
        let mut file = match tokio::fs::File::open(self.log_path()).await {
            Ok(file) => file,
            Err(e) => {
                debug!(error = %e, "Build log not readable yet");
                return offset;
            }
        };
        if let Err(e) = file.seek(SeekFrom::Start(offset)).await {
            debug!(error = %e, "Failed to seek build log");
            return offset;
        }

        let mut chunk = Vec::new();
        if let Err(e) = file.read_to_end(&mut chunk).await {
            debug!(error = %e, "Failed to read build log");
            return offset;
        }
        if !chunk.is_empty() {
            let mut stdout = tokio::io::stdout();
            let _ = stdout.write_all(&chunk).await;
            let _ = stdout.flush().await;
        }
        offset + chunk.len() as u64
    }

    /// Forward the trace until shutdown, aborting the build on interrupt.
    ///
    /// The listener outlives every loop iteration, so an interrupt that
    /// arrives while a chunk is being forwarded is still seen.
    async fn trace_until_shutdown(
        &self,
        abort: AbortHandle,
        mut shutdown: WatcherShutdown,
        mut interrupt: Option<Interrupt>,
    ) {
        let mut offset = 0;
        let mut ticker = tokio::time::interval(TRACE_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.requested() => break,
                _ = interrupted(&mut interrupt) => {
                    warn!("Interrupted, aborting build");
                    abort.abort();
                }
                _ = ticker.tick() => {}
            }
            offset = self.forward_trace(offset).await;
        }
        self.forward_trace(offset).await;
    }
}

#[cfg(unix)]
type Interrupt = tokio::signal::unix::Signal;

#[cfg(windows)]
type Interrupt = tokio::signal::windows::CtrlC;

#[cfg(unix)]
fn interrupt_listener() -> std::io::Result<Interrupt> {
    use tokio::signal::unix::{SignalKind, signal};
    signal(SignalKind::interrupt())
}

#[cfg(windows)]
fn interrupt_listener() -> std::io::Result<Interrupt> {
    tokio::signal::windows::ctrl_c()
}

/// Next interrupt. Never resolves without a working listener.
async fn interrupted(listener: &mut Option<Interrupt>) {
    if let Some(listener) = listener {
        if listener.recv().await.is_some() {
            return;
        }
    }
    std::future::pending::<()>().await
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
impl Build for LocalBuild {
    fn id(&self) -> BuildId {
        self.id
    }

    fn timeout(&self) -> i64 {
        self.timeout
    }

    fn generate_script(&self, builds_dir: &Path) -> Result<Vec<u8>> {
        if self.commands.is_empty() {
            return Err(Error::ScriptGeneration("no commands to run".to_string()));
        }

        let project_dir = builds_dir.join(self.id.to_string());
        let project_dir = shell_quote(&project_dir.display().to_string());

        let mut script = String::from("set -e\n\n");
        script.push_str(&format!("mkdir -p {}\n", project_dir));
        script.push_str(&format!("cd {}\n\n", project_dir));
        for command in &self.commands {
            script.push_str(&format!("echo {}\n", shell_quote(&format!("$ {}", command))));
            script.push_str(command);
            script.push('\n');
        }
        Ok(script.into_bytes())
    }

    fn create_build_log(&self) -> Result<BuildLog> {
        Ok(BuildLog::create(self.log_path())?)
    }

    fn delete_build_log(&self) {
        match std::fs::remove_file(self.log_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to delete build log"),
        }
    }

    async fn watch_trace(
        &self,
        _config: Arc<RunnerConfig>,
        abort: AbortHandle,
        shutdown: WatcherShutdown,
    ) {
        let interrupt = match interrupt_listener() {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!(error = %e, "Failed to listen for interrupts");
                None
            }
        };
        self.trace_until_shutdown(abort, shutdown, interrupt).await;
    }

    async fn finish_build(&self, config: Arc<RunnerConfig>, state: BuildState, message: String) {
        info!(runner = %config.name, build_id = %self.id, state = %state, "Build finished");
        if !message.is_empty() {
            println!("{}", message);
        }
        if let Ok(mut outcome) = self.outcome.lock() {
            *outcome = Some(BuildOutcome { state, message });
        }
    }
}

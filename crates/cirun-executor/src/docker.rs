//! Docker executor implementation.
//!
//! [`DockerExecutor`] holds what the container backends share: the daemon
//! connection, image pulls, container creation and removal.
//! [`DockerCommandExecutor`] runs the build script as the container command.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::{API_DEFAULT_VERSION, Docker};
use bytes::Bytes;
use cirun_core::{
    AbortHandle, Build, BuildId, BuildOutcome, DockerConfig, Error, Executor, Result, RunnerConfig,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info, warn};

use crate::lifecycle::LifecycleController;

/// Builds directory used inside containers when the config does not set one.
pub const DEFAULT_BUILDS_DIR: &str = "/builds";

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Container plumbing shared by the docker backends.
pub struct DockerExecutor {
    pub(crate) base: LifecycleController,
    client: Option<Docker>,
    container: Option<String>,
}

impl DockerExecutor {
    pub fn new(default_builds_dir: &'static str) -> Self {
        Self::with_controller(LifecycleController::new(default_builds_dir))
    }

    pub fn with_controller(base: LifecycleController) -> Self {
        Self {
            base,
            client: None,
            container: None,
        }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.base
    }

    pub(crate) fn container_name(build_id: BuildId) -> String {
        format!("cirun-build-{}", build_id)
    }

    fn connect(config: &DockerConfig) -> Result<Docker> {
        let connected = match config.host.as_deref() {
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) if !host.is_empty() => {
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            _ => Docker::connect_with_local_defaults(),
        };
        connected.map_err(|e| Error::Internal(format!("Failed to connect to Docker: {}", e)))
    }

    fn docker_config(&self) -> Result<&DockerConfig> {
        self.base
            .config()
            .ok_or(Error::NotPrepared)?
            .docker
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("docker section missing".to_string()))
    }

    pub(crate) fn client(&self) -> Result<&Docker> {
        self.client.as_ref().ok_or(Error::NotPrepared)
    }

    /// Prepare the lifecycle, then check the docker section and connect.
    pub async fn prepare(&mut self, config: Arc<RunnerConfig>, build: Arc<dyn Build>) -> Result<()> {
        self.base.prepare(config, build)?;

        let docker = self.docker_config()?;
        if docker.image.is_empty() {
            return Err(Error::InvalidInput("docker image not configured".to_string()));
        }
        let client = Self::connect(docker)?;
        self.client = Some(client);
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.client()?.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Pull warning");
                }
            }
        }
        Ok(())
    }

    /// Pull the image, then create and start the build container.
    ///
    /// `cmd` overrides the image command; `None` keeps its entrypoint.
    pub(crate) async fn start_container(&mut self, cmd: Option<Vec<String>>) -> Result<String> {
        let build_id = self.base.build().ok_or(Error::NotPrepared)?.id();
        let docker = self.docker_config()?.clone();
        let name = Self::container_name(build_id);

        self.pull_image(&docker.image).await?;

        let host_config = HostConfig {
            binds: if docker.volumes.is_empty() {
                None
            } else {
                Some(docker.volumes.clone())
            },
            privileged: Some(docker.privileged),
            ..Default::default()
        };

        let config = Config {
            image: Some(docker.image.clone()),
            cmd,
            working_dir: Some(self.base.builds_dir().display().to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        info!(container = %name, "Creating container");
        self.client()?
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create container: {}", e)))?;
        self.container = Some(name.clone());

        info!(container = %name, "Starting container");
        self.client()?
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to start container: {}", e)))?;

        Ok(name)
    }

    /// Force-remove the build container, if one was created.
    pub(crate) async fn remove_container(&mut self) {
        let (Some(name), Some(client)) = (self.container.take(), self.client.as_ref()) else {
            return;
        };
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match client.remove_container(&name, Some(options)).await {
            Ok(()) => debug!(container = %name, "Removed container"),
            Err(e) => warn!(container = %name, error = %e, "Failed to remove container"),
        }
    }

    pub async fn cleanup(&mut self) {
        self.remove_container().await;
        self.base.cleanup();
    }
}

fn log_output_bytes(output: LogOutput) -> Bytes {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => message,
    }
}

/// Copy the container's output into the build log until the container stops.
async fn pump_logs(client: Docker, name: String, mut writer: tokio::fs::File) {
    let options = LogsOptions::<String> {
        follow: true,
        stdout: true,
        stderr: true,
        ..Default::default()
    };

    let mut stream = client.logs(&name, Some(options));
    while let Some(result) = stream.next().await {
        match result {
            Ok(output) => {
                if let Err(e) = writer.write_all(&log_output_bytes(output)).await {
                    warn!(error = %e, "Failed to write build log");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Log stream error");
                break;
            }
        }
    }
    let _ = writer.flush().await;
}

/// Wait for the container to exit, mapping its status code.
async fn wait_exit(client: &Docker, name: &str) -> Result<()> {
    let options = WaitContainerOptions {
        condition: "not-running",
    };
    let mut stream = client.wait_container(name, Some(options));

    let code = match stream.next().await {
        Some(Ok(response)) => response.status_code,
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
        Some(Err(e)) => return Err(Error::ExecutionFailed(format!("Wait error: {}", e))),
        None => {
            return Err(Error::ExecutionFailed(
                "container wait stream ended".to_string(),
            ));
        }
    };

    debug!(container = %name, exit_code = code, "Container exited");
    if code == 0 {
        Ok(())
    } else {
        Err(Error::ExecutionFailed(format!("exit code {}", code)))
    }
}

/// Runs the build script as the command of a fresh container.
pub struct DockerCommandExecutor {
    docker: DockerExecutor,
}

impl DockerCommandExecutor {
    pub fn new() -> Self {
        Self {
            docker: DockerExecutor::new(DEFAULT_BUILDS_DIR),
        }
    }

    pub fn controller(&self) -> &LifecycleController {
        self.docker.controller()
    }
}

impl Default for DockerCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for DockerCommandExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn prepare(&mut self, config: Arc<RunnerConfig>, build: Arc<dyn Build>) -> Result<()> {
        self.docker.prepare(config, build).await
    }

    async fn start(&mut self) -> Result<()> {
        let finish = self.docker.base.finish_sender()?;
        let writer = self
            .docker
            .base
            .build_log()
            .ok_or(Error::NotPrepared)?
            .writer()?;
        let script = String::from_utf8_lossy(self.docker.base.script()).into_owned();

        let name = self
            .docker
            .start_container(Some(vec!["sh".to_string(), "-c".to_string(), script]))
            .await?;

        let client = self.docker.client()?.clone();
        let span = self.docker.base.span().clone();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        tokio::spawn(
            async move {
                let pump = tokio::spawn(
                    pump_logs(client.clone(), name.clone(), tokio::fs::File::from_std(writer))
                        .in_current_span(),
                );

                let result = tokio::select! {
                    result = wait_exit(&client, &name) => {
                        // Trailing output must land before completion is reported.
                        let _ = pump.await;
                        result
                    }
                    Ok(()) = &mut kill_rx => {
                        info!(container = %name, "Stopping container");
                        let options = StopContainerOptions { t: 0 };
                        if let Err(e) = client.stop_container(&name, Some(options)).await {
                            warn!(container = %name, error = %e, "Failed to stop container");
                        }
                        pump.abort();
                        Err(Error::ExecutionFailed("container stopped".to_string()))
                    }
                };
                finish.finish(result);
            }
            .instrument(span),
        );

        self.docker.base.set_abort_callback(move |_| {
            let _ = kill_tx.send(());
        });
        Ok(())
    }

    async fn wait(&mut self) -> Result<BuildOutcome> {
        self.docker.base.wait().await
    }

    async fn cleanup(&mut self) {
        self.docker.cleanup().await;
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        self.docker.base.abort_handle()
    }
}

//! Docker executor reaching the container over SSH.
//!
//! The container runs its image's own entrypoint (an SSH daemon); the build
//! script is piped into an `ssh` session to it.

use async_trait::async_trait;
use cirun_core::{
    AbortHandle, Build, BuildOutcome, Error, Executor, Result, RunnerConfig, SshConfig,
};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

use crate::docker::DockerExecutor;
use crate::lifecycle::LifecycleController;
use crate::shell::spawn_supervised;

pub const DEFAULT_BUILDS_DIR: &str = "builds";

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_SSH_USER: &str = "root";

pub struct DockerSshExecutor {
    docker: DockerExecutor,
}

impl DockerSshExecutor {
    pub fn new() -> Self {
        Self {
            docker: DockerExecutor::new(DEFAULT_BUILDS_DIR),
        }
    }

    pub fn controller(&self) -> &LifecycleController {
        self.docker.controller()
    }

    async fn container_address(&self, name: &str) -> Result<String> {
        let inspect = self
            .docker
            .client()?
            .inspect_container(name, None)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to inspect container: {}", e)))?;

        inspect
            .network_settings
            .and_then(|settings| settings.ip_address)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| Error::ExecutionFailed(format!("container {} has no address", name)))
    }
}

impl Default for DockerSshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments for `ssh` running a shell that reads the script from stdin.
pub(crate) fn ssh_args(ssh: &SshConfig, host: &str) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ConnectionAttempts=10".to_string(),
        "-p".to_string(),
        ssh.port.unwrap_or(DEFAULT_SSH_PORT).to_string(),
    ];
    if let Some(identity) = &ssh.identity_file {
        args.push("-i".to_string());
        args.push(identity.clone());
    }
    let user = ssh.user.as_deref().unwrap_or(DEFAULT_SSH_USER);
    args.push(format!("{}@{}", user, host));
    args.push("sh".to_string());
    args.push("-s".to_string());
    args
}

#[async_trait]
impl Executor for DockerSshExecutor {
    fn name(&self) -> &'static str {
        "docker-ssh"
    }

    async fn prepare(&mut self, config: Arc<RunnerConfig>, build: Arc<dyn Build>) -> Result<()> {
        self.docker.prepare(config, build).await
    }

    async fn start(&mut self) -> Result<()> {
        let config = self.docker.base.config().ok_or(Error::NotPrepared)?.clone();
        let finish = self.docker.base.finish_sender()?;
        let ssh = config.ssh.clone().unwrap_or_default();
        if ssh.password.is_some() {
            warn!("SSH password authentication is not supported, use identity-file");
        }

        let name = self.docker.start_container(None).await?;
        let host = match &ssh.host {
            Some(host) => host.clone(),
            None => self.container_address(&name).await?,
        };

        info!(container = %name, host = %host, "Starting build over SSH");
        let mut cmd = Command::new("ssh");
        cmd.args(ssh_args(&ssh, &host));
        let kill = spawn_supervised(&self.docker.base, cmd, finish)?;
        self.docker.base.set_abort_callback(move |_| {
            let _ = kill.send(());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builds_dir() {
        let executor = DockerSshExecutor::new();
        assert_eq!(executor.name(), "docker-ssh");
        assert_eq!(executor.controller().default_builds_dir(), "builds");
    }

    #[test]
    fn test_ssh_args_defaults() {
        let args = ssh_args(&SshConfig::default(), "172.17.0.2");

        let port = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[port + 1], "22");
        assert!(args.contains(&"root@172.17.0.2".to_string()));
        assert!(!args.contains(&"-i".to_string()));
        assert_eq!(&args[args.len() - 2..], ["sh", "-s"]);
    }

    #[test]
    fn test_ssh_args_with_identity() {
        let ssh = SshConfig {
            user: Some("ci".to_string()),
            port: Some(2222),
            identity_file: Some("/keys/id_ed25519".to_string()),
            ..Default::default()
        };
        let args = ssh_args(&ssh, "build-host");

        assert!(args.contains(&"2222".to_string()));
        let identity = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[identity + 1], "/keys/id_ed25519");
        assert!(args.contains(&"ci@build-host".to_string()));
    }
}

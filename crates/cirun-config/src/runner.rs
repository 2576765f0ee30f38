//! Runner configuration parsing.

use crate::{ConfigError, ConfigResult};
use cirun_core::{DockerConfig, RunnerConfig, SshConfig};
use cirun_executor::ExecutorKind;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Parsed contents of a runner configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerFile {
    /// Number of builds processed in parallel.
    pub concurrent: usize,
    pub runners: Vec<RunnerConfig>,
}

impl RunnerFile {
    pub fn find(&self, name: &str) -> Option<&RunnerConfig> {
        self.runners.iter().find(|r| r.name == name)
    }
}

/// Read and parse a runner configuration file.
pub fn load_runner_config(path: impl AsRef<Path>) -> ConfigResult<RunnerFile> {
    let content = std::fs::read_to_string(path)?;
    parse_runner_config(&content)
}

/// Parse a runner configuration from KDL text.
pub fn parse_runner_config(kdl: &str) -> ConfigResult<RunnerFile> {
    let doc: KdlDocument = kdl.parse()?;

    let mut concurrent = 1;
    let mut runners = Vec::new();
    let mut names = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "concurrent" => {
                let value = get_first_integer_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("concurrent value".to_string()))?;
                concurrent = usize::try_from(value)
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "concurrent".to_string(),
                        message: format!("must be a positive integer, got {}", value),
                    })?;
            }
            "runner" => {
                let runner = parse_runner(node)?;
                if !names.insert(runner.name.clone()) {
                    return Err(ConfigError::Duplicate(format!("runner '{}'", runner.name)));
                }
                runners.push(runner);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(RunnerFile {
        concurrent,
        runners,
    })
}

fn parse_runner(node: &KdlNode) -> ConfigResult<RunnerConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("runner name".to_string()))?;

    let mut runner = RunnerConfig {
        name,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "url" => runner.url = get_first_string_arg(child).unwrap_or_default(),
                "token" => runner.token = get_first_string_arg(child).unwrap_or_default(),
                "executor" => runner.executor = get_first_string_arg(child).unwrap_or_default(),
                "builds-dir" => runner.builds_dir = get_first_string_arg(child),
                "shell" => runner.shell = get_first_string_arg(child),
                "docker" => runner.docker = Some(parse_docker(child)),
                "ssh" => runner.ssh = Some(parse_ssh(child)?),
                _ => {}
            }
        }
    }

    if runner.url.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "url for runner '{}'",
            runner.name
        )));
    }
    if runner.token.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "token for runner '{}'",
            runner.name
        )));
    }

    let kind = ExecutorKind::parse(&runner.executor).ok_or_else(|| {
        ConfigError::UnsupportedExecutor {
            runner: runner.name.clone(),
            executor: runner.executor.clone(),
        }
    })?;
    if kind != ExecutorKind::Shell {
        let has_image = runner
            .docker
            .as_ref()
            .map(|d| !d.image.is_empty())
            .unwrap_or(false);
        if !has_image {
            return Err(ConfigError::MissingField(format!(
                "docker image for runner '{}'",
                runner.name
            )));
        }
    }

    Ok(runner)
}

fn parse_docker(node: &KdlNode) -> DockerConfig {
    let mut volumes = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "volume" {
                volumes.extend(get_all_string_args(child));
            }
        }
    }

    DockerConfig {
        host: get_string_prop(node, "host"),
        image: get_string_prop(node, "image").unwrap_or_default(),
        privileged: get_bool_prop(node, "privileged").unwrap_or(false),
        volumes,
    }
}

fn parse_ssh(node: &KdlNode) -> ConfigResult<SshConfig> {
    let port = match node.get("port") {
        None => None,
        Some(value) => {
            let port = value
                .as_integer()
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "ssh port".to_string(),
                    message: format!("expected 1-65535, got {}", value),
                })?;
            Some(port)
        }
    };

    Ok(SshConfig {
        user: get_string_prop(node, "user"),
        password: get_string_prop(node, "password"),
        host: get_string_prop(node, "host"),
        port,
        identity_file: get_string_prop(node, "identity-file"),
    })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        concurrent 2

        runner "local" {
            url "https://ci.example.com"
            token "abcdef0123456789"
            executor "shell"
            builds-dir "/var/builds"
            shell "sh"
        }

        runner "containers" {
            url "https://ci.example.com"
            token "0123456789abcdef"
            executor "docker"
            docker image="alpine:3" privileged=#true host="unix:///var/run/docker.sock" {
                volume "/cache:/cache:rw"
            }
            ssh user="ci" port=2222 identity-file="/root/.ssh/id_rsa"
        }
    "#;

    #[test]
    fn test_parse_example() {
        let file = parse_runner_config(EXAMPLE).unwrap();
        assert_eq!(file.concurrent, 2);
        assert_eq!(file.runners.len(), 2);

        let local = file.find("local").unwrap();
        assert_eq!(local.executor, "shell");
        assert_eq!(local.builds_dir.as_deref(), Some("/var/builds"));
        assert_eq!(local.shell(), "sh");
        assert_eq!(local.short_description(), "abcdef01");

        let containers = file.find("containers").unwrap();
        let docker = containers.docker.as_ref().unwrap();
        assert_eq!(docker.image, "alpine:3");
        assert!(docker.privileged);
        assert_eq!(docker.host.as_deref(), Some("unix:///var/run/docker.sock"));
        assert_eq!(docker.volumes, vec!["/cache:/cache:rw"]);

        let ssh = containers.ssh.as_ref().unwrap();
        assert_eq!(ssh.user.as_deref(), Some("ci"));
        assert_eq!(ssh.port, Some(2222));
        assert_eq!(ssh.identity_file.as_deref(), Some("/root/.ssh/id_rsa"));
    }

    #[test]
    fn test_defaults() {
        let kdl = r#"
            runner "minimal" {
                url "https://ci.example.com"
                token "tok"
            }
        "#;

        let file = parse_runner_config(kdl).unwrap();
        assert_eq!(file.concurrent, 1);
        let runner = file.find("minimal").unwrap();
        assert_eq!(runner.executor, "");
        assert!(runner.builds_dir.is_none());
        assert!(runner.docker.is_none());
        assert!(file.find("missing").is_none());
    }

    #[test]
    fn test_missing_token() {
        let kdl = r#"
            runner "no-token" {
                url "https://ci.example.com"
            }
        "#;

        let result = parse_runner_config(kdl);
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_missing_url() {
        let kdl = r#"
            runner "no-url" {
                token "tok"
            }
        "#;

        assert!(matches!(
            parse_runner_config(kdl),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_duplicate_runner() {
        let kdl = r#"
            runner "twice" {
                url "https://ci.example.com"
                token "a"
            }
            runner "twice" {
                url "https://ci.example.com"
                token "b"
            }
        "#;

        assert!(matches!(
            parse_runner_config(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_unsupported_executor() {
        let kdl = r#"
            runner "k8s" {
                url "https://ci.example.com"
                token "tok"
                executor "kubernetes"
            }
        "#;

        let err = parse_runner_config(kdl).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedExecutor { .. }));
        assert!(err.to_string().contains("kubernetes"));
    }

    #[test]
    fn test_docker_requires_image() {
        let kdl = r#"
            runner "bare-docker" {
                url "https://ci.example.com"
                token "tok"
                executor "docker-ssh"
            }
        "#;

        assert!(matches!(
            parse_runner_config(kdl),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_ssh_port() {
        let kdl = r#"
            runner "bad-port" {
                url "https://ci.example.com"
                token "tok"
                executor "docker-ssh"
                docker image="sshd:latest"
                ssh port=70000
            }
        "#;

        assert!(matches!(
            parse_runner_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_concurrent() {
        assert!(matches!(
            parse_runner_config("concurrent 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_runner_config("runner \"unterminated {"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.kdl");
        std::fs::write(&path, EXAMPLE).unwrap();

        let file = load_runner_config(&path).unwrap();
        assert_eq!(file.runners.len(), 2);
        assert!(matches!(
            load_runner_config(dir.path().join("absent.kdl")),
            Err(ConfigError::Io(_))
        ));
    }
}

//! Runner configuration model.
//!
//! Parsing lives in `cirun-config`; executors only read these values.

use serde::{Deserialize, Serialize};

/// Shell used by the shell backend when none is configured.
pub const DEFAULT_SHELL: &str = "bash";

/// Configuration of a single runner registered with the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Human readable runner name.
    pub name: String,
    /// Coordinator URL.
    pub url: String,
    /// Runner token.
    pub token: String,
    /// Backend identifier ("", "shell", "docker", "docker-ssh").
    pub executor: String,
    /// Overrides the backend's default builds directory.
    pub builds_dir: Option<String>,
    /// Shell program for the shell backend.
    pub shell: Option<String>,
    pub docker: Option<DockerConfig>,
    pub ssh: Option<SshConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Daemon address; local defaults when unset.
    pub host: Option<String>,
    /// Image builds run in.
    pub image: String,
    pub privileged: bool,
    /// Bind specs in `src:dst[:mode]` form.
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    /// Target host; the container address is used when unset.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
}

impl RunnerConfig {
    /// Short tag identifying this runner in diagnostics.
    pub fn short_description(&self) -> &str {
        match self.token.char_indices().nth(8) {
            Some((idx, _)) => &self.token[..idx],
            None => &self.token,
        }
    }

    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(DEFAULT_SHELL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_description_truncates_token() {
        let config = RunnerConfig {
            token: "0123456789abcdef".to_string(),
            ..Default::default()
        };
        assert_eq!(config.short_description(), "01234567");
    }

    #[test]
    fn test_short_description_keeps_short_token() {
        let config = RunnerConfig {
            token: "abc".to_string(),
            ..Default::default()
        };
        assert_eq!(config.short_description(), "abc");
    }

    #[test]
    fn test_shell_defaults_to_bash() {
        let mut config = RunnerConfig::default();
        assert_eq!(config.shell(), "bash");
        config.shell = Some("sh".to_string());
        assert_eq!(config.shell(), "sh");
    }
}

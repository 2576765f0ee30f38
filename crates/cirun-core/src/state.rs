//! Terminal build states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one execution attempt, as reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Success,
    Failed,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Success => "success",
            BuildState::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildState::Success)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

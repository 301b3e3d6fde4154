//! Compiler options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CompilerError, ErrorKind, Phase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerOptions {
    /// Upper bound for a single service dial during construction.
    pub dial_timeout_ms: u64,
    /// Status codes accepted from a call when the node declares none.
    pub default_expected_status: Vec<i64>,
    /// Discovery resolver used for services that do not declare one.
    /// `None` dials the service host as-is.
    pub default_resolver: Option<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            dial_timeout_ms: 5_000,
            default_expected_status: vec![200],
            default_resolver: None,
        }
    }
}

impl CompilerOptions {
    pub fn from_json(json: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(json).map_err(|e| {
            CompilerError::new(
                Phase::Parse,
                ErrorKind::Manifest {
                    reason: format!("invalid compiler options: {}", e),
                },
            )
        })
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{error::Error, types::ResourceLimits, Result};

/// Engine configuration. Every field has a default so a partial TOML file is
/// enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// `dotnet` executable name or path
    pub dotnet_path: PathBuf,
    /// Directory under which workspaces are created
    pub workspaces_root: PathBuf,
    /// Target framework moniker written into generated projects
    pub target_framework: String,
    pub default_timeout_secs: u64,
    /// Budget for the compile step, separate from the run timeout
    pub compile_timeout_secs: u64,
    /// Per-stream capture cap (bytes)
    pub max_output_bytes: usize,
    pub max_snippet_bytes: usize,
    pub max_concurrent_runs: usize,
    /// How long to wait for pipes to drain after a kill
    pub drain_timeout_ms: u64,
    pub limits: ResourceLimits,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            dotnet_path: PathBuf::from("dotnet"),
            workspaces_root: std::env::temp_dir().join("workspace-exec"),
            target_framework: "net8.0".to_string(),
            default_timeout_secs: 10,
            compile_timeout_secs: 120,
            max_output_bytes: 1024 * 1024,
            max_snippet_bytes: 64 * 1024,
            max_concurrent_runs: 4,
            drain_timeout_ms: 500,
            limits: ResourceLimits::default(),
        }
    }
}

impl ExecConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ExecConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("default_timeout_secs", self.default_timeout_secs as usize),
            ("compile_timeout_secs", self.compile_timeout_secs as usize),
            ("max_output_bytes", self.max_output_bytes),
            ("max_snippet_bytes", self.max_snippet_bytes),
            ("max_concurrent_runs", self.max_concurrent_runs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        if self.target_framework.trim().is_empty() {
            return Err(Error::Config("target_framework must not be empty".to_string()));
        }
        if self.limits.cpu_time_secs == Some(0) {
            return Err(Error::Config("limits.cpu_time_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

pub mod defaults {
    use crate::{ExecConfig, ResourceLimits};
    use std::path::Path;
    use tokio::time::Duration;

    pub fn test_config(root: &Path) -> ExecConfig {
        ExecConfig {
            workspaces_root: root.to_path_buf(),
            compile_timeout_secs: 300,
            limits: ResourceLimits {
                cpu_time_secs: Some(30),
                ..ResourceLimits::default()
            },
            ..ExecConfig::default()
        }
    }

    pub fn default_timeout() -> u64 {
        10
    }

    pub fn short_timeout() -> Duration {
        Duration::from_secs(1)
    }
}

pub mod toolchain {
    use super::defaults::test_config;
    use crate::{backends::skip_if_not_available, Error, ProjectKind, Workspace, WorkspaceServer};
    use tempfile::TempDir;

    /// A server and workspace rooted in a temp dir, or `None` when the
    /// toolchain for `kind` is not installed.
    pub async fn workspace(kind: ProjectKind, name: &str) -> Option<(TempDir, WorkspaceServer, Workspace)> {
        if skip_if_not_available(&["dotnet"]) {
            return None;
        }
        let dir = tempfile::tempdir().ok()?;
        let server = WorkspaceServer::new(test_config(dir.path())).ok()?;
        match server.create_workspace(kind, name).await {
            Ok(workspace) => Some((dir, server, workspace)),
            Err(Error::BackendUnavailable(reason)) => {
                eprintln!("Skipping test: {} backend unavailable: {}", kind, reason);
                None
            }
            Err(e) => panic!("failed to create workspace: {}", e),
        }
    }

    /// Processes whose command line mentions `needle`.
    #[cfg(target_os = "linux")]
    pub fn processes_mentioning(needle: &str) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| *pid != std::process::id())
            .filter(|pid| {
                std::fs::read(format!("/proc/{}/cmdline", pid))
                    .map(|cmdline| String::from_utf8_lossy(&cmdline).contains(needle))
                    .unwrap_or(false)
            })
            .collect()
    }
}

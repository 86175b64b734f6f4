use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    backend::{backend_for, ExecutionBackend},
    config::ExecConfig,
    error::Error,
    types::{ProjectKind, RunRequest, RunResult},
    workspace::Workspace,
    Result,
};

/// Entry point for hosts: creates workspaces and runs snippets in them.
///
/// Holds one backend per project kind for its whole life, so toolchain
/// discovery happens once per server rather than once per run.
#[derive(Clone)]
pub struct WorkspaceServer {
    config: Arc<ExecConfig>,
    semaphore: Arc<Semaphore>,
    console: Arc<dyn ExecutionBackend>,
    script: Arc<dyn ExecutionBackend>,
}

impl WorkspaceServer {
    pub fn new(config: ExecConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_runs)),
            console: Arc::from(backend_for(ProjectKind::Console, &config)),
            script: Arc::from(backend_for(ProjectKind::Script, &config)),
            config: Arc::new(config),
        })
    }

    /// The backend serving workspaces of `kind`.
    pub fn backend(&self, kind: ProjectKind) -> &Arc<dyn ExecutionBackend> {
        match kind {
            ProjectKind::Console => &self.console,
            ProjectKind::Script => &self.script,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Create a ready-to-use workspace. Fails with
    /// [`Error::BackendUnavailable`] when the kind's toolchain is missing.
    pub async fn create_workspace(&self, kind: ProjectKind, name: &str) -> Result<Workspace> {
        self.backend(kind).check_available().await?;
        Workspace::create(kind, name, &self.config).await
    }

    /// Run `snippet` in `workspace` with a timeout in whole seconds.
    pub async fn run(
        &self,
        workspace: &Workspace,
        snippet: &str,
        timeout_seconds: u64,
    ) -> Result<RunResult> {
        let request =
            RunRequest::new(snippet).with_timeout(Duration::from_secs(timeout_seconds));
        self.run_request(workspace, &request, &CancellationToken::new())
            .await
    }

    /// Run a full request. Cancelling `cancel` ends the run like a timeout.
    pub async fn run_request(
        &self,
        workspace: &Workspace,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        if request.timeout.is_zero() {
            return Err(Error::InvalidRequest("timeout must be positive".to_string()));
        }

        let unit = workspace.prepare(&request.snippet).await?;

        // Acquire execution permit
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::Workspace(format!("Failed to acquire execution permit: {}", e)))?;

        let backend = self.backend(workspace.kind());
        debug!(
            "Running snippet in {} with {} backend",
            workspace.name(),
            backend.name()
        );

        let result = backend
            .compile_and_run(&unit, workspace, request, cancel)
            .await;

        match &result {
            Ok(result) => info!(
                "Run in {} completed: {} in {} ms",
                workspace.name(),
                result.outcome,
                result.duration_ms
            ),
            Err(e) => error!("Run in {} failed: {}", workspace.name(), e),
        }

        result
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

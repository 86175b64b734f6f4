use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    backends::{CscBackend, DotnetCliBackend},
    config::ExecConfig,
    snippet::CompilationUnit,
    types::{ProjectKind, RunRequest, RunResult},
    workspace::Workspace,
    Result,
};

/// A toolchain integration able to compile a unit and run it.
///
/// Implementations report compile failures, runtime faults and timeouts as
/// data in the returned [`RunResult`]. `Err` is reserved for requests that
/// cannot be attempted at all, chiefly [`crate::Error::BackendUnavailable`].
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Check that the toolchain can be located
    async fn check_available(&self) -> Result<()>;

    /// Compile `unit` inside `workspace` and run it under `request.timeout`
    async fn compile_and_run(
        &self,
        unit: &CompilationUnit,
        workspace: &Workspace,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunResult>;
}

/// The backend serving workspaces of `kind`.
pub fn backend_for(kind: ProjectKind, config: &ExecConfig) -> Box<dyn ExecutionBackend> {
    match kind {
        ProjectKind::Console => Box::new(DotnetCliBackend::new(config)),
        ProjectKind::Script => Box::new(CscBackend::new(config)),
    }
}

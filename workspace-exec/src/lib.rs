//! # Workspace Execution Engine
//!
//! Compiles and runs C# snippets inside disposable project workspaces and
//! reports console output, compiler diagnostics, runtime exceptions and
//! timing as one [`RunResult`]. Every run is bounded by a wall-clock timeout
//! and its process tree is reclaimed before the call returns.

mod backend;
mod backends;
mod config;
mod driver;
mod error;
mod service;
mod snippet;
mod translate;
mod types;
mod workspace;

#[cfg(test)]
mod tests;

pub use backend::{backend_for, ExecutionBackend};
pub use backends::{CscBackend, DotnetCliBackend};
pub use config::ExecConfig;
pub use driver::{ExecutionDriver, ProcessOutput, Termination};
pub use error::Error;
pub use service::WorkspaceServer;
pub use snippet::{CompilationUnit, SOURCE_FILE};
pub use tokio_util::sync::CancellationToken;
pub use translate::{
    output_lines, parse_diagnostics, parse_unhandled_exception, translate_build, translate_run,
    BuildVerdict,
};
pub use types::{
    Diagnostic, ExceptionInfo, FaultKind, Location, Outcome, ProjectKind, ResourceLimits,
    RunRequest, RunResult, Severity, DEFAULT_TIMEOUT,
};
pub use workspace::{ProjectFile, Workspace, ASSEMBLY_NAME};

/// Result type for workspace execution operations
pub type Result<T> = std::result::Result<T, Error>;

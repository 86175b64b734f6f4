use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    backend::ExecutionBackend,
    backends::{dotnet_command, locate_dotnet},
    config::ExecConfig,
    driver::ExecutionDriver,
    snippet::CompilationUnit,
    translate::{translate_build, translate_run, BuildVerdict},
    types::{RunRequest, RunResult},
    workspace::{Workspace, ASSEMBLY_NAME},
    Result,
};

/// Builds the workspace's MSBuild project with `dotnet build` and runs the
/// resulting assembly with the `dotnet` host. Exit codes and console text are
/// the only signals.
pub struct DotnetCliBackend {
    dotnet: PathBuf,
    compile_timeout: Duration,
    build_driver: ExecutionDriver,
    run_driver: ExecutionDriver,
}

impl DotnetCliBackend {
    pub fn new(config: &ExecConfig) -> Self {
        let build_driver = ExecutionDriver::new(config.max_output_bytes, config.drain_timeout());
        Self {
            dotnet: config.dotnet_path.clone(),
            compile_timeout: config.compile_timeout(),
            run_driver: build_driver.clone().with_limits(config.limits.clone()),
            build_driver,
        }
    }
}

#[async_trait]
impl ExecutionBackend for DotnetCliBackend {
    fn name(&self) -> &'static str {
        "dotnet-cli"
    }

    async fn check_available(&self) -> Result<()> {
        locate_dotnet(&self.dotnet).map(|_| ())
    }

    async fn compile_and_run(
        &self,
        unit: &CompilationUnit,
        workspace: &Workspace,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let started = Instant::now();
        let dotnet = locate_dotnet(&self.dotnet)?;
        let scratch = workspace.scratch_dir().await?;
        let out_dir = scratch.path().join("bin");
        let build = build_command(&dotnet, workspace.path(), scratch.path());

        let build_output = self
            .build_driver
            .run(build, self.compile_timeout, cancel)
            .await?;
        debug!("dotnet build finished in {:?}", build_output.elapsed);

        let warnings = match translate_build(&build_output, unit) {
            BuildVerdict::Finished(result) => return Ok(result.with_duration(started.elapsed())),
            BuildVerdict::Proceed { warnings } => warnings,
        };

        let mut run = dotnet_command(&dotnet, workspace.path());
        run.arg(out_dir.join(format!("{}.dll", ASSEMBLY_NAME)));

        let run_output = self.run_driver.run(run, request.timeout, cancel).await?;
        let result = translate_run(&run_output, warnings, request.raw_output)
            .with_duration(started.elapsed());

        info!(
            "{} run in {} finished: {}",
            self.name(),
            workspace.name(),
            result.outcome
        );
        Ok(result)
    }
}

/// `dotnet build` with every output, intermediates included, under `scratch`.
fn build_command(dotnet: &Path, workspace: &Path, scratch: &Path) -> Command {
    let mut obj = scratch.join("obj").into_os_string();
    obj.push("/");

    let mut build = dotnet_command(dotnet, workspace);
    build
        .arg("build")
        .arg(format!("{}.csproj", ASSEMBLY_NAME))
        .args([
            "--nologo",
            "-v:q",
            "-clp:NoSummary",
            "-nodeReuse:false",
            "-p:UseSharedCompilation=false",
        ])
        .arg(property("BaseIntermediateOutputPath", &obj))
        .arg(property("MSBuildProjectExtensionsPath", &obj))
        .arg("-o")
        .arg(scratch.join("bin"));
    build
}

fn property(name: &str, value: &OsStr) -> OsString {
    let mut arg = OsString::from(format!("-p:{}=", name));
    arg.push(value);
    arg
}

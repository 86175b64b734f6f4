use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::{fs, sync::OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    backend::ExecutionBackend,
    backends::{dotnet_command, locate_dotnet},
    config::ExecConfig,
    driver::ExecutionDriver,
    error::Error,
    snippet::CompilationUnit,
    translate::{translate_build, translate_run, BuildVerdict},
    types::{RunRequest, RunResult},
    workspace::{Workspace, ASSEMBLY_NAME},
    Result,
};

const RUNTIME: &str = "Microsoft.NETCore.App";

/// Compiles with the Roslyn compiler assembly that ships inside the .NET SDK,
/// skipping MSBuild entirely, then runs the assembly in a separate `dotnet`
/// host process.
pub struct CscBackend {
    dotnet: PathBuf,
    target_framework: String,
    compile_timeout: Duration,
    build_driver: ExecutionDriver,
    run_driver: ExecutionDriver,
    install: OnceCell<DotnetInstall>,
}

/// The pieces of a .NET installation the compiler backend needs.
#[derive(Debug, Clone)]
struct DotnetInstall {
    host: PathBuf,
    csc: PathBuf,
    references: Vec<PathBuf>,
    runtime_version: String,
}

impl CscBackend {
    pub fn new(config: &ExecConfig) -> Self {
        let build_driver = ExecutionDriver::new(config.max_output_bytes, config.drain_timeout());
        Self {
            dotnet: config.dotnet_path.clone(),
            target_framework: config.target_framework.clone(),
            compile_timeout: config.compile_timeout(),
            run_driver: build_driver.clone().with_limits(config.limits.clone()),
            build_driver,
            install: OnceCell::new(),
        }
    }

    async fn install(&self) -> Result<&DotnetInstall> {
        self.install
            .get_or_try_init(|| async {
                let host = locate_dotnet(&self.dotnet)?;
                let install = locate_install(&host, &self.target_framework)?;
                debug!(
                    "Using csc at {} with runtime {}",
                    install.csc.display(),
                    install.runtime_version
                );
                Ok::<_, Error>(install)
            })
            .await
    }
}

#[async_trait]
impl ExecutionBackend for CscBackend {
    fn name(&self) -> &'static str {
        "csc"
    }

    async fn check_available(&self) -> Result<()> {
        self.install().await.map(|_| ())
    }

    async fn compile_and_run(
        &self,
        unit: &CompilationUnit,
        workspace: &Workspace,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let started = Instant::now();
        let install = self.install().await?;
        let scratch = workspace.scratch_dir().await?;
        let assembly = scratch.path().join(format!("{}.dll", ASSEMBLY_NAME));

        let references: String = install
            .references
            .iter()
            .map(|path| format!("-r:\"{}\"\n", path.display()))
            .collect();
        let references_rsp = scratch.path().join("references.rsp");
        fs::write(&references_rsp, references).await?;

        let runtime_config = scratch
            .path()
            .join(format!("{}.runtimeconfig.json", ASSEMBLY_NAME));
        let config = json!({
            "runtimeOptions": {
                "tfm": self.target_framework,
                "framework": { "name": RUNTIME, "version": install.runtime_version },
            }
        });
        fs::write(&runtime_config, config.to_string()).await?;

        let mut compile = dotnet_command(&install.host, workspace.path());
        compile
            .arg("exec")
            .arg(&install.csc)
            .arg(format!("@{}.rsp", ASSEMBLY_NAME))
            .arg(format!("@{}", references_rsp.display()))
            .arg(format!("-out:{}", assembly.display()))
            .arg(&unit.file_name);

        let build_output = self
            .build_driver
            .run(compile, self.compile_timeout, cancel)
            .await?;

        let warnings = match translate_build(&build_output, unit) {
            BuildVerdict::Finished(result) => return Ok(result.with_duration(started.elapsed())),
            BuildVerdict::Proceed { warnings } => warnings,
        };

        let mut run = dotnet_command(&install.host, workspace.path());
        run.arg("exec")
            .arg("--runtimeconfig")
            .arg(&runtime_config)
            .arg(&assembly);

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

fn locate_install(host: &Path, target_framework: &str) -> Result<DotnetInstall> {
    let host = host.canonicalize()?;
    let root = host
        .parent()
        .ok_or_else(|| Error::BackendUnavailable(format!("{} has no parent", host.display())))?;
    let major = framework_major(target_framework);

    let csc = newest_version(&root.join("sdk"), None)
        .map(|(_, sdk)| sdk.join("Roslyn").join("bincore").join("csc.dll"))
        .filter(|csc| csc.is_file())
        .ok_or_else(|| unavailable(root, "no SDK with a Roslyn compiler"))?;

    let (runtime_version, _) = newest_version(&root.join("shared").join(RUNTIME), major)
        .ok_or_else(|| unavailable(root, "no matching shared runtime"))?;

    let (_, ref_pack) = newest_version(&root.join("packs").join(format!("{}.Ref", RUNTIME)), major)
        .ok_or_else(|| unavailable(root, "no reference pack"))?;
    let ref_dir = ref_pack.join("ref").join(target_framework);
    let mut references: Vec<PathBuf> = std::fs::read_dir(&ref_dir)
        .map_err(|e| unavailable(root, &format!("cannot read {}: {}", ref_dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "dll"))
        .collect();
    references.sort();

    if references.is_empty() {
        return Err(unavailable(root, "reference pack holds no assemblies"));
    }

    Ok(DotnetInstall {
        host,
        csc,
        references,
        runtime_version,
    })
}

fn unavailable(root: &Path, reason: &str) -> Error {
    Error::BackendUnavailable(format!("{}: {}", root.display(), reason))
}

/// `net8.0` -> 8
fn framework_major(target_framework: &str) -> Option<u64> {
    target_framework
        .strip_prefix("net")?
        .split('.')
        .next()?
        .parse()
        .ok()
}

/// Numeric key for directory names such as `8.0.403` or `9.0.100-rc.1`.
fn version_key(name: &str) -> Option<Vec<u64>> {
    let release = name.split('-').next()?;
    release.split('.').map(|part| part.parse().ok()).collect()
}

/// Highest versioned subdirectory of `dir`, optionally restricted to one
/// major version.
fn newest_version(dir: &Path, major: Option<u64>) -> Option<(String, PathBuf)> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = version_key(&name)?;
            if major.is_some_and(|major| key.first() != Some(&major)) {
                return None;
            }
            Some((key, name, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, name, path)| (name, path))
}

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    config::ExecConfig,
    error::Error,
    snippet::{CompilationUnit, SOURCE_FILE},
    types::ProjectKind,
    Result,
};

/// Assembly name of every program built in a workspace.
pub const ASSEMBLY_NAME: &str = "Snippet";

const RUNS_DIR: &str = ".runs";

/// A static file of the project skeleton, relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub path: PathBuf,
    pub contents: String,
}

/// A directory holding a buildable project that snippets are compiled into.
///
/// Owned by one caller at a time. Sequential runs see files written by
/// earlier runs; concurrent runs against the same workspace must be
/// serialized by the caller.
#[derive(Debug)]
pub struct Workspace {
    name: String,
    kind: ProjectKind,
    root: PathBuf,
    project_files: Vec<ProjectFile>,
    max_snippet_bytes: usize,
    created_at: SystemTime,
    torn_down: AtomicBool,
}

impl Workspace {
    /// Create a workspace directory under `config.workspaces_root` and write
    /// its project skeleton.
    pub async fn create(kind: ProjectKind, name: &str, config: &ExecConfig) -> Result<Self> {
        validate_name(name)?;

        let root = config
            .workspaces_root
            .join(format!("{}-{}", name, Uuid::new_v4().simple()));

        fs::create_dir_all(&root).await.map_err(|e| {
            Error::Workspace(format!("Failed to create workspace directory: {}", e))
        })?;

        let workspace = Self {
            name: name.to_string(),
            kind,
            root,
            project_files: project_files(kind, &config.target_framework),
            max_snippet_bytes: config.max_snippet_bytes,
            created_at: SystemTime::now(),
            torn_down: AtomicBool::new(false),
        };
        workspace.ensure_scaffold().await?;

        debug!(
            "Created {} workspace at {}",
            workspace.kind,
            workspace.root.display()
        );
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProjectKind {
        self.kind
    }

    pub fn project_files(&self) -> &[ProjectFile] {
        &self.project_files
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn source_path(&self) -> PathBuf {
        self.root.join(SOURCE_FILE)
    }

    /// Wrap `snippet` into a program and write it as the workspace source.
    pub async fn prepare(&self, snippet: &str) -> Result<CompilationUnit> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(Error::Workspace(format!(
                "Workspace {} has been torn down",
                self.name
            )));
        }

        let unit = CompilationUnit::wrap(snippet, self.max_snippet_bytes)?;
        self.ensure_scaffold().await?;

        fs::write(self.source_path(), &unit.source)
            .await
            .map_err(|e| Error::Workspace(format!("Failed to write {}: {}", SOURCE_FILE, e)))?;

        Ok(unit)
    }

    /// Per-call directory for build artifacts, removed when dropped.
    pub async fn scratch_dir(&self) -> Result<TempDir> {
        let runs = self.root.join(RUNS_DIR);
        fs::create_dir_all(&runs)
            .await
            .map_err(|e| Error::Workspace(format!("Failed to create {}: {}", RUNS_DIR, e)))?;
        tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix("run-").tempdir_in(&runs)
        })
        .await
        .map_err(|e| Error::Workspace(format!("Scratch directory task failed: {}", e)))?
        .map_err(|e| Error::Workspace(format!("Failed to create scratch directory: {}", e)))
    }

    /// Remove the workspace directory. Only the first call does anything.
    pub async fn teardown(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        removed(&self.root, fs::remove_dir_all(&self.root).await)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    // Writes only files that are missing so earlier runs' state survives.
    async fn ensure_scaffold(&self) -> Result<()> {
        for file in &self.project_files {
            let path = self.root.join(&file.path);
            if fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            fs::write(&path, &file.contents).await.map_err(|e| {
                Error::Workspace(format!("Failed to write {}: {}", file.path.display(), e))
            })?;
        }
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = removed(&self.root, std::fs::remove_dir_all(&self.root)) {
            error!("Failed to clean up workspace directory: {}", e);
        }
    }
}

fn removed(root: &Path, result: std::io::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Workspace(format!(
            "Failed to remove {}: {}",
            root.display(),
            e
        ))),
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::Workspace(format!("Invalid workspace name: {:?}", name)))
    }
}

fn project_files(kind: ProjectKind, target_framework: &str) -> Vec<ProjectFile> {
    match kind {
        ProjectKind::Console => vec![ProjectFile {
            path: PathBuf::from(format!("{}.csproj", ASSEMBLY_NAME)),
            contents: format!(
                r#"<Project Sdk="Microsoft.NET.Sdk">

  <PropertyGroup>
    <OutputType>Exe</OutputType>
    <TargetFramework>{}</TargetFramework>
    <AssemblyName>{}</AssemblyName>
    <ImplicitUsings>disable</ImplicitUsings>
    <Nullable>disable</Nullable>
    <TreatWarningsAsErrors>false</TreatWarningsAsErrors>
    <GenerateDocumentationFile>false</GenerateDocumentationFile>
    <EnableDefaultCompileItems>false</EnableDefaultCompileItems>
  </PropertyGroup>

  <ItemGroup>
    <Compile Include="{}" />
  </ItemGroup>

</Project>
"#,
                target_framework, ASSEMBLY_NAME, SOURCE_FILE
            ),
        }],
        ProjectKind::Script => vec![ProjectFile {
            path: PathBuf::from(format!("{}.rsp", ASSEMBLY_NAME)),
            contents: "-nologo\n-target:exe\n-langversion:latest\n-warn:4\n-utf8output\n-deterministic\n"
                .to_string(),
        }],
    }
}

//! Toolchain-specific backend implementations

mod csc;
mod dotnet;

pub use csc::CscBackend;
pub use dotnet::DotnetCliBackend;

use std::path::{Path, PathBuf};
use tokio::process::Command;
use which::which;

use crate::{error::Error, Result};

/// Resolve the `dotnet` host from a name on `PATH` or an explicit path.
pub(crate) fn locate_dotnet(dotnet: &Path) -> Result<PathBuf> {
    which(dotnet).map_err(|e| {
        Error::BackendUnavailable(format!(
            "dotnet host {} not found: {}",
            dotnet.display(),
            e
        ))
    })
}

/// A `dotnet` invocation with first-run noise and telemetry switched off.
pub(crate) fn dotnet_command(dotnet: &Path, cwd: &Path) -> Command {
    let mut command = Command::new(dotnet);
    command
        .current_dir(cwd)
        .env("DOTNET_CLI_TELEMETRY_OPTOUT", "1")
        .env("DOTNET_NOLOGO", "1")
        .env("DOTNET_SKIP_FIRST_TIME_EXPERIENCE", "1")
        .env("DOTNET_CLI_UI_LANGUAGE", "en")
        .env("MSBUILDDISABLENODEREUSE", "1");
    command
}

#[cfg(test)]
pub(crate) fn check_command(cmd: &str) -> bool {
    which(cmd).is_ok()
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| !check_command(tool))
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}

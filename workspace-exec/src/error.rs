use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The snippet cannot be wrapped into a plausible program.
    #[error("Invalid snippet: {0}")]
    InvalidSnippet(String),

    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    /// The toolchain cannot be located or started. Not retried.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Environment problems the host should treat as an outage rather than a
    /// per-request failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

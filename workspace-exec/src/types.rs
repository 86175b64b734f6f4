use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default per-run timeout when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Kind of project a workspace is scaffolded as. Each kind is served by one
/// backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    /// MSBuild console project driven through the `dotnet` CLI.
    Console,
    /// Loose source file compiled directly by the Roslyn compiler.
    Script,
}

impl FromStr for ProjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "console" => Ok(ProjectKind::Console),
            "script" => Ok(ProjectKind::Script),
            _ => Err(format!("Unsupported project kind: {}", s)),
        }
    }
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectKind::Console => f.write_str("console"),
            ProjectKind::Script => f.write_str("script"),
        }
    }
}

/// A single snippet execution against a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Statement body to execute
    pub snippet: String,
    /// Wall-clock budget for the run phase, in seconds on the wire
    #[serde(with = "duration_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Keep console lines exactly as emitted (no `\r` stripping)
    #[serde(default)]
    pub raw_output: bool,
}

impl RunRequest {
    pub fn new(snippet: impl Into<String>) -> Self {
        Self {
            snippet: snippet.into(),
            timeout: DEFAULT_TIMEOUT,
            raw_output: false,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_raw_output(self, raw_output: bool) -> Self {
        Self { raw_output, ..self }
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Primary outcome of a run. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    CompileFailed,
    RuntimeFault,
    TimedOut,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::CompileFailed => "compile_failed",
            Outcome::RuntimeFault => "runtime_fault",
            Outcome::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" | "hidden" => Ok(Severity::Info),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

/// Source position. Ordering is file, then line, then column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.file, self.line, self.column)
    }
}

/// A compiler-reported issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Compiler code such as `CS1525`
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            location: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{}: ", location)?;
        }
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        match &self.code {
            Some(code) => write!(f, "{} {}: {}", severity, code, self.message),
            None => write!(f, "{}: {}", severity, self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    RuntimeFault,
    TimedOut,
}

/// Structured failure raised while the program ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub kind: FaultKind,
    /// Exception type, e.g. `System.Exception`, when the runtime reported one
    #[serde(default)]
    pub type_name: Option<String>,
    pub message: String,
    /// Call-stack frames, innermost first
    #[serde(default)]
    pub stack_trace: Vec<String>,
}

impl ExceptionInfo {
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::TimedOut,
            type_name: None,
            message: message.into(),
            stack_trace: Vec::new(),
        }
    }
}

/// Outcome of one run, in a shape callers can branch on uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub outcome: Outcome,
    pub succeeded: bool,
    /// Console lines in emission order
    pub output: Vec<String>,
    pub exception: Option<ExceptionInfo>,
    /// Ordered by location; may hold warnings even on success
    pub diagnostics: Vec<Diagnostic>,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn success(output: Vec<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            outcome: Outcome::Success,
            succeeded: true,
            output,
            exception: None,
            diagnostics,
            duration_ms: 0,
        }
    }

    pub fn compile_failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            outcome: Outcome::CompileFailed,
            succeeded: false,
            output: Vec::new(),
            exception: None,
            diagnostics,
            duration_ms: 0,
        }
    }

    pub fn runtime_fault(
        output: Vec<String>,
        exception: ExceptionInfo,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            outcome: Outcome::RuntimeFault,
            succeeded: false,
            output,
            exception: Some(exception),
            diagnostics,
            duration_ms: 0,
        }
    }

    pub fn timed_out(
        output: Vec<String>,
        message: impl Into<String>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            outcome: Outcome::TimedOut,
            succeeded: false,
            output,
            exception: Some(ExceptionInfo::timed_out(message)),
            diagnostics,
            duration_ms: 0,
        }
    }

    pub fn with_duration(self, duration: Duration) -> Self {
        Self {
            duration_ms: duration.as_millis() as u64,
            ..self
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.outcome == Outcome::TimedOut
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

/// Resource limits applied to the run phase of an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum CPU time (seconds); unlimited when `None`
    pub cpu_time_secs: Option<u64>,
    /// Maximum size of any file the program writes (bytes)
    pub file_size: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time_secs: None,
            file_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Durations as seconds. Fractions are kept, so sub-second timeouts survive
/// a round trip; whole numbers are accepted on input.
pub(crate) mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}

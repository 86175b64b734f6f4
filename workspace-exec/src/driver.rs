//! Time-bounded execution of one child process.

use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setsid, Pid};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{error::Error, types::ResourceLimits, Result};

/// How a driven process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    TimedOut,
    Cancelled,
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        Termination::Exited {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

/// Everything observed from one driven process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set when either stream hit the capture cap
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        matches!(
            self.termination,
            Termination::Exited {
                code: Some(0),
                ..
            }
        )
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited { code, .. } => code,
            _ => None,
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs commands under a deadline and reclaims their whole process group on
/// every exit path.
#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    max_output_bytes: usize,
    drain_timeout: Duration,
    limits: Option<ResourceLimits>,
}

impl ExecutionDriver {
    pub fn new(max_output_bytes: usize, drain_timeout: Duration) -> Self {
        Self {
            max_output_bytes,
            drain_timeout,
            limits: None,
        }
    }

    /// Apply rlimits to every process this driver spawns.
    pub fn with_limits(self, limits: ResourceLimits) -> Self {
        Self {
            limits: Some(limits),
            ..self
        }
    }

    /// Run `command` until it exits, `timeout` elapses, or `cancel` fires.
    ///
    /// On timeout or cancellation the process group is killed and whatever
    /// the process had already written is returned.
    pub async fn run(
        &self,
        mut command: Command,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        debug!("Driver run - Command: {:?}", command.as_std());

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limits = self.limits.clone();
        unsafe {
            command.pre_exec(move || {
                // New session so the whole tree can be signalled as one group.
                setsid()?;
                if let Some(limits) = &limits {
                    setrlimit(Resource::RLIMIT_FSIZE, limits.file_size, limits.file_size)?;
                    if let Some(cpu) = limits.cpu_time_secs {
                        setrlimit(Resource::RLIMIT_CPU, cpu, cpu)?;
                    }
                }
                Ok(())
            });
        }

        let start = Instant::now();
        let child = command.spawn().map_err(|e| spawn_error(&program, e))?;
        let mut handle = ExecutionHandle::new(child);

        let stdout = Capture::shared(self.max_output_bytes);
        let stderr = Capture::shared(self.max_output_bytes);
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = handle.child.stdout.take() {
            readers.push(capture(pipe, stdout.clone()));
        }
        if let Some(pipe) = handle.child.stderr.take() {
            readers.push(capture(pipe, stderr.clone()));
        }

        let waited = tokio::select! {
            status = handle.child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(timeout) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        let termination = match waited {
            Waited::Exited(status) => {
                let status = status?;
                handle.reaped = true;
                Termination::from(status)
            }
            Waited::TimedOut => {
                warn!("{} exceeded {:?}, killing process group", program, timeout);
                handle.terminate().await;
                Termination::TimedOut
            }
            Waited::Cancelled => {
                warn!("{} cancelled, killing process group", program);
                handle.terminate().await;
                Termination::Cancelled
            }
        };

        // Background children may still hold the pipes open.
        handle.kill_group();

        let drain_deadline = tokio::time::Instant::now() + self.drain_timeout;
        for reader in readers.iter_mut() {
            if tokio::time::timeout_at(drain_deadline, reader).await.is_err() {
                warn!("Output of {} did not drain in time, keeping what was read", program);
                break;
            }
        }
        for reader in &readers {
            reader.abort();
        }

        let (stdout, stdout_truncated) = Capture::take(&stdout);
        let (stderr, stderr_truncated) = Capture::take(&stderr);
        let elapsed = start.elapsed();
        debug!("{} finished: {:?} after {:?}", program, termination, elapsed);

        Ok(ProcessOutput {
            termination,
            stdout,
            stderr,
            truncated: stdout_truncated || stderr_truncated,
            elapsed,
        })
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

fn spawn_error(program: &str, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            Error::BackendUnavailable(format!("Failed to start {}: {}", program, e))
        }
        _ => Error::Io(e),
    }
}

/// The live process of one run. Never leaves the driver; dropping it kills
/// the process group.
struct ExecutionHandle {
    child: Child,
    pgid: Option<Pid>,
    reaped: bool,
}

impl ExecutionHandle {
    fn new(child: Child) -> Self {
        // After setsid the child leads its own group.
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));
        Self {
            child,
            pgid,
            reaped: false,
        }
    }

    fn kill_group(&self) {
        if let Some(pgid) = self.pgid {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
    }

    async fn terminate(&mut self) {
        self.kill_group();
        if let Err(e) = self.child.start_kill() {
            debug!("start_kill after group kill: {}", e);
        }
        match self.child.wait().await {
            Ok(_) => self.reaped = true,
            Err(e) => warn!("Failed to reap killed process: {}", e),
        }
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        self.kill_group();
        if !self.reaped {
            let _ = self.child.start_kill();
        }
    }
}

struct Capture {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Capture {
    fn shared(limit: usize) -> Arc<Mutex<Capture>> {
        Arc::new(Mutex::new(Capture {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }))
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn take(shared: &Arc<Mutex<Capture>>) -> (Vec<u8>, bool) {
        let mut capture = shared.lock().unwrap_or_else(|e| e.into_inner());
        (std::mem::take(&mut capture.bytes), capture.truncated)
    }
}

// Keeps reading past the cap so the child never blocks on a full pipe.
fn capture<R>(mut reader: R, sink: Arc<Mutex<Capture>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(&buf[..n]),
                Err(e) => {
                    debug!("Stopped reading child output: {}", e);
                    break;
                }
            }
        }
    })
}

//! Local command execution.
//!
//! All external binaries (installer, `oc`, `subctl`, `tar`) run through
//! [`exec_cmd`]: output captured, a per-call deadline enforced, and an
//! optional process-wide gate taken for invocations that share mutable
//! local state (the client's credentials cache), so two such commands
//! never interleave while unrelated commands stay unsynchronized.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::OpsError;

/// Gate serializing mutually exclusive external invocations.
static COMMAND_GATE: Mutex<()> = Mutex::const_new(());

/// Default command deadline.
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(600);

/// Options for a single command invocation.
#[derive(Debug, Clone)]
pub struct ExecOpts {
    /// Deadline for the whole invocation; the child is killed on expiry.
    pub timeout: Duration,
    /// Do not treat a non-zero exit as an error.
    pub ignore_error: bool,
    /// Take the process-wide command gate around this invocation.
    pub exclusive: bool,
    /// Do not log stderr at warn level.
    pub silent: bool,
    /// Working directory override.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CMD_TIMEOUT,
            ignore_error: false,
            exclusive: false,
            silent: false,
            cwd: None,
            env: Vec::new(),
        }
    }
}

impl ExecOpts {
    /// Options with a non-default deadline.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Options taking the exclusivity gate.
    #[must_use]
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::default()
        }
    }
}

/// Captured result of a completed command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Run a command locally and capture its output.
///
/// # Errors
///
/// Returns `CommandFailed` when the child cannot be spawned or exits
/// non-zero (unless `ignore_error`), and `TimeoutExpired` when the
/// deadline passes first.
pub async fn exec_cmd<S: AsRef<str>>(argv: &[S], opts: ExecOpts) -> Result<CmdOutput, OpsError> {
    let display: Vec<&str> = argv.iter().map(AsRef::as_ref).collect();
    let command_line = display.join(" ");
    debug!(command = %command_line, "Executing command");

    let _guard = if opts.exclusive {
        Some(COMMAND_GATE.lock().await)
    } else {
        None
    };

    let (program, args) = display
        .split_first()
        .ok_or_else(|| OpsError::CommandFailed {
            command: String::new(),
            stderr: "empty command".into(),
        })?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref cwd) = opts.cwd {
        command.current_dir(cwd);
    }
    for (key, value) in &opts.env {
        command.env(key, value);
    }

    let child = command.spawn().map_err(|e| OpsError::CommandFailed {
        command: command_line.clone(),
        stderr: format!("failed to spawn: {e}"),
    })?;

    let output = match tokio::time::timeout(opts.timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            // kill_on_drop reaps the child once the future is dropped.
            return Err(OpsError::TimeoutExpired {
                what: command_line,
                timeout: opts.timeout,
                last: "command still running".into(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let code = output.status.code().unwrap_or(-1);

    if stdout.is_empty() {
        debug!("Command stdout is empty");
    } else {
        debug!(stdout = %stdout.trim_end(), "Command stdout");
    }
    if !stderr.is_empty() && !opts.silent {
        warn!(stderr = %stderr.trim_end(), "Command stderr");
    }
    debug!(code, "Command return code");

    if code != 0 && !opts.ignore_error {
        return Err(OpsError::CommandFailed {
            command: command_line,
            stderr,
        });
    }

    Ok(CmdOutput {
        stdout,
        stderr,
        code,
    })
}

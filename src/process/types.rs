use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, SystemTime};

/// Immutable description of the executable a supervisor launches.
///
/// Built once by the configuration loader and handed to
/// `Supervisor::start`; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process name (unique identifier)
    pub name: String,

    /// Path to the script or executable to run
    pub script: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variables passed to the child (never applied to our own
    /// environment)
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Signal to send on stop (default: SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Grace period before force kill (in seconds)
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_stop_grace() -> u64 {
    10
}

impl ProcessSpec {
    /// Validate the spec before any process is created
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(VigilError::InvalidSpec("name must not be empty".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(VigilError::InvalidSpec(
                "executable path must not be empty".to_string(),
            ));
        }

        let valid_signals = [
            "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
        ];
        if !valid_signals.contains(&self.stop_signal.as_str()) {
            return Err(VigilError::InvalidSpec(format!(
                "invalid stop_signal: {}. Must be one of: {}",
                self.stop_signal,
                valid_signals.join(", ")
            )));
        }

        if self.env.keys().any(|k| k.is_empty()) {
            return Err(VigilError::InvalidSpec(
                "environment variable names must not be empty".to_string(),
            ));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(VigilError::InvalidSpec(format!(
                    "working directory does not exist: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// Get the stop grace period as Duration
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Lifecycle states of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Exited,
    Restarting,
    Stopped,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Exited => write!(f, "exited"),
            SupervisorState::Restarting => write!(f, "restarting"),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a process run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Process exited with a status code
    Exited(i32),
    /// Process was terminated by a signal (Unix)
    Signaled(i32),
    /// The OS refused to create the process; treated as an exit event for
    /// restart-policy purposes
    SpawnFailed(String),
}

impl From<ExitStatus> for ExitReason {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitReason::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitReason::Signaled(sig);
            }
        }

        ExitReason::Exited(-1)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Exited(code) => write!(f, "exited with code {}", code),
            ExitReason::Signaled(sig) => write!(f, "killed by signal {}", sig),
            ExitReason::SpawnFailed(msg) => write!(f, "spawn failed: {}", msg),
        }
    }
}

/// Captured details of the most recent process exit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub reason: ExitReason,
    pub at: SystemTime,
}

impl ExitInfo {
    pub fn new(reason: ExitReason) -> Self {
        Self {
            reason,
            at: SystemTime::now(),
        }
    }
}

/// Why the supervisor reached its terminal `Stopped` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopCause {
    /// An operator called `stop()`
    Requested,
    /// The policy has autorestart disabled
    AutorestartDisabled,
    /// The restart budget ran out; surfaced, never silently swallowed
    BudgetExhausted,
}

impl std::fmt::Display for StopCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopCause::Requested => write!(f, "stop requested"),
            StopCause::AutorestartDisabled => write!(f, "autorestart disabled"),
            StopCause::BudgetExhausted => write!(f, "restart budget exhausted"),
        }
    }
}

/// Read-only snapshot of a supervisor's state, published on every
/// transition. Cheap to clone; safe to read from any thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: SupervisorState,
    pub pid: Option<u32>,
    pub restarts: u64,
    pub last_exit: Option<ExitInfo>,
    pub stop_cause: Option<StopCause>,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        Self {
            state: SupervisorState::Idle,
            pid: None,
            restarts: 0,
            last_exit: None,
            stop_cause: None,
        }
    }
}

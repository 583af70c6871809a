use crate::process::types::StopCause;
use std::time::Duration;

/// Restart policy configuration
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub autorestart: bool,
    /// Maximum number of relaunches before giving up permanently.
    /// Bounds restarts, not total starts: the first launch is free.
    pub max_restarts: u64,
    /// Delay between an exit and the next launch attempt
    pub restart_delay: Duration,
}

impl RestartPolicy {
    /// Create a new restart policy with default values
    pub fn new() -> Self {
        Self {
            autorestart: true,
            max_restarts: 10,
            restart_delay: Duration::from_secs(1),
        }
    }

    /// Create a restart policy from configuration values
    pub fn from_config(autorestart: bool, max_restarts: u64, restart_delay: Duration) -> Self {
        Self {
            autorestart,
            max_restarts,
            restart_delay,
        }
    }

    /// Decide what to do after a process exit.
    ///
    /// `restarts_so_far` is the number of relaunches already performed by
    /// the current supervisor; it never resets while the supervisor lives.
    pub fn decide(&self, restarts_so_far: u64, stop_requested: bool) -> RestartDecision {
        if stop_requested {
            return RestartDecision::Halt(StopCause::Requested);
        }

        if !self.autorestart {
            return RestartDecision::Halt(StopCause::AutorestartDisabled);
        }

        if restarts_so_far >= self.max_restarts {
            return RestartDecision::Halt(StopCause::BudgetExhausted);
        }

        RestartDecision::RetryAfter(self.restart_delay)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a restart decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    /// Go to `Stopped` permanently
    Halt(StopCause),
    /// Relaunch after sleeping for the given delay
    RetryAfter(Duration),
}

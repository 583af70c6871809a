use crate::error::{Result, VigilError};
use crate::process::restart::{RestartDecision, RestartPolicy};
use crate::process::spawner::spawn_process;
use crate::process::types::{
    ExitInfo, ExitReason, ProcessSpec, StatusSnapshot, StopCause, SupervisorState,
};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Supervisor owning the lifecycle of exactly one child process.
///
/// The state machine runs as a single sequential tokio task per instance:
/// `Idle → Starting → Running → Exited → (Restarting → Starting) | Stopped`.
/// Its only suspension points are the child wait and the restart-delay
/// sleep, and both are interrupted immediately by [`Supervisor::stop`].
/// Status is published through a watch channel, so [`Supervisor::status`]
/// never touches the state machine's own fields.
///
/// Dropping a running supervisor closes the stop channel, which the task
/// treats as a stop request: the child is terminated rather than leaked.
pub struct Supervisor {
    status_tx: watch::Sender<StatusSnapshot>,
    status_rx: watch::Receiver<StatusSnapshot>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Create a supervisor in the `Idle` state, with no process created
    pub fn new() -> Self {
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::idle());
        Self {
            status_tx,
            status_rx,
            stop_tx: None,
            task: None,
        }
    }

    /// Launch the process described by `spec` and keep it alive per `policy`.
    ///
    /// Fails with [`VigilError::AlreadyRunning`] unless the supervisor is in
    /// `Idle` or `Stopped`, and with [`VigilError::InvalidSpec`] if the spec
    /// does not validate. A spawn failure is not an error here: it is
    /// recorded as a synthetic exit and consumes restart budget like any
    /// other exit.
    ///
    /// The restart counter resets only when starting from `Idle`; a start
    /// from `Stopped` keeps consuming the counter where it left off.
    pub fn start(&mut self, spec: ProcessSpec, policy: RestartPolicy) -> Result<()> {
        let previous = self.status_rx.borrow().clone();
        match previous.state {
            SupervisorState::Idle | SupervisorState::Stopped => {}
            _ => return Err(VigilError::AlreadyRunning(spec.name)),
        }

        spec.validate()?;

        let restarts = if previous.state == SupervisorState::Idle {
            0
        } else {
            previous.restarts
        };

        // Published before the task is spawned, so a status() call issued
        // right after start() never observes Idle.
        self.status_tx.send_modify(|s| {
            s.state = SupervisorState::Starting;
            s.pid = None;
            s.restarts = restarts;
            s.last_exit = None;
            s.stop_cause = None;
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        self.stop_tx = Some(stop_tx);

        let status_tx = self.status_tx.clone();
        self.task = Some(tokio::spawn(run_loop(
            spec, policy, status_tx, stop_rx, restarts,
        )));

        Ok(())
    }

    /// Request termination and wait until the supervisor reaches `Stopped`.
    ///
    /// Interrupts the child wait or the restart-delay sleep immediately.
    /// The current process (if any) is sent the spec's stop signal and
    /// force-killed after the grace period. Idempotent; safe to call from
    /// any state.
    pub async fn stop(&mut self) {
        if let Some(ref stop_tx) = self.stop_tx {
            let _ = stop_tx.send(true);
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("supervisor task failed: {}", e);
            }
        } else if self.stop_tx.is_some() {
            // A cancelled stop() or wait() may have dropped the join
            // handle while the run loop kept going. The loop publishes
            // Stopped only once the child is fully terminated, so follow
            // the status channel until it gets there.
            let mut rx = self.status_rx.clone();
            while rx.borrow_and_update().state != SupervisorState::Stopped {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        self.stop_tx = None;

        self.status_tx.send_modify(|s| {
            if s.state != SupervisorState::Stopped {
                s.state = SupervisorState::Stopped;
                s.pid = None;
                s.stop_cause.get_or_insert(StopCause::Requested);
            }
        });
    }

    /// Read-only snapshot of the current state; safe from any thread
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to status updates, one per state transition
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Wait for the state machine to reach `Stopped` on its own (policy
    /// exhaustion or autorestart disabled), without requesting a stop.
    ///
    /// Cancellation-safe: dropping the returned future mid-wait leaves the
    /// run loop and its join handle in place, so a later `stop()` or
    /// `wait()` still observes real termination.
    pub async fn wait(&mut self) {
        if self.stop_tx.is_none() {
            return;
        }

        let mut rx = self.status_rx.clone();
        while rx.borrow_and_update().state != SupervisorState::Stopped {
            if rx.changed().await.is_err() {
                return;
            }
        }

        // The task has published Stopped; reap it
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("supervisor task failed: {}", e);
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// The sequential state machine. One instance of this task exists per
/// started supervisor; all state transitions happen here, in order.
async fn run_loop(
    spec: ProcessSpec,
    policy: RestartPolicy,
    status: watch::Sender<StatusSnapshot>,
    mut stop_rx: watch::Receiver<bool>,
    mut restarts: u64,
) {
    loop {
        status.send_modify(|s| {
            s.state = SupervisorState::Starting;
            s.pid = None;
        });
        debug!(name = %spec.name, "starting process");

        let exit = match spawn_process(&spec).await {
            Ok(mut spawned) => {
                info!(name = %spec.name, pid = spawned.pid, "process started");
                status.send_modify(|s| {
                    s.state = SupervisorState::Running;
                    s.pid = Some(spawned.pid);
                });

                tokio::select! {
                    wait = spawned.child.wait() => match wait {
                        Ok(exit_status) => ExitInfo::new(ExitReason::from(exit_status)),
                        Err(e) => ExitInfo::new(ExitReason::SpawnFailed(format!(
                            "wait failed: {}",
                            e
                        ))),
                    },
                    // Covers both an explicit stop() and the supervisor
                    // handle being dropped.
                    _ = stop_rx.changed() => {
                        info!(name = %spec.name, "stop requested, terminating process");
                        terminate(&spec, &mut spawned.child).await;
                        halt(&status, StopCause::Requested);
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(name = %spec.name, error = %e, "spawn failed");
                ExitInfo::new(ExitReason::SpawnFailed(e.to_string()))
            }
        };

        info!(name = %spec.name, exit = %exit.reason, "process exited");
        status.send_modify(|s| {
            s.state = SupervisorState::Exited;
            s.pid = None;
            s.last_exit = Some(exit);
        });

        let stop_requested = *stop_rx.borrow();
        match policy.decide(restarts, stop_requested) {
            RestartDecision::Halt(cause) => {
                if cause == StopCause::BudgetExhausted {
                    error!(
                        name = %spec.name,
                        restarts,
                        "restart budget exhausted, giving up"
                    );
                }
                halt(&status, cause);
                return;
            }
            RestartDecision::RetryAfter(delay) => {
                restarts += 1;
                status.send_modify(|s| {
                    s.state = SupervisorState::Restarting;
                    s.restarts = restarts;
                });
                debug!(name = %spec.name, ?delay, restarts, "restarting after delay");

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = stop_rx.changed() => {
                        halt(&status, StopCause::Requested);
                        return;
                    }
                }
            }
        }
    }
}

fn halt(status: &watch::Sender<StatusSnapshot>, cause: StopCause) {
    status.send_modify(|s| {
        s.state = SupervisorState::Stopped;
        s.pid = None;
        s.stop_cause = Some(cause);
    });
}

/// Graceful termination: stop signal first, SIGKILL after the grace period
#[cfg(unix)]
async fn terminate(spec: &ProcessSpec, child: &mut Child) {
    use nix::sys::signal;
    use nix::unistd::Pid;
    use tokio::time::timeout;

    let Some(pid) = child.id() else {
        // Already exited; reap it
        let _ = child.wait().await;
        return;
    };

    let stop_signal = match parse_signal(&spec.stop_signal) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(name = %spec.name, error = %e, "falling back to SIGTERM");
            signal::Signal::SIGTERM
        }
    };

    debug!(
        name = %spec.name,
        pid,
        signal = %spec.stop_signal,
        "sending stop signal"
    );

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), stop_signal) {
        warn!(name = %spec.name, error = %e, "failed to signal process, killing");
        let _ = child.kill().await;
        return;
    }

    match timeout(spec.stop_grace(), child.wait()).await {
        Ok(_) => {
            debug!(name = %spec.name, "process exited after stop signal");
        }
        Err(_) => {
            warn!(
                name = %spec.name,
                "process did not exit within {:?}, sending SIGKILL",
                spec.stop_grace()
            );
            let _ = child.kill().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate(_spec: &ProcessSpec, child: &mut Child) {
    let _ = child.kill().await;
}

#[cfg(unix)]
fn parse_signal(signal_name: &str) -> Result<nix::sys::signal::Signal> {
    use nix::sys::signal::Signal;

    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(VigilError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn test_spec(name: &str, script: &str, args: &[&str]) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            script: PathBuf::from(script),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            env: HashMap::new(),
            stop_signal: "SIGTERM".to_string(),
            stop_grace_secs: 2,
        }
    }

    fn policy(autorestart: bool, max_restarts: u64, delay_ms: u64) -> RestartPolicy {
        RestartPolicy::from_config(autorestart, max_restarts, Duration::from_millis(delay_ms))
    }

    async fn wait_for_state(supervisor: &Supervisor, target: SupervisorState) {
        let mut rx = supervisor.subscribe();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if rx.borrow_and_update().state == target {
                    return;
                }
                rx.changed().await.expect("status channel closed");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {}", target));
    }

    #[tokio::test]
    async fn test_status_never_idle_after_start() {
        let mut supervisor = Supervisor::new();
        supervisor
            .start(test_spec("idle-check", "/bin/sleep", &["30"]), policy(true, 10, 0))
            .unwrap();

        let state = supervisor.status().state;
        assert!(
            matches!(
                state,
                SupervisorState::Starting | SupervisorState::Running | SupervisorState::Exited
            ),
            "unexpected state right after start: {}",
            state
        );

        supervisor.stop().await;
        assert_eq!(supervisor.status().state, SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_start_while_running_fails() {
        let mut supervisor = Supervisor::new();
        supervisor
            .start(test_spec("dup", "/bin/sleep", &["30"]), policy(true, 10, 0))
            .unwrap();
        wait_for_state(&supervisor, SupervisorState::Running).await;

        let result = supervisor.start(test_spec("dup", "/bin/sleep", &["30"]), policy(true, 10, 0));
        assert!(matches!(result, Err(VigilError::AlreadyRunning(_))));

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_spec() {
        let mut supervisor = Supervisor::new();
        let result = supervisor.start(test_spec("bad", "", &[]), policy(true, 10, 0));
        assert!(matches!(result, Err(VigilError::InvalidSpec(_))));
    }

    #[tokio::test]
    async fn test_spawn_failures_exhaust_budget() {
        let mut supervisor = Supervisor::new();
        supervisor
            .start(
                test_spec("spawn-fail", "/nonexistent/executable", &[]),
                policy(true, 3, 0),
            )
            .unwrap();

        supervisor.wait().await;

        let status = supervisor.status();
        assert_eq!(status.state, SupervisorState::Stopped);
        assert_eq!(status.stop_cause, Some(StopCause::BudgetExhausted));
        assert_eq!(status.restarts, 3);
        assert!(matches!(
            status.last_exit.unwrap().reason,
            ExitReason::SpawnFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_autorestart_disabled_stops_with_zero_restarts() {
        let mut supervisor = Supervisor::new();
        supervisor
            .start(
                test_spec("one-shot", "/bin/sh", &["-c", "exit 1"]),
                policy(false, 10, 0),
            )
            .unwrap();

        supervisor.wait().await;

        let status = supervisor.status();
        assert_eq!(status.state, SupervisorState::Stopped);
        assert_eq!(status.stop_cause, Some(StopCause::AutorestartDisabled));
        assert_eq!(status.restarts, 0);
        assert_eq!(status.last_exit.unwrap().reason, ExitReason::Exited(1));
    }

    #[tokio::test]
    async fn test_stop_interrupts_restart_delay() {
        let mut supervisor = Supervisor::new();
        supervisor
            .start(
                test_spec("delay-stop", "/bin/sh", &["-c", "exit 1"]),
                policy(true, 10, 30_000),
            )
            .unwrap();

        wait_for_state(&supervisor, SupervisorState::Restarting).await;

        let began = Instant::now();
        supervisor.stop().await;
        assert!(
            began.elapsed() < Duration::from_secs(5),
            "stop() waited out the restart delay"
        );

        let status = supervisor.status();
        assert_eq!(status.state, SupervisorState::Stopped);
        assert_eq!(status.stop_cause, Some(StopCause::Requested));
    }

    #[tokio::test]
    async fn test_stop_terminates_running_process() {
        let mut supervisor = Supervisor::new();
        supervisor
            .start(test_spec("long-runner", "/bin/sleep", &["30"]), policy(true, 10, 0))
            .unwrap();

        wait_for_state(&supervisor, SupervisorState::Running).await;
        assert!(supervisor.status().pid.is_some());

        supervisor.stop().await;

        let status = supervisor.status();
        assert_eq!(status.state, SupervisorState::Stopped);
        assert_eq!(status.restarts, 0);
        assert!(status.pid.is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut supervisor = Supervisor::new();
        supervisor
            .start(test_spec("twice", "/bin/sleep", &["30"]), policy(true, 10, 0))
            .unwrap();

        supervisor.stop().await;
        supervisor.stop().await;
        assert_eq!(supervisor.status().state, SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_from_idle() {
        let mut supervisor = Supervisor::new();
        supervisor.stop().await;
        assert_eq!(supervisor.status().state, SupervisorState::Stopped);

        supervisor.stop().await;
        assert_eq!(supervisor.status().state, SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_counter_carries_over_restart_from_stopped() {
        let mut supervisor = Supervisor::new();
        let spec = test_spec("carry-over", "/nonexistent/executable", &[]);

        supervisor.start(spec.clone(), policy(true, 2, 0)).unwrap();
        supervisor.wait().await;
        assert_eq!(supervisor.status().restarts, 2);
        assert_eq!(
            supervisor.status().stop_cause,
            Some(StopCause::BudgetExhausted)
        );

        // Starting again from Stopped keeps the spent budget: one more
        // launch attempt, then immediate exhaustion.
        supervisor.start(spec, policy(true, 2, 0)).unwrap();
        supervisor.wait().await;
        assert_eq!(supervisor.status().restarts, 2);
        assert_eq!(
            supervisor.status().stop_cause,
            Some(StopCause::BudgetExhausted)
        );
    }

    #[tokio::test]
    async fn test_restart_counter_resets_on_fresh_supervisor() {
        let mut supervisor = Supervisor::new();
        supervisor
            .start(
                test_spec("fresh", "/nonexistent/executable", &[]),
                policy(true, 1, 0),
            )
            .unwrap();
        supervisor.wait().await;
        assert_eq!(supervisor.status().restarts, 1);

        let fresh = Supervisor::new();
        assert_eq!(fresh.status().restarts, 0);
        assert_eq!(fresh.status().state, SupervisorState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unresponsive_process_is_force_killed() {
        // A child that ignores SIGTERM; stop() must escalate to SIGKILL
        // after the grace period instead of hanging.
        let mut spec = test_spec(
            "stubborn",
            "/bin/sh",
            &["-c", "trap '' TERM; sleep 30 & wait"],
        );
        spec.stop_grace_secs = 1;

        let mut supervisor = Supervisor::new();
        supervisor.start(spec, policy(true, 10, 0)).unwrap();
        wait_for_state(&supervisor, SupervisorState::Running).await;

        let began = Instant::now();
        supervisor.stop().await;
        assert!(began.elapsed() < Duration::from_secs(10));
        assert_eq!(supervisor.status().state, SupervisorState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_after_cancelled_wait_still_kills_child() {
        // A shutdown select can cancel wait() mid-flight. stop() must still
        // terminate the child and report Stopped only once it is gone, even
        // for a child that ignores the stop signal.
        let mut spec = test_spec(
            "wait-cancel",
            "/bin/sh",
            &["-c", "trap '' TERM; sleep 30 & wait"],
        );
        spec.stop_grace_secs = 1;

        let mut supervisor = Supervisor::new();
        supervisor.start(spec, policy(true, 10, 0)).unwrap();
        wait_for_state(&supervisor, SupervisorState::Running).await;
        let pid = supervisor.status().pid.unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(200), supervisor.wait()).await;
        assert!(cancelled.is_err(), "wait() should still be pending");

        supervisor.stop().await;
        assert_eq!(supervisor.status().state, SupervisorState::Stopped);

        // The child must be gone by the time stop() returns
        let err = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None)
            .expect_err("child should no longer exist");
        assert_eq!(err, nix::errno::Errno::ESRCH);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_survives_cancellation() {
        // A cancelled wait() must not detach the run loop: a later wait()
        // still observes the supervisor stopping on its own.
        let mut supervisor = Supervisor::new();
        supervisor
            .start(
                test_spec("slow-crash", "/bin/sh", &["-c", "sleep 1; exit 1"]),
                policy(false, 10, 0),
            )
            .unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), supervisor.wait()).await;
        assert!(cancelled.is_err(), "wait() should still be pending");

        supervisor.wait().await;
        let status = supervisor.status();
        assert_eq!(status.state, SupervisorState::Stopped);
        assert_eq!(status.stop_cause, Some(StopCause::AutorestartDisabled));
    }

    #[test]
    #[cfg(unix)]
    fn test_parse_signal() {
        assert!(parse_signal("SIGTERM").is_ok());
        assert!(parse_signal("SIGUSR2").is_ok());
        assert!(matches!(
            parse_signal("NOPE"),
            Err(VigilError::SignalError(_))
        ));
    }
}

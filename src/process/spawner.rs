use crate::error::{Result, VigilError};
use crate::process::types::ProcessSpec;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle, owned exclusively by the supervisor
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn a process from the provided spec
///
/// This function creates a new process using tokio::process::Command,
/// applying all spec settings: working directory, environment variables
/// and command-line arguments. Environment variables are passed at
/// creation time only; the supervisor's own environment is never touched.
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Successfully spawned process with metadata
/// * `Err(VigilError::SpawnError)` - OS refused to create the process
pub async fn spawn_process(spec: &ProcessSpec) -> Result<SpawnedProcess> {
    if !spec.script.exists() {
        return Err(VigilError::SpawnError(format!(
            "Executable does not exist: {}",
            spec.script.display()
        )));
    }

    let mut command = Command::new(&spec.script);

    if !spec.args.is_empty() {
        command.args(&spec.args);
    }

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    for (key, value) in &spec.env {
        command.env(key, value);
    }

    // Log capture is out of scope; child output passes through. The child
    // must not contend for our stdin.
    command.stdin(Stdio::null());
    command.stdout(Stdio::inherit());
    command.stderr(Stdio::inherit());

    let child = command.spawn().map_err(|e| {
        VigilError::SpawnError(format!("Failed to spawn process '{}': {}", spec.name, e))
    })?;

    let pid = child.id().ok_or_else(|| {
        VigilError::SpawnError(format!("Failed to get PID for process '{}'", spec.name))
    })?;

    Ok(SpawnedProcess { child, pid })
}

// Process module - supervisor core: spec, restart policy, state machine

pub mod restart;
pub mod spawner;
pub mod supervisor;
pub mod types;

pub use restart::{RestartDecision, RestartPolicy};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::Supervisor;
pub use types::{ExitInfo, ExitReason, ProcessSpec, StatusSnapshot, StopCause, SupervisorState};

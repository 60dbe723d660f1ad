//! Instance identity, state and port allocation.

use crate::process::ExitStatus;
use config::{parse_port, Env, ProcfileEntry};

/// Ports are spread this far apart per Procfile entry.
pub const PORT_STRIDE: usize = 100;

/// One running copy of a Procfile entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Position of the entry in the Procfile
    pub index: usize,
    /// Instance number within the entry, starting at zero
    pub number: usize,
    /// Display name (`web` or `web.2`)
    pub name: String,
    /// Shell command line
    pub command: String,
}

impl Instance {
    /// Instance `number` of `count` copies of `entry`.
    pub fn new(entry: &ProcfileEntry, number: usize, count: usize) -> Self {
        Self {
            index: entry.index,
            number,
            name: entry.instance_name(number, count),
            command: entry.command.clone(),
        }
    }
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Process is being spawned
    Starting,
    /// Process is running
    Running,
    /// Process exited on its own
    Exited,
    /// Process was terminated by a signal
    Signaled,
    /// Process exited and is about to be started again
    Restarting,
    /// Teardown asked the process to stop
    Stopping,
    /// Process stopped during teardown
    Stopped,
    /// Process could not be started
    Failed,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Exited => write!(f, "exited"),
            InstanceState::Signaled => write!(f, "signaled"),
            InstanceState::Restarting => write!(f, "restarting"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of an instance's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatus {
    /// Display name
    pub name: String,
    /// Current state
    pub state: InstanceState,
    /// PID of the current process, if one is running
    pub pid: Option<u32>,
    /// Number of restarts so far
    pub restarts: u32,
    /// Exit status of the most recent process
    pub last_exit: Option<ExitStatus>,
}

impl InstanceStatus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: InstanceState::Starting,
            pid: None,
            restarts: 0,
            last_exit: None,
        }
    }
}

/// Resolve the base port: explicit setting, then `PORT` in the loaded
/// environment, then `PORT` in the supervisor's own environment.
pub fn base_port(configured: Option<u16>, env: &Env) -> config::Result<Option<u16>> {
    if let Some(port) = configured {
        return Ok(Some(port));
    }
    if let Some(port) = env.get("PORT").filter(|p| !p.is_empty()) {
        return parse_port(port).map(Some);
    }
    match std::env::var("PORT") {
        Ok(port) if !port.is_empty() => parse_port(&port).map(Some),
        _ => Ok(None),
    }
}

/// Port of every instance of the entry at `index`: `base + index * 100`.
///
/// Returns `None` when the result does not fit in a port number.
pub fn instance_port(base: u16, index: usize) -> Option<u16> {
    let port = base as usize + index * PORT_STRIDE;
    u16::try_from(port).ok()
}

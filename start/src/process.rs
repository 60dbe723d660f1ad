//! Process management for the supervisor.
//!
//! Every declared command runs through `sh -c` rooted at the Procfile
//! directory. Non-interactive processes get a session of their own, and
//! signals go to the whole process group, so a shell script that forks
//! further children is stopped as one unit.

use crate::error::{Error, Result};
use config::Env;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

/// Exit status of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Process ID
    pub pid: u32,
    /// Exit code (if exited normally)
    pub code: Option<i32>,
    /// Signal (if killed by signal)
    pub signal: Option<i32>,
}

impl ExitStatus {
    fn from_std(pid: u32, status: std::process::ExitStatus) -> Self {
        Self {
            pid,
            code: status.code(),
            signal: status.signal(),
        }
    }

    /// Check if the process exited successfully.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Name of the terminating signal, if the process was killed by one.
    pub fn signal_name(&self) -> Option<String> {
        self.signal.map(|sig| match Signal::try_from(sig) {
            Ok(sig) => sig.as_str().to_string(),
            Err(_) => format!("signal {}", sig),
        })
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal_name()) {
            (Some(code), _) => write!(f, "exit code: {}", code),
            (None, Some(name)) => write!(f, "exit signal: {}", name),
            (None, None) => write!(f, "exited (unknown status)"),
        }
    }
}

/// Output streams of a started process.
#[derive(Debug)]
pub struct OutputStreams {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// One spawned (or to-be-spawned) OS process.
///
/// A `Process` is started once, waited on once, and then discarded.
#[derive(Debug)]
pub struct Process {
    workdir: PathBuf,
    args: Vec<String>,
    env: Env,
    interactive: bool,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    status: OnceLock<ExitStatus>,
}

impl Process {
    /// Describe a process running `command` through the shell in `workdir`.
    pub fn new(workdir: impl Into<PathBuf>, command: &str, env: Env, interactive: bool) -> Self {
        Self {
            workdir: workdir.into(),
            args: shell_invocation(interactive, command),
            env,
            interactive,
            pid: None,
            child: Mutex::new(None),
            status: OnceLock::new(),
        }
    }

    /// Argument vector, starting with the shell.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// PID once started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status once the process has been waited on.
    pub fn exit_status(&self) -> Option<&ExitStatus> {
        self.status.get()
    }

    /// Spawn the process and hand back its output streams.
    pub fn start(&mut self) -> Result<OutputStreams> {
        if self.pid.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let mut cmd = Command::new(&self.args[0]);
        cmd.args(&self.args[1..])
            .current_dir(&self.workdir)
            .envs(self.env.iter())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.interactive {
            cmd.stdin(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null());
            // New session, so the child leads its own process group
            unsafe {
                cmd.pre_exec(|| {
                    nix::unistd::setsid()
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|e| Error::Spawn {
            name: self.args.last().cloned().unwrap_or_default(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| Error::Spawn {
            name: self.args.last().cloned().unwrap_or_default(),
            reason: "process exited before its PID was read".to_string(),
        })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                return Err(Error::Spawn {
                    name: self.args.last().cloned().unwrap_or_default(),
                    reason: "output pipes unavailable".to_string(),
                })
            }
        };

        debug!(pid = pid, workdir = %self.workdir.display(), "Spawned process");
        self.pid = Some(pid);
        *self.child.lock() = Some(child);

        Ok(OutputStreams { stdout, stderr })
    }

    /// Wait for the process to exit. May be called once.
    pub async fn wait(&self) -> Result<ExitStatus> {
        let pid = self.pid.ok_or(Error::NotStarted)?;
        let mut child = self.child.lock().take().ok_or(Error::AlreadyWaited)?;

        let status = ExitStatus::from_std(pid, child.wait().await?);
        let _ = self.status.set(status.clone());
        debug!(pid = pid, status = %status, "Reaped process");
        Ok(status)
    }

    /// Send a signal to the process group (or the process itself if interactive).
    pub fn signal(&self, sig: Signal) -> Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| Error::SignalDelivery("process was never started".to_string()))?;
        if self.status.get().is_some() {
            return Err(Error::SignalDelivery(format!(
                "process {} has already exited",
                pid
            )));
        }

        let target = Pid::from_raw(pid as i32);
        let delivered = if self.interactive {
            signal::kill(target, sig)
        } else {
            signal::killpg(target, sig)
        };
        delivered.map_err(|e| Error::SignalDelivery(format!("{} to {}: {}", sig, pid, e)))?;

        debug!(pid = pid, signal = ?sig, "Sent signal to process");
        Ok(())
    }

    /// Ask the process to stop.
    pub fn send_sigterm(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Force the process to stop.
    pub fn send_sigkill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }
}

/// Shell argument vector used to run a Procfile command.
pub fn shell_invocation(interactive: bool, command: &str) -> Vec<String> {
    let flag = if interactive { "-ic" } else { "-c" };
    vec!["sh".to_string(), flag.to_string(), command.to_string()]
}

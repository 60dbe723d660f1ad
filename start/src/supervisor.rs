//! Supervisor that runs every Procfile instance and owns teardown.
//!
//! Two barriers coordinate shutdown. `teardown` asks every instance to stop
//! with SIGTERM; `teardown_now` escalates to SIGKILL. Falling `teardown`
//! arms a grace timer that falls `teardown_now`, and `teardown_now` is
//! forwarded to `teardown`, so a forced stop is always also a graceful one.

use crate::barrier::Barrier;
use crate::error::{Error, Result};
use crate::instance::{base_port, instance_port, Instance, InstanceState, InstanceStatus};
use crate::output::OutputMux;
use crate::process::{ExitStatus, Process};
use crate::shipper::LogShipper;
use crate::signals::SignalMonitor;
use config::{Concurrency, Env, Procfile};
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory processes run in
    pub workdir: PathBuf,
    /// Explicit base port
    pub base_port: Option<u16>,
    /// Restart instances that exit instead of tearing everything down
    pub restart: bool,
    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,
    /// Job label attached to shipped lines
    pub log_job: String,
}

impl SupervisorConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            base_port: None,
            restart: false,
            grace_period: Duration::from_secs(config::loader::DEFAULT_SHUTDOWN_GRACE_TIME),
            log_job: config::loader::DEFAULT_LOKI_JOB.to_string(),
        }
    }
}

/// Held by every supervised task; teardown completes once all are dropped.
#[derive(Clone)]
struct TaskGuard(#[allow(dead_code)] mpsc::Sender<()>);

/// The live parts of one started process.
struct Running {
    process: Arc<Process>,
    finished: Arc<Barrier>,
}

/// Runs process instances and tears them down together.
pub struct Supervisor {
    config: SupervisorConfig,
    output: Arc<OutputMux>,
    shipper: Option<Arc<dyn LogShipper>>,
    teardown: Arc<Barrier>,
    teardown_now: Arc<Barrier>,
    instances: Mutex<BTreeMap<String, InstanceStatus>>,
    tasks: Mutex<Option<mpsc::Sender<()>>>,
    tasks_done: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl Supervisor {
    /// Create a supervisor and wire its teardown barriers.
    pub fn new(
        config: SupervisorConfig,
        output: Arc<OutputMux>,
        shipper: Option<Arc<dyn LogShipper>>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(1);
        let supervisor = Arc::new(Self {
            config,
            output,
            shipper,
            teardown: Arc::new(Barrier::new()),
            teardown_now: Arc::new(Barrier::new()),
            instances: Mutex::new(BTreeMap::new()),
            tasks: Mutex::new(Some(tx)),
            tasks_done: tokio::sync::Mutex::new(rx),
        });

        let grace = supervisor.config.grace_period;
        let teardown_now = Arc::clone(&supervisor.teardown_now);
        let output = Arc::clone(&supervisor.output);
        supervisor.teardown.set_fall_hook(move || {
            debug!(grace_ms = grace.as_millis() as u64, "Teardown started, grace timer armed");
            let expire = move || {
                if !teardown_now.has_fallen() {
                    output.system("Grace time expired");
                    teardown_now.fall();
                }
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        tokio::time::sleep(grace).await;
                        expire();
                    });
                }
                Err(_) => {
                    std::thread::spawn(move || {
                        std::thread::sleep(grace);
                        expire();
                    });
                }
            }
        });
        supervisor.teardown_now.forward(&supervisor.teardown);

        supervisor
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn output(&self) -> &Arc<OutputMux> {
        &self.output
    }

    /// Barrier that starts a graceful shutdown.
    pub fn teardown(&self) -> &Arc<Barrier> {
        &self.teardown
    }

    /// Barrier that forces every instance to be killed.
    pub fn teardown_now(&self) -> &Arc<Barrier> {
        &self.teardown_now
    }

    /// Install the signal monitor and run it in the background.
    pub fn monitor_signals(&self) -> Result<JoinHandle<()>> {
        let monitor = SignalMonitor::install(
            Arc::clone(&self.teardown),
            Arc::clone(&self.teardown_now),
            Arc::clone(&self.output),
        )?;
        Ok(tokio::spawn(monitor.run()))
    }

    /// Status of one instance by display name.
    pub fn status(&self, name: &str) -> Option<InstanceStatus> {
        self.instances.lock().get(name).cloned()
    }

    /// Status of every instance, ordered by name.
    pub fn statuses(&self) -> Vec<InstanceStatus> {
        self.instances.lock().values().cloned().collect()
    }

    /// Start every instance and block until teardown has completed.
    ///
    /// With `only` set, entries with any other name are skipped.
    pub async fn run_all(
        self: &Arc<Self>,
        procfile: &Procfile,
        concurrency: &Concurrency,
        env: &Env,
        only: Option<&str>,
    ) {
        let mut started = 0;
        'entries: for entry in procfile.entries() {
            if only.is_some_and(|name| name != entry.name) {
                continue;
            }
            let count = concurrency.count_for(&entry.name);
            for number in 0..count {
                if self.teardown.has_fallen() {
                    break 'entries;
                }
                if self.start_instance(Instance::new(entry, number, count), env).is_ok() {
                    started += 1;
                }
            }
        }

        if started == 0 && !self.teardown.has_fallen() {
            self.output.system("teardown cause: no processes to run");
            self.teardown.fall();
        }

        self.teardown.wait().await;
        self.wait_for_tasks().await;
        debug!("All supervised tasks finished");
    }

    /// Start one instance and the task that applies the restart policy.
    ///
    /// A failure to start is reported and falls the teardown barrier.
    pub fn start_instance(self: &Arc<Self>, instance: Instance, env: &Env) -> Result<()> {
        let guard = self.task_guard().ok_or_else(|| Error::Spawn {
            name: instance.name.clone(),
            reason: "supervisor is shut down".to_string(),
        })?;

        self.instances
            .lock()
            .insert(instance.name.clone(), InstanceStatus::new(&instance.name));
        let running = self.launch(&instance, env, &guard)?;

        let supervisor = Arc::clone(self);
        let env = env.clone();
        tokio::spawn(async move { supervisor.police(instance, env, running, guard).await });
        Ok(())
    }

    /// Spawn the process plus its two output pumps and its wait task.
    fn launch(self: &Arc<Self>, instance: &Instance, env: &Env, guard: &TaskGuard) -> Result<Running> {
        match self.spawn_process(instance, env, guard) {
            Ok(running) => Ok(running),
            Err(e) => {
                self.output.error(&e.to_string());
                self.set_state(&instance.name, InstanceState::Failed);
                self.output
                    .system(&format!("teardown cause: failed to start {}", instance.name));
                self.teardown.fall();
                Err(e)
            }
        }
    }

    fn spawn_process(
        self: &Arc<Self>,
        instance: &Instance,
        env: &Env,
        guard: &TaskGuard,
    ) -> Result<Running> {
        let mut env = env.clone();
        let port = match base_port(self.config.base_port, &env)? {
            Some(base) => Some(instance_port(base, instance.index).ok_or_else(
                || Error::Spawn {
                    name: instance.name.clone(),
                    reason: format!("no valid port for entry {} above base port {}", instance.index, base),
                },
            )?),
            None => None,
        };

        match port {
            Some(port) => {
                env.insert("PORT", port.to_string());
                self.output
                    .system(&format!("starting {} on port {}", instance.name, port));
            }
            None => self.output.system(&format!("starting {}", instance.name)),
        }

        self.set_state(&instance.name, InstanceState::Starting);
        let mut process = Process::new(&self.config.workdir, &instance.command, env, false);
        let streams = process.start().map_err(|e| match e {
            Error::Spawn { reason, .. } => Error::Spawn {
                name: instance.name.clone(),
                reason,
            },
            other => other,
        })?;
        let process = Arc::new(process);

        {
            let mut instances = self.instances.lock();
            if let Some(status) = instances.get_mut(&instance.name) {
                status.state = InstanceState::Running;
                status.pid = process.pid();
            }
        }
        debug!(instance = %instance.name, pid = ?process.pid(), "Instance running");

        let stdout = self.spawn_pump(instance, streams.stdout, guard.clone());
        let stderr = self.spawn_pump(instance, streams.stderr, guard.clone());

        let finished = Arc::new(Barrier::new());
        let supervisor = Arc::clone(self);
        let name = instance.name.clone();
        let waited = Arc::clone(&process);
        let done = Arc::clone(&finished);
        let guard = guard.clone();
        tokio::spawn(async move {
            let _guard = guard;
            for pump in [stdout, stderr] {
                if let Err(e) = pump.await {
                    warn!(instance = %name, error = %e, "Output pump task failed");
                }
            }
            match waited.wait().await {
                Ok(status) => {
                    supervisor.output.system(&format!("{} {}", name, status));
                    supervisor.record_exit(&name, status);
                }
                Err(e) => supervisor
                    .output
                    .error(&format!("failed to wait for {}: {}", name, e)),
            }
            done.fall();
        });

        Ok(Running { process, finished })
    }

    fn spawn_pump<R>(self: &Arc<Self>, instance: &Instance, reader: R, guard: TaskGuard) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let supervisor = Arc::clone(self);
        let name = instance.name.clone();
        let index = instance.index;
        tokio::spawn(async move {
            let _guard = guard;
            let shipper = supervisor.shipper.as_ref();
            let job = supervisor.config.log_job.as_str();
            let result = supervisor
                .output
                .pump(&name, index, reader, |line| {
                    if let Some(shipper) = shipper {
                        shipper.send(job, &name, line);
                    }
                })
                .await;
            if let Err(e) = result {
                warn!(instance = %name, error = %e, "Failed to read process output");
            }
        })
    }

    /// Apply the restart policy until the instance is done for good.
    async fn police(self: Arc<Self>, instance: Instance, env: Env, mut running: Running, guard: TaskGuard) {
        loop {
            let mut finished = running.finished.watch();
            let mut teardown = self.teardown.watch();

            tokio::select! {
                biased;
                _ = finished.wait() => {
                    if self.teardown.has_fallen() {
                        return;
                    }
                    if !self.config.restart {
                        self.output.system(&format!(
                            "teardown cause: {} finished (restart disabled)",
                            instance.name
                        ));
                        self.teardown.fall();
                        return;
                    }

                    self.output
                        .system(&format!("restart policy: restarting {}", instance.name));
                    {
                        let mut instances = self.instances.lock();
                        if let Some(status) = instances.get_mut(&instance.name) {
                            status.state = InstanceState::Restarting;
                            status.restarts += 1;
                        }
                    }
                    match self.launch(&instance, &env, &guard) {
                        Ok(next) => running = next,
                        Err(_) => return,
                    }
                }
                _ = teardown.wait() => {
                    self.stop(&instance, &running).await;
                    return;
                }
            }
        }
    }

    /// Teardown path: SIGTERM now, SIGKILL once `teardown_now` falls.
    async fn stop(&self, instance: &Instance, running: &Running) {
        self.set_state(&instance.name, InstanceState::Stopping);
        self.output
            .system(&format!("sending SIGTERM to {}", instance.name));
        self.deliver(&instance.name, &running.process, Signal::SIGTERM);

        let mut finished = running.finished.watch();
        let mut now = self.teardown_now.watch();
        tokio::select! {
            biased;
            _ = finished.wait() => {}
            _ = now.wait() => {
                self.output.system(&format!("Killing {}", instance.name));
                self.deliver(&instance.name, &running.process, Signal::SIGKILL);
                finished.wait().await;
            }
        }
        self.set_state(&instance.name, InstanceState::Stopped);
    }

    /// Send `sig`, reporting failures unless the process has already exited.
    fn deliver(&self, name: &str, process: &Process, sig: Signal) {
        if let Err(e) = process.signal(sig) {
            if process.exit_status().is_some() {
                debug!(instance = %name, signal = %sig, error = %e, "Process already exited");
            } else {
                warn!(instance = %name, signal = %sig, error = %e, "Failed to deliver signal");
                self.output.error(&format!("{}: {}", name, e));
            }
        }
    }

    fn record_exit(&self, name: &str, status: ExitStatus) {
        let mut instances = self.instances.lock();
        if let Some(entry) = instances.get_mut(name) {
            entry.state = if status.signal.is_some() {
                InstanceState::Signaled
            } else {
                InstanceState::Exited
            };
            entry.pid = None;
            entry.last_exit = Some(status);
        }
    }

    fn set_state(&self, name: &str, state: InstanceState) {
        let mut instances = self.instances.lock();
        if let Some(entry) = instances.get_mut(name) {
            debug!(instance = %name, from = %entry.state, to = %state, "Instance state change");
            entry.state = state;
        }
    }

    fn task_guard(&self) -> Option<TaskGuard> {
        self.tasks.lock().as_ref().map(|tx| TaskGuard(tx.clone()))
    }

    async fn wait_for_tasks(&self) {
        drop(self.tasks.lock().take());
        let mut done = self.tasks_done.lock().await;
        // Only closes once every guard is gone
        let _ = done.recv().await;
    }
}

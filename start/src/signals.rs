//! Signal handling for the supervisor.

use crate::barrier::Barrier;
use crate::error::Result;
use crate::output::OutputMux;
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::info;

/// Turns termination signals into teardown.
///
/// The first signal falls `teardown`; any later one also falls
/// `teardown_now`.
pub struct SignalMonitor {
    teardown: Arc<Barrier>,
    teardown_now: Arc<Barrier>,
    output: Arc<OutputMux>,
    sigint: Signal,
    sigterm: Signal,
    sighup: Signal,
    sigalrm: Signal,
}

impl SignalMonitor {
    /// Register handlers now, so signals arriving before [`run`](Self::run)
    /// is polled are not lost.
    pub fn install(
        teardown: Arc<Barrier>,
        teardown_now: Arc<Barrier>,
        output: Arc<OutputMux>,
    ) -> Result<Self> {
        Ok(Self {
            teardown,
            teardown_now,
            output,
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sighup: signal(SignalKind::hangup())?,
            sigalrm: signal(SignalKind::alarm())?,
        })
    }

    /// Handle signals until the process exits.
    pub async fn run(mut self) {
        let mut received = 0u32;
        loop {
            let name = tokio::select! {
                Some(()) = self.sigint.recv() => {
                    self.output.system("ctrl-c detected");
                    "SIGINT"
                }
                Some(()) = self.sigterm.recv() => "SIGTERM",
                Some(()) = self.sighup.recv() => "SIGHUP",
                Some(()) = self.sigalrm.recv() => "SIGALRM",
                else => return,
            };

            received += 1;
            info!(signal = name, count = received, "Received signal");
            if received == 1 {
                self.output
                    .system(&format!("teardown cause: received {}", name));
            } else {
                self.output
                    .system(&format!("received {} again, killing all processes", name));
                self.teardown_now.fall();
            }
            self.teardown.fall();
        }
    }
}

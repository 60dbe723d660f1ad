//! Mango process supervisor.
//!
//! This crate runs the processes declared in a Procfile as one unit:
//!
//! - Every instance runs through `sh -c` in its own process group
//! - All output is merged into one stream, one whole line at a time
//! - Exited instances are restarted, or bring everything else down
//! - Shutdown sends SIGTERM, then SIGKILL once a grace period expires
//!
//! # Architecture
//!
//! - **Barrier**: one-shot broadcast event that drives teardown
//! - **Process**: a single spawned command and its signals
//! - **OutputMux**: prefixes and serializes every output line
//! - **Supervisor**: starts instances, applies the restart policy, tears down
//! - **LokiClient**: optional batching log shipper
//!
//! # Example
//!
//! ```no_run
//! use config::{Concurrency, Env, Procfile};
//! use mango_start::{OutputMux, Supervisor, SupervisorConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let procfile = Procfile::parse("web: python -m http.server $PORT")?;
//!     let mut config = SupervisorConfig::new(".");
//!     config.base_port = Some(5000);
//!
//!     let output = Arc::new(OutputMux::stdout());
//!     let supervisor = Supervisor::new(config, output, None);
//!     let _signals = supervisor.monitor_signals()?;
//!     supervisor
//!         .run_all(&procfile, &Concurrency::default(), &Env::new(), None)
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod barrier;
pub mod error;
pub mod instance;
pub mod output;
pub mod process;
pub mod shipper;
pub mod signals;
pub mod supervisor;

// Re-export main types
pub use barrier::{Barrier, Fallen};
pub use error::{Error, Result};
pub use instance::{base_port, instance_port, Instance, InstanceState, InstanceStatus};
pub use output::{MemorySink, OutputMux, SYSTEM_NAME};
pub use process::{ExitStatus, OutputStreams, Process};
pub use shipper::{LogShipper, LokiClient};
pub use signals::SignalMonitor;
pub use supervisor::{Supervisor, SupervisorConfig};

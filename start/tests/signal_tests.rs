//! Tests for signal-driven teardown
//!
//! Signals are process-wide, so everything runs in a single test.

use mango_start::{Barrier, MemorySink, OutputMux, SignalMonitor};
use nix::sys::signal::{raise, Signal};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_repeated_signals_escalate() {
    let sink = MemorySink::new();
    let output = Arc::new(OutputMux::new(sink.clone()));
    let teardown = Arc::new(Barrier::new());
    let teardown_now = Arc::new(Barrier::new());

    let monitor = SignalMonitor::install(
        Arc::clone(&teardown),
        Arc::clone(&teardown_now),
        Arc::clone(&output),
    )
    .unwrap();
    let handle = tokio::spawn(monitor.run());

    raise(Signal::SIGINT).unwrap();
    tokio::time::timeout(Duration::from_secs(5), teardown.wait())
        .await
        .expect("first signal did not start teardown");
    assert!(!teardown_now.has_fallen());

    raise(Signal::SIGHUP).unwrap();
    tokio::time::timeout(Duration::from_secs(5), teardown_now.wait())
        .await
        .expect("second signal did not force teardown");

    let contents = sink.contents();
    assert!(contents.contains("ctrl-c detected"));
    assert!(contents.contains("teardown cause: received SIGINT"));
    assert!(contents.contains("received SIGHUP again, killing all processes"));

    handle.abort();
}

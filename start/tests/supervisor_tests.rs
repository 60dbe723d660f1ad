//! Tests for the supervisor: restart policy, teardown and output routing

use config::{Concurrency, Env, Procfile};
use mango_start::{
    InstanceState, LogShipper, MemorySink, OutputMux, Supervisor, SupervisorConfig,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Create a supervisor writing into memory
fn create_supervisor(
    dir: &Path,
    restart: bool,
    grace: Duration,
) -> (Arc<Supervisor>, MemorySink) {
    let sink = MemorySink::new();
    let output = Arc::new(OutputMux::new(sink.clone()).with_padding(10));
    let mut config = SupervisorConfig::new(dir);
    config.restart = restart;
    config.grace_period = grace;
    (Supervisor::new(config, output, None), sink)
}

/// Run every entry of `procfile` and wait for teardown to finish
async fn run(supervisor: &Arc<Supervisor>, procfile: &str, concurrency: &str, only: Option<&str>) {
    let procfile = Procfile::parse(procfile).unwrap();
    let concurrency = Concurrency::parse(concurrency).unwrap();
    tokio::time::timeout(
        Duration::from_secs(20),
        supervisor.run_all(&procfile, &concurrency, &Env::new(), only),
    )
    .await
    .expect("supervisor did not finish");
}

/// Messages written under `name`
fn messages(sink: &MemorySink, name: &str) -> Vec<String> {
    sink.lines()
        .iter()
        .filter_map(|line| {
            let (who, message) = line.get(9..)?.split_once(" | ")?;
            (who.trim() == name).then(|| message.to_string())
        })
        .collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

mod restart_policy {
    use super::*;

    #[tokio::test]
    async fn test_restart_keeps_running_without_teardown() {
        let dir = TempDir::new().unwrap();
        let (supervisor, sink) = create_supervisor(dir.path(), true, Duration::from_secs(1));

        let runner = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { run(&supervisor, "flaky: echo tick; exit 1", "", None).await })
        };

        wait_until(|| {
            supervisor
                .status("flaky")
                .map(|s| s.restarts >= 3)
                .unwrap_or(false)
        })
        .await;
        assert!(!supervisor.teardown().has_fallen());
        assert!(messages(&sink, "flaky").iter().filter(|m| *m == "tick").count() >= 3);
        assert!(messages(&sink, "mango")
            .iter()
            .any(|m| m == "restart policy: restarting flaky"));

        supervisor.teardown().fall();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_without_restart_tears_down_siblings() {
        let dir = TempDir::new().unwrap();
        let (supervisor, sink) = create_supervisor(dir.path(), false, Duration::from_secs(5));
        let procfile = "server: while :; do sleep 0.1; done\nquick: exit 0\n";

        let started = Instant::now();
        run(&supervisor, procfile, "", None).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let system = messages(&sink, "mango");
        assert!(system
            .iter()
            .any(|m| m == "teardown cause: quick finished (restart disabled)"));
        assert!(system.iter().any(|m| m == "sending SIGTERM to server"));
        assert!(system.iter().any(|m| m == "quick exit code: 0"));
        assert!(!system.iter().any(|m| m == "Grace time expired"));

        let server = supervisor.status("server").unwrap();
        assert_eq!(server.state, InstanceState::Stopped);
        assert_eq!(server.last_exit.and_then(|s| s.signal), Some(15));
    }
}

mod teardown {
    use super::*;

    #[tokio::test]
    async fn test_grace_period_escalates_to_sigkill() {
        let dir = TempDir::new().unwrap();
        let grace = Duration::from_millis(500);
        let (supervisor, sink) = create_supervisor(dir.path(), false, grace);

        let runner = {
            let supervisor = Arc::clone(&supervisor);
            let procfile = "stubborn: trap '' TERM; echo ready; while :; do sleep 0.1; done";
            tokio::spawn(async move { run(&supervisor, procfile, "", None).await })
        };

        wait_until(|| messages(&sink, "stubborn").iter().any(|m| m == "ready")).await;
        let started = Instant::now();
        supervisor.teardown().fall();
        runner.await.unwrap();

        assert!(started.elapsed() >= grace - Duration::from_millis(50));
        assert!(supervisor.teardown_now().has_fallen());

        let system = messages(&sink, "mango");
        let expired = system.iter().position(|m| m == "Grace time expired").unwrap();
        let killing = system.iter().position(|m| m == "Killing stubborn").unwrap();
        assert!(expired < killing);
        assert!(system.iter().any(|m| m == "stubborn exit signal: SIGKILL"));
    }

    #[tokio::test]
    async fn test_teardown_now_implies_teardown() {
        let dir = TempDir::new().unwrap();
        let (supervisor, _sink) = create_supervisor(dir.path(), false, Duration::from_secs(60));
        supervisor.teardown_now().fall();
        assert!(supervisor.teardown().has_fallen());
    }

    #[tokio::test]
    async fn test_start_failure_triggers_teardown() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let (supervisor, sink) = create_supervisor(&missing, true, Duration::from_secs(1));

        run(&supervisor, "web: echo never", "", None).await;

        assert!(supervisor.teardown().has_fallen());
        assert_eq!(supervisor.status("web").unwrap().state, InstanceState::Failed);
        assert!(messages(&sink, "mango")
            .iter()
            .any(|m| m.starts_with("ERROR: Failed to start web")));
    }
}

mod instances {
    use super::*;

    #[tokio::test]
    async fn test_nothing_to_run_tears_down() {
        let dir = TempDir::new().unwrap();
        let (supervisor, sink) = create_supervisor(dir.path(), false, Duration::from_secs(60));

        let started = Instant::now();
        run(&supervisor, "web: echo never\nworker: echo never\n", "all=0", None).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        assert!(supervisor.teardown().has_fallen());
        assert!(supervisor.statuses().is_empty());
        assert_eq!(
            messages(&sink, "mango"),
            vec!["teardown cause: no processes to run"]
        );
    }

    #[tokio::test]
    async fn test_instances_of_an_entry_share_its_port() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let output = Arc::new(OutputMux::new(sink.clone()));
        let mut config = SupervisorConfig::new(dir.path());
        config.base_port = Some(5000);
        let supervisor = Supervisor::new(config, output, None);

        run(
            &supervisor,
            "web: echo port=$PORT; sleep 1\napi: echo port=$PORT; sleep 1\n",
            "web=3",
            None,
        )
        .await;

        assert_eq!(messages(&sink, "web.1"), vec!["port=5000"]);
        assert_eq!(messages(&sink, "web.2"), vec!["port=5000"]);
        assert_eq!(messages(&sink, "web.3"), vec!["port=5000"]);
        assert_eq!(messages(&sink, "api"), vec!["port=5100"]);
        assert!(messages(&sink, "mango")
            .iter()
            .any(|m| m == "starting web.3 on port 5000"));
    }

    #[tokio::test]
    async fn test_single_process_filter() {
        let dir = TempDir::new().unwrap();
        let (supervisor, sink) = create_supervisor(dir.path(), false, Duration::from_secs(1));

        run(&supervisor, "web: echo web\nworker: echo worker\n", "", Some("worker")).await;

        let names: Vec<String> = supervisor.statuses().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["worker"]);
        assert!(messages(&sink, "web").is_empty());
        assert_eq!(messages(&sink, "worker"), vec!["worker"]);
    }

    #[tokio::test]
    async fn test_runs_in_workdir_and_captures_stderr() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker"), "here\n").unwrap();
        let (supervisor, sink) = create_supervisor(dir.path(), false, Duration::from_secs(1));

        run(&supervisor, "cat: cat marker; echo oops >&2", "", None).await;

        let lines = messages(&sink, "cat");
        assert!(lines.contains(&"here".to_string()));
        assert!(lines.contains(&"oops".to_string()));
    }
}

mod shipping {
    use super::*;

    #[derive(Default)]
    struct RecordingShipper {
        lines: Mutex<Vec<(String, String, String)>>,
    }

    impl LogShipper for RecordingShipper {
        fn send(&self, job: &str, stream: &str, line: &str) {
            self.lines
                .lock()
                .push((job.to_string(), stream.to_string(), line.to_string()));
        }
    }

    #[tokio::test]
    async fn test_output_is_teed_to_shipper() {
        let dir = TempDir::new().unwrap();
        let shipper = Arc::new(RecordingShipper::default());
        let mut config = SupervisorConfig::new(dir.path());
        config.log_job = "ci".to_string();
        let output = Arc::new(OutputMux::new(MemorySink::new()));
        let tee: Arc<dyn LogShipper> = shipper.clone();
        let supervisor = Supervisor::new(config, output, Some(tee));

        run(&supervisor, "web: echo hello", "", None).await;

        let lines = shipper.lines.lock().clone();
        assert_eq!(
            lines,
            vec![("ci".to_string(), "web".to_string(), "hello".to_string())]
        );
    }
}

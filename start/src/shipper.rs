//! Remote log shipping.
//!
//! Output lines can be copied to a Loki instance. Shipping is best effort:
//! [`LogShipper::send`] only appends to an in-memory batch, and a background
//! worker pushes batches on a timer or when one fills up. Push failures are
//! logged and the batch is dropped; nothing is reported back to the pumps.

use crate::error::{Error, Result};
use chrono::Utc;
use config::ConfigError;
use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Path appended to an endpoint given without one.
pub const LOKI_PUSH_PATH: &str = "/loki/api/v1/push";

/// HTTP timeout used by the CLI.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Batch interval used by the CLI.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Batch size used by the CLI.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Fire-and-forget sink for output lines.
pub trait LogShipper: Send + Sync {
    /// Queue one line. Must not block on I/O.
    fn send(&self, job: &str, stream: &str, line: &str);
}

#[derive(Debug, Serialize)]
struct PushRequest {
    streams: Vec<PushStream>,
}

#[derive(Debug, Serialize)]
struct PushStream {
    stream: BTreeMap<&'static str, String>,
    values: Vec<[String; 2]>,
}

impl PushStream {
    fn new(job: &str, stream: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("job", job.to_string());
        labels.insert("stream", stream.to_string());
        Self {
            stream: labels,
            values: Vec::new(),
        }
    }
}

struct Inner {
    endpoint: Url,
    http: reqwest::Client,
    batch_size: usize,
    streams: Mutex<HashMap<(String, String), PushStream>>,
    wake: Notify,
}

impl Inner {
    async fn flush(&self) {
        let streams: Vec<PushStream> = {
            let mut pending = self.streams.lock();
            pending.drain().map(|(_, stream)| stream).collect()
        };
        if streams.is_empty() {
            return;
        }

        let lines: usize = streams.iter().map(|s| s.values.len()).sum();
        let request = PushRequest { streams };
        match self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(lines = lines, "Pushed log batch to Loki");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), lines = lines, "Unexpected status from Loki");
            }
            Err(e) => {
                warn!(error = %e, lines = lines, "Failed to push log batch to Loki");
            }
        }
    }
}

/// Batching Loki push client.
pub struct LokiClient {
    inner: Arc<Inner>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LokiClient {
    /// Create a client and start its background worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        batch_interval: Duration,
        batch_size: usize,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            endpoint: push_url(endpoint)?,
            http: reqwest::Client::builder().timeout(timeout).build()?,
            batch_size: batch_size.max(1),
            streams: Mutex::new(HashMap::new()),
            wake: Notify::new(),
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = tokio::spawn(run_worker(Arc::clone(&inner), batch_interval, stop_rx));

        Ok(Self {
            inner,
            stop: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Push URL in use.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Push whatever is buffered now.
    pub async fn flush(&self) {
        self.inner.flush().await
    }

    /// Poll `/ready` until Loki answers 200 OK.
    pub async fn wait_ready(&self, max_retries: u32, interval: Duration) -> Result<()> {
        let mut ready = self.inner.endpoint.clone();
        ready.set_path("/ready");
        ready.set_query(None);

        for attempt in 1..=max_retries {
            match self
                .inner
                .http
                .get(ready.clone())
                .timeout(interval)
                .send()
                .await
            {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => return Ok(()),
                Ok(resp) => debug!(attempt = attempt, status = %resp.status(), "Loki not ready"),
                Err(e) => debug!(attempt = attempt, error = %e, "Loki not ready"),
            }
            tokio::time::sleep(interval).await;
        }

        Err(Error::LokiNotReady {
            url: ready.to_string(),
            attempts: max_retries,
        })
    }

    /// Stop the worker after a final flush.
    pub async fn close(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Loki worker failed");
            }
        }
    }
}

impl LogShipper for LokiClient {
    fn send(&self, job: &str, stream: &str, line: &str) {
        let ts = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();

        let full = {
            let mut streams = self.inner.streams.lock();
            let entry = streams
                .entry((job.to_string(), stream.to_string()))
                .or_insert_with(|| PushStream::new(job, stream));
            entry.values.push([ts, line.to_string()]);
            entry.values.len() >= self.inner.batch_size
        };

        if full {
            self.inner.wake.notify_one();
        }
    }
}

async fn run_worker(inner: Arc<Inner>, batch_interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(batch_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => inner.flush().await,
            _ = inner.wake.notified() => inner.flush().await,
            _ = &mut stop => {
                inner.flush().await;
                return;
            }
        }
    }
}

/// Resolve the push URL, appending the standard push path when none is given.
pub fn push_url(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| ConfigError::Invalid(format!("loki url {:?}: {}", endpoint, e)))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(LOKI_PUSH_PATH);
    }
    Ok(url)
}

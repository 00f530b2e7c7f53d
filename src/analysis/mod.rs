//! Background hash reputation lookups for collected executables.
//!
//! [`AnalysisQueue`] accepts file info records without ever blocking the
//! collection. Worker threads look the MD5 of each PE record up through a
//! [`ReputationLookup`] and append one JSON line per record to the results
//! file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime};

use crate::constants::{
    ANALYSIS_BUFFER_SIZE, ANALYSIS_WORKERS, LOOKUP_RETRY_DELAY_MS, MAX_LOOKUP_RETRIES,
    PE_MIME_TYPES,
};

pub mod opentip;

pub use self::opentip::OpenTipClient;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LookupError {
    #[error("API key is not set")]
    MissingApiKey,

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("status {0}")]
    Status(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

/// Reputation of a hash as reported by the lookup service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HashReputation {
    #[serde(rename = "Zone", default)]
    pub zone: String,
    #[serde(rename = "DetectionName", default)]
    pub detection_name: String,
    #[serde(rename = "LastDetectDate", default)]
    pub last_detect_date: String,
}

#[async_trait]
pub trait ReputationLookup: Send + Sync {
    async fn lookup_hash(&self, md5: &str) -> Result<HashReputation, LookupError>;
}

/// One line of the analysis results file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    pub zone: String,
    pub path: String,
    pub md5: String,
    pub detection_name: String,
    pub last_detect_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub buffer_size: usize,
    pub workers: usize,
    /// Base delay between retries; attempt `n` sleeps `n` times this.
    pub retry_delay: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            buffer_size: ANALYSIS_BUFFER_SIZE,
            workers: ANALYSIS_WORKERS,
            retry_delay: Duration::from_millis(LOOKUP_RETRY_DELAY_MS),
        }
    }
}

pub struct AnalysisQueue {
    sender: Option<Sender<Value>>,
    workers: Vec<JoinHandle<()>>,
    results: Arc<Mutex<File>>,
    runtime: Option<Runtime>,
}

impl AnalysisQueue {
    /// Opens the results file for appending and starts the workers.
    pub fn new(
        client: Arc<dyn ReputationLookup>,
        config: AnalysisConfig,
        results_path: &Path,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(results_path)
            .with_context(|| format!("Failed to open analysis results {}", results_path.display()))?;
        let results = Arc::new(Mutex::new(file));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("Failed to start analysis runtime")?;

        let (sender, receiver) = bounded(config.buffer_size);
        let mut workers = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let worker = Worker {
                receiver: receiver.clone(),
                client: Arc::clone(&client),
                results: Arc::clone(&results),
                handle: runtime.handle().clone(),
                retry_delay: config.retry_delay,
            };
            let handle = thread::Builder::new()
                .name(format!("analysis-{}", i))
                .spawn(move || worker.run())
                .context("Failed to spawn analysis worker")?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
            results,
            runtime: Some(runtime),
        })
    }

    /// Queues a file info record without blocking.
    ///
    /// Returns `false` when the record was dropped because the queue is full
    /// or already closed.
    pub fn enqueue(&self, record: Value) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                warn!(
                    "Analysis queue full, dropping artifact with hash {}",
                    record_md5(&record).unwrap_or("<none>")
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Stops accepting records, waits for the workers and flushes the results.
    pub fn close(&mut self) -> Result<()> {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Analysis worker panicked");
            }
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .flush()
            .context("Failed to flush analysis results")
    }
}

impl Drop for AnalysisQueue {
    fn drop(&mut self) {
        if self.sender.is_some() {
            if let Err(e) = self.close() {
                warn!("{:#}", e);
            }
        }
    }
}

struct Worker {
    receiver: Receiver<Value>,
    client: Arc<dyn ReputationLookup>,
    results: Arc<Mutex<File>>,
    handle: Handle,
    retry_delay: Duration,
}

impl Worker {
    fn run(self) {
        while let Ok(record) = self.receiver.recv() {
            let Some(md5) = record_md5(&record) else {
                continue;
            };
            let mime = record["file"]["mime_type"].as_str().unwrap_or_default();
            if md5.is_empty() || !PE_MIME_TYPES.contains(&mime) {
                continue;
            }

            let mut result = AnalysisResult {
                path: record["file"]["path"].as_str().unwrap_or_default().to_string(),
                md5: md5.to_string(),
                ..Default::default()
            };
            match self.lookup(md5) {
                Ok(reputation) => {
                    result.zone = reputation.zone;
                    result.detection_name = reputation.detection_name;
                    result.last_detect_date = reputation.last_detect_date;
                }
                Err(e) => {
                    error!("Lookup error for {}: {}", md5, e);
                    result.error = Some(e.to_string());
                }
            }
            self.write(&result);
        }
    }

    fn lookup(&self, md5: &str) -> Result<HashReputation, LookupError> {
        let mut attempt = 1;
        loop {
            match self.handle.block_on(self.client.lookup_hash(md5)) {
                Err(LookupError::Timeout) if attempt < MAX_LOOKUP_RETRIES => {
                    warn!("Timeout on attempt {} for {}, retrying...", attempt, md5);
                    thread::sleep(self.retry_delay * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn write(&self, result: &AnalysisResult) {
        let line = match serde_json::to_string(result) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to marshal result: {}", e);
                return;
            }
        };
        let mut file = self.results.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{}", line) {
            error!("Failed to write result: {}", e);
        } else {
            debug!("Analysis result for {}: {}", result.md5, line);
        }
    }
}

fn record_md5(record: &Value) -> Option<&str> {
    record["file"]["hash"]["md5"].as_str()
}

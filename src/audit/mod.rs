//! Audit trail: one record per request, to the console and a rolling file.
//!
//! # Sinks
//!
//! - **Console**: a `tracing` event on target `audit` (`info!` for admitted,
//!   `error!` for rejected) through the process-wide subscriber.
//! - **File**: one JSON line per record. Records are serialized on the request
//!   task and handed whole to a bounded channel; a blocking writer task owns
//!   the [`RollingFile`] and is the only code that touches the disk.
//!
//! # Failures
//!
//! Nothing here ever fails a request. A full channel, a closed writer, or a
//! disk error increments [`AuditLogger::failures`], bumps
//! `gateway_audit_failures_total` and emits a `warn!`.

pub mod record;
pub mod rotation;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::metrics;

pub use record::{AuditLevel, AuditOutcome, AuditRecord};
pub use rotation::RollingFile;

/// Internal audit failures. Counted and logged, never returned to clients.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit channel is full")]
    ChannelFull,

    #[error("audit writer has stopped")]
    ChannelClosed,
}

impl AuditError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Serialize(_) => "serialize",
            Self::ChannelFull => "channel_full",
            Self::ChannelClosed => "channel_closed",
        }
    }
}

/// File sink settings.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub log_directory: PathBuf,
    pub retention_days: u32,
    pub max_file_size_bytes: u64,
    pub channel_capacity: usize,
}

impl AuditConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_directory: config.log_directory.clone(),
            retention_days: config.log_retention_days,
            max_file_size_bytes: config.log_max_file_size_bytes(),
            channel_capacity: config.audit_channel_capacity,
        }
    }
}

enum WriterCommand {
    Record(String),
    Shutdown,
}

/// Records admitted and rejected requests.
pub struct AuditLogger {
    sender: mpsc::Sender<WriterCommand>,
    writer: Mutex<Option<JoinHandle<()>>>,
    admitted: AtomicU64,
    rejected: AtomicU64,
    failures: Arc<AtomicU64>,
}

impl AuditLogger {
    /// Open the log directory and start the file writer.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Io` if the log directory cannot be created or scanned.
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        let file = RollingFile::open(
            &config.log_directory,
            config.max_file_size_bytes,
            config.retention_days,
        )?;
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let failures = Arc::new(AtomicU64::new(0));

        let writer_failures = failures.clone();
        let writer = tokio::task::spawn_blocking(move || run_writer(file, receiver, &writer_failures));

        info!(
            directory = %config.log_directory.display(),
            retention_days = config.retention_days,
            max_file_size_bytes = config.max_file_size_bytes,
            "Audit log writer started"
        );

        Ok(Self {
            sender,
            writer: Mutex::new(Some(writer)),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failures,
        })
    }

    /// Record a request that was forwarded and answered by the upstream.
    pub fn record_admitted(&self, mut record: AuditRecord) {
        record.mark(AuditOutcome::Admitted);
        self.admitted.fetch_add(1, Ordering::Relaxed);

        info!(
            target: "audit",
            method = %record.method,
            path = %record.path,
            status = record.status_code,
            latency_ms = record.latency_ms,
            client = %record.client_identity,
            request_id = record.request_id.as_deref().unwrap_or("-"),
            "{}", record.message
        );
        self.enqueue(&record);
    }

    /// Record a request that was refused or failed.
    ///
    /// Refused covers invalid input, rate limiting and store failures. Failed
    /// covers requests the limiter admitted but the upstream never answered
    /// (502/504) and requests the client abandoned (499).
    pub fn record_rejected(&self, mut record: AuditRecord) {
        record.mark(AuditOutcome::Rejected);
        self.rejected.fetch_add(1, Ordering::Relaxed);

        error!(
            target: "audit",
            method = %record.method,
            path = %record.path,
            status = record.status_code,
            latency_ms = record.latency_ms,
            client = %record.client_identity,
            request_id = record.request_id.as_deref().unwrap_or("-"),
            response = %record.response_summary,
            "{}", record.message
        );
        self.enqueue(&record);
    }

    /// Records accepted as admitted since start.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Records accepted as rejected since start.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Records that could not be written to the file sink.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Stop the writer after it drains every queued record.
    ///
    /// Records submitted after shutdown are counted as failures.
    pub async fn shutdown(&self) {
        let Some(writer) = self.writer.lock().await.take() else {
            return;
        };

        if self.sender.send(WriterCommand::Shutdown).await.is_err() {
            warn!("Audit writer stopped before shutdown");
        }
        if let Err(e) = writer.await {
            error!(error = %e, "Audit writer task failed");
        }
        info!(
            admitted = self.admitted(),
            rejected = self.rejected(),
            failures = self.failures(),
            "Audit log writer stopped"
        );
    }

    fn enqueue(&self, record: &AuditRecord) {
        let result = serde_json::to_string(record)
            .map_err(AuditError::from)
            .and_then(|line| {
                self.sender
                    .try_send(WriterCommand::Record(line))
                    .map_err(|e| match e {
                        mpsc::error::TrySendError::Full(_) => AuditError::ChannelFull,
                        mpsc::error::TrySendError::Closed(_) => AuditError::ChannelClosed,
                    })
            });

        if let Err(e) = result {
            note_failure(&self.failures, &e);
        }
    }
}

fn note_failure(failures: &AtomicU64, error: &AuditError) {
    failures.fetch_add(1, Ordering::Relaxed);
    metrics::record_audit_failure(error.kind());
    warn!(error = %error, "Audit record not written");
}

fn run_writer(mut file: RollingFile, mut receiver: mpsc::Receiver<WriterCommand>, failures: &AtomicU64) {
    while let Some(command) = receiver.blocking_recv() {
        match command {
            WriterCommand::Record(line) => {
                if let Err(e) = file.write_line(&line) {
                    note_failure(failures, &AuditError::Io(e));
                }
            }
            WriterCommand::Shutdown => break,
        }
    }

    // Anything still queued behind the shutdown marker
    receiver.close();
    while let Ok(command) = receiver.try_recv() {
        if let WriterCommand::Record(line) = command
            && let Err(e) = file.write_line(&line)
        {
            note_failure(failures, &AuditError::Io(e));
        }
    }

    if let Err(e) = file.flush() {
        note_failure(failures, &AuditError::Io(e));
    }
}

//! Bridges the audit event stream to the log and, optionally, to a
//! JSON-lines file for external auditors.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quarry_engine::AuditEvent;

#[derive(Serialize)]
struct AuditRecord<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Append-only JSON-lines sink for audit events.
pub struct AuditWriter {
    file: File,
}

impl AuditWriter {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open audit log {}", path.display()))?;
        Ok(Self { file })
    }

    fn record(&mut self, event: &AuditEvent) -> anyhow::Result<()> {
        let record = AuditRecord {
            ts: Utc::now().to_rfc3339(),
            event,
        };
        let line = serde_json::to_string(&record)?;
        writeln!(self.file, "{line}")?;
        Ok(())
    }
}

/// Drain the event stream until every sender is gone, logging each event
/// and appending it to the audit file when one is configured.
pub fn spawn_event_pump(
    mut events: broadcast::Receiver<AuditEvent>,
    mut writer: Option<AuditWriter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    log_event(&event);
                    if let Some(sink) = writer.as_mut() {
                        if let Err(err) = sink.record(&event) {
                            warn!("audit log write failed, disabling it: {err:#}");
                            writer = None;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "audit stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &AuditEvent) {
    match event {
        AuditEvent::Started { workers } => info!(workers, "master started"),
        AuditEvent::StateChanged { pid, from, to } => {
            debug!(pid, ?from, ?to, "worker state changed");
        }
        AuditEvent::ProblemSent {
            pid,
            id,
            kind,
            var,
            nvars,
            len,
        } => debug!(pid, id, kind, var, nvars, len, "problem sent"),
        AuditEvent::ResultReceived {
            pid,
            id,
            failed,
            len,
        } => debug!(pid, id, failed, len, "result received"),
        AuditEvent::CancelRequested { pid } => debug!(pid, "cancellation requested"),
        AuditEvent::Finished { aborted } => info!(aborted, "master finished"),
    }
}

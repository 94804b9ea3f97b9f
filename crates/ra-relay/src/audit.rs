//! Audit sinks
//!
//! Records are append-only. A sink failure is logged and never fails the
//! request that produced the event.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

use ra_core::error::CapabilityError;
use ra_core::traits::{AuditEvent, AuditRecord, AuditSink};

/// Appends one JSON object per line to a file
pub struct JsonlAuditSink {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> std::io::Result<tokio::fs::File> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), CapabilityError> {
        let mut line =
            serde_json::to_string(&record).map_err(|e| CapabilityError::Audit(e.to_string()))?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = self
                .open()
                .await
                .map_err(|e| CapabilityError::Audit(format!("{}: {}", self.path.display(), e)))?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            let written = async {
                file.write_all(line.as_bytes()).await?;
                file.flush().await
            }
            .await;

            if let Err(e) = written {
                // Reopen on the next record
                *guard = None;
                return Err(CapabilityError::Audit(e.to_string()));
            }
        }
        Ok(())
    }
}

/// Emits records as structured log lines
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), CapabilityError> {
        let fields = serde_json::to_string(&record.event).unwrap_or_default();
        tracing::info!(
            target: "ra_relay::audit",
            event = record.event.name(),
            time = record.time,
            "{}",
            fields
        );
        Ok(())
    }
}

/// Keeps records in memory; used by tests
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), CapabilityError> {
        self.records
            .lock()
            .map_err(|_| CapabilityError::Audit("poisoned".to_string()))?
            .push(record);
        Ok(())
    }
}

/// Front end the relay components record through
#[derive(Clone)]
pub struct AuditLog {
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Audit log that records nothing
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub async fn emit(&self, event: AuditEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        let name = event.name();
        if let Err(e) = sink.record(AuditRecord::now(event)).await {
            tracing::warn!("Failed to record audit event {}: {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_core::Role;

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("actions.log");
        let sink = JsonlAuditSink::new(&path);

        sink.record(AuditRecord::now(AuditEvent::ServerStart {
            bind_address: "127.0.0.1:1".to_string(),
        }))
        .await
        .unwrap();
        sink.record(AuditRecord::now(AuditEvent::OperatorLogin {
            user: Some("alice".to_string()),
            role: Role::Admin,
        }))
        .await
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "server_start");
        assert_eq!(lines[1]["event"], "operator_login");
        assert_eq!(lines[1]["role"], "admin");
        assert!(lines[1]["time"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_jsonl_sink_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.log");
        std::fs::write(&path, "{\"event\":\"old\"}\n").unwrap();

        let sink = JsonlAuditSink::new(&path);
        sink.record(AuditRecord::now(AuditEvent::ServerStart {
            bind_address: "x".to_string(),
        }))
        .await
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("{\"event\":\"old\"}"));
    }

    #[tokio::test]
    async fn test_audit_log_disabled_records_nothing() {
        let memory = Arc::new(MemoryAuditSink::new());
        AuditLog::disabled()
            .emit(AuditEvent::ServerStart {
                bind_address: "x".to_string(),
            })
            .await;
        assert!(memory.records().is_empty());

        AuditLog::new(memory.clone())
            .emit(AuditEvent::ServerStart {
                bind_address: "x".to_string(),
            })
            .await;
        assert_eq!(memory.events().len(), 1);
    }
}

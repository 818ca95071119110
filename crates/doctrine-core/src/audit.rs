//! Audit trail of successful enforcements
//!
//! One [`AuditEntry`] per successful enforcement. The sink is optional and
//! best-effort: a failing sink is logged by the enforcer and never turns a
//! successful enforcement into an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::record::{format_timestamp, BaseRecord, ValidationState};

/// Enforcement outcome recorded in the trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Validated,
    Repaired,
}

/// A row of the persisted audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub recorded_at: DateTime<Utc>,
    pub tool: String,
    pub operation: String,
    pub status: AuditStatus,
    pub source_id: String,
    pub process_id: String,
    pub validated: ValidationState,
    pub execution_signature: String,
    pub timestamp_last_touched: String,
    /// `data_payload` serialized as JSON text (`{}` when absent)
    pub data_payload: String,
}

impl AuditEntry {
    pub fn from_record(record: &BaseRecord, tool: &str, operation: &str) -> Self {
        let status = if record.is_repaired() {
            AuditStatus::Repaired
        } else {
            AuditStatus::Validated
        };
        let data_payload = record
            .data_payload()
            .map(|payload| serde_json::Value::Object(payload.clone()).to_string())
            .unwrap_or_else(|| "{}".to_string());

        Self {
            recorded_at: Utc::now(),
            tool: tool.to_string(),
            operation: operation.to_string(),
            status,
            source_id: record.source_id().to_string(),
            process_id: record.process_id().to_string(),
            validated: record.validated(),
            execution_signature: record.execution_signature().to_string(),
            timestamp_last_touched: format_timestamp(&record.timestamp_last_touched()),
            data_payload,
        }
    }
}

/// Destination for audit entries
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<()>;
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    path: PathBuf,
    // Serializes appends so concurrent lines never interleave
    lock: Mutex<()>,
}

impl JsonLinesAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry back, skipping lines that do not parse
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_from_record() {
        let record = BaseRecord::builder("neon-sync", "import")
            .payload(json!({ "rows": 2 }).as_object().cloned().unwrap())
            .build()
            .unwrap();
        let entry = AuditEntry::from_record(&record, "neon-sync", "insert");
        assert_eq!(entry.status, AuditStatus::Validated);
        assert_eq!(entry.data_payload, r#"{"rows":2}"#);
        assert_eq!(entry.execution_signature, record.execution_signature());
        assert_eq!(entry.validated, ValidationState::Flag(false));
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesAuditSink::new(dir.path().join("audit/validation-success.log"));
        let record = BaseRecord::builder("tool", "op").build().unwrap();

        assert!(sink.read_entries().unwrap().is_empty());
        sink.append(&AuditEntry::from_record(&record, "tool", "first")).unwrap();
        sink.append(&AuditEntry::from_record(&record, "tool", "second")).unwrap();

        let entries = sink.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "first");
        assert_eq!(entries[1].data_payload, "{}");
    }
}

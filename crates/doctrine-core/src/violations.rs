//! Violation log
//!
//! Append-only ledger of rejected validation attempts. Entries are sanitized
//! before they are stored and are never mutated afterwards; `clear` is the
//! only way to remove them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::contracts::SchemaKind;
use crate::error::{Result, ViolationReason};

/// Field names stripped from every stored payload
pub const DEFAULT_SENSITIVE_FIELDS: [&str; 3] = ["password", "token", "secret"];

/// Number of entries reported in [`ViolationSummary::recent`]
pub const RECENT_VIOLATIONS: usize = 5;

/// Removes sensitive fields from payloads before storage
///
/// Matching is by exact field name, case-insensitive, at any depth.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    sensitive: Vec<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            sensitive: DEFAULT_SENSITIVE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Extend the default set with additional field names
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            let field = field.as_ref().trim().to_lowercase();
            if !field.is_empty() && !self.sensitive.contains(&field) {
                self.sensitive.push(field);
            }
        }
        self
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        // Nested paths like `data_payload.password` match on their last segment
        let leaf = name.rsplit('.').next().unwrap_or(name).to_lowercase();
        self.sensitive.iter().any(|field| *field == leaf)
    }

    pub fn sanitize(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(key, _)| !self.is_sensitive(key))
                    .map(|(key, value)| (key.clone(), self.sanitize(value)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.sanitize(item)).collect()),
            other => other.clone(),
        }
    }
}

/// A rejected attempt, before it is stored
#[derive(Debug, Clone)]
pub struct Violation {
    pub tool: String,
    pub operation: String,
    pub kind: SchemaKind,
    pub reason: ViolationReason,
    pub payload: Value,
}

impl Violation {
    pub fn new(
        tool: impl Into<String>,
        operation: impl Into<String>,
        kind: SchemaKind,
        reason: ViolationReason,
        payload: Value,
    ) -> Self {
        Self {
            tool: tool.into(),
            operation: operation.into(),
            kind,
            reason,
            payload,
        }
    }
}

/// A stored violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: Uuid,
    /// Monotonic across the life of the log, including across `clear`
    pub sequence: u64,
    pub detected_at: DateTime<Utc>,
    pub tool: String,
    pub operation: String,
    pub kind: SchemaKind,
    /// Human-readable reason
    pub reason: String,
    pub field: String,
    pub rule: String,
    /// Sanitized failing value; null when the failing field is itself sensitive
    pub offending_value: Value,
    /// Sanitized copy of the rejected candidate
    pub payload: Value,
}

/// Aggregate view of the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub total: usize,
    pub by_tool: BTreeMap<String, usize>,
    /// Most recent entries, oldest first
    pub recent: Vec<ViolationRecord>,
}

/// Persisted report written by [`ViolationLog::write_report`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationReport {
    pub timestamp: DateTime<Utc>,
    pub total_violations: usize,
    pub enforcement_enabled: bool,
    pub strict_mode: bool,
    pub violations: Vec<ViolationRecord>,
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<ViolationRecord>,
    next_sequence: u64,
}

/// Thread-safe violation ledger
#[derive(Debug, Default)]
pub struct ViolationLog {
    state: RwLock<LogState>,
    sanitizer: Sanitizer,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sanitizer(sanitizer: Sanitizer) -> Self {
        Self {
            state: RwLock::default(),
            sanitizer,
        }
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    fn read(&self) -> RwLockReadGuard<'_, LogState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sanitize and append a violation, returning the stored entry
    pub fn record(&self, violation: Violation) -> ViolationRecord {
        let field = violation.reason.field().to_string();
        let offending_value = if self.sanitizer.is_sensitive(&field) {
            Value::Null
        } else {
            self.sanitizer.sanitize(violation.reason.value())
        };
        let payload = self.sanitizer.sanitize(&violation.payload);

        let mut state = self.write();
        let entry = ViolationRecord {
            id: Uuid::new_v4(),
            sequence: state.next_sequence,
            detected_at: Utc::now(),
            tool: violation.tool,
            operation: violation.operation,
            kind: violation.kind,
            reason: violation.reason.to_string(),
            field,
            rule: violation.reason.rule().to_string(),
            offending_value,
            payload,
        };
        state.next_sequence += 1;
        state.entries.push(entry.clone());
        drop(state);

        debug!(
            sequence = entry.sequence,
            tool = %entry.tool,
            field = %entry.field,
            rule = %entry.rule,
            "Violation recorded"
        );
        entry
    }

    /// All entries, oldest first
    pub fn list(&self) -> Vec<ViolationRecord> {
        self.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Remove every entry, returning how many were dropped
    pub fn clear(&self) -> usize {
        let removed = std::mem::take(&mut self.write().entries).len();
        info!(removed, "Violation log cleared");
        removed
    }

    pub fn summary(&self) -> ViolationSummary {
        let state = self.read();
        let mut by_tool = BTreeMap::new();
        for entry in &state.entries {
            *by_tool.entry(entry.tool.clone()).or_insert(0) += 1;
        }
        let start = state.entries.len().saturating_sub(RECENT_VIOLATIONS);
        ViolationSummary {
            total: state.entries.len(),
            by_tool,
            recent: state.entries[start..].to_vec(),
        }
    }

    /// Persist a report as `violations-<timestamp>.json` under `dir`
    ///
    /// Returns `None` without touching the filesystem when the log is empty.
    pub fn write_report(&self, dir: &Path, enforcement_enabled: bool, strict_mode: bool) -> Result<Option<PathBuf>> {
        let violations = self.list();
        if violations.is_empty() {
            return Ok(None);
        }

        let timestamp = Utc::now();
        let report = ViolationReport {
            timestamp,
            total_violations: violations.len(),
            enforcement_enabled,
            strict_mode,
            violations,
        };

        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "violations-{}.json",
            timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ")
        ));
        std::fs::write(&path, serde_json::to_vec_pretty(&report)?)?;

        info!(path = %path.display(), total = report.total_violations, "Violation report saved");
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn missing(field: &str) -> ViolationReason {
        ViolationReason::MissingField {
            field: field.to_string(),
        }
    }

    #[test]
    fn test_sanitizer_removes_nested_secrets() {
        let sanitizer = Sanitizer::new();
        let value = json!({
            "user": "ada",
            "Password": "hunter2",
            "nested": { "TOKEN": "abc", "keep": 1 },
            "list": [{ "secret": "s", "ok": true }]
        });
        assert_eq!(
            sanitizer.sanitize(&value),
            json!({
                "user": "ada",
                "nested": { "keep": 1 },
                "list": [{ "ok": true }]
            })
        );
    }

    #[test]
    fn test_sanitizer_extension() {
        let sanitizer = Sanitizer::new().with_fields(["api_key", " "]);
        assert!(sanitizer.is_sensitive("API_KEY"));
        assert!(sanitizer.is_sensitive("data_payload.password"));
        assert!(!sanitizer.is_sensitive("passwords"));
    }

    #[test]
    fn test_record_and_list_in_order() {
        let log = ViolationLog::new();
        for tool in ["a", "b", "c"] {
            log.record(Violation::new(tool, "op", SchemaKind::BASE, missing("source_id"), json!({})));
        }
        let entries = log.list();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.tool.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_record_strips_secrets() {
        let log = ViolationLog::new();
        let entry = log.record(Violation::new(
            "auth",
            "login",
            SchemaKind::BASE,
            ViolationReason::ConstraintViolated {
                field: "password".to_string(),
                constraint: "non_empty".to_string(),
                value: json!("hunter2"),
            },
            json!({ "source_id": "", "password": "hunter2" }),
        ));
        assert_eq!(entry.payload, json!({ "source_id": "" }));
        assert_eq!(entry.offending_value, Value::Null);
        assert!(!serde_json::to_string(&log.list()).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_clear_keeps_sequence_monotonic() {
        let log = ViolationLog::new();
        log.record(Violation::new("a", "op", SchemaKind::BASE, missing("x"), json!({})));
        assert_eq!(log.clear(), 1);
        assert!(log.is_empty());
        let entry = log.record(Violation::new("a", "op", SchemaKind::BASE, missing("x"), json!({})));
        assert_eq!(entry.sequence, 1);
    }

    #[test]
    fn test_summary() {
        let log = ViolationLog::new();
        for i in 0..7 {
            let tool = if i % 2 == 0 { "even" } else { "odd" };
            log.record(Violation::new(tool, format!("op{}", i), SchemaKind::BASE, missing("x"), json!({})));
        }
        let summary = log.summary();
        assert_eq!(summary.total, 7);
        assert_eq!(summary.by_tool["even"], 4);
        assert_eq!(summary.by_tool["odd"], 3);
        assert_eq!(summary.recent.len(), RECENT_VIOLATIONS);
        assert_eq!(summary.recent[0].operation, "op2");
        assert_eq!(summary.recent[4].operation, "op6");
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let log = ViolationLog::new();
        assert!(log.write_report(dir.path(), true, true).unwrap().is_none());

        log.record(Violation::new("a", "op", SchemaKind::BASE, missing("x"), json!({})));
        let path = log.write_report(dir.path(), true, false).unwrap().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("violations-") && name.ends_with(".json"));

        let report: ViolationReport =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(report.total_violations, 1);
        assert!(report.enforcement_enabled);
        assert!(!report.strict_mode);
    }
}

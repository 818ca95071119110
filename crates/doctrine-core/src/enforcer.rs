//! Enforcement facade
//!
//! The [`Enforcer`] ties the validator, the violation log and the formatter
//! together and owns the two mode switches: `enabled` and `strict`.
//!
//! | enabled | strict | invalid candidate                                  |
//! |---------|--------|----------------------------------------------------|
//! | false   | any    | passed through untouched as [`Enforcement::Bypassed`] |
//! | true    | true   | logged, then [`DoctrineError::ContractViolation`]   |
//! | true    | false  | logged, then [`Enforcement::Repaired`]              |
//!
//! An enforcer is an explicit value shared through `Arc`. Code that needs a
//! late-bound shared instance uses [`EnforcerHandle`].

use chrono::Utc;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditSink, JsonLinesAuditSink};
use crate::config::DoctrineConfig;
use crate::contracts::{ContractRegistry, SchemaKind};
use crate::error::{DoctrineError, Result};
use crate::formatter::envelope::{Envelope, WriteTarget};
use crate::formatter::{Formatter, Sink, SinkProjection};
use crate::record::BaseRecord;
use crate::telemetry::DoctrineMetrics;
use crate::validator::Validator;
use crate::violations::{Sanitizer, Violation, ViolationLog, ViolationRecord, ViolationSummary};

/// Blueprint the signature of a repaired record is generated from
pub const REPAIR_BLUEPRINT: &str = "emergency_repair";

/// Outcome of a successful `enforce` call
#[derive(Debug, Clone, PartialEq)]
pub enum Enforcement {
    /// The candidate passed the contract
    Validated(BaseRecord),
    /// The candidate failed in lenient mode; this record wraps it
    Repaired(BaseRecord),
    /// Enforcement is disabled; the candidate was not checked
    Bypassed(Value),
}

impl Enforcement {
    pub fn record(&self) -> Option<&BaseRecord> {
        match self {
            Enforcement::Validated(record) | Enforcement::Repaired(record) => Some(record),
            Enforcement::Bypassed(_) => None,
        }
    }

    pub fn into_record(self) -> Option<BaseRecord> {
        match self {
            Enforcement::Validated(record) | Enforcement::Repaired(record) => Some(record),
            Enforcement::Bypassed(_) => None,
        }
    }

    pub fn is_validated(&self) -> bool {
        matches!(self, Enforcement::Validated(_))
    }

    pub fn is_repaired(&self) -> bool {
        matches!(self, Enforcement::Repaired(_))
    }

    pub fn is_bypassed(&self) -> bool {
        matches!(self, Enforcement::Bypassed(_))
    }

    /// Outcome label used in logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Enforcement::Validated(_) => "validated",
            Enforcement::Repaired(_) => "repaired",
            Enforcement::Bypassed(_) => "bypassed",
        }
    }

    /// The record as loose JSON, or the untouched candidate when bypassed
    pub fn into_value(self) -> Value {
        match self {
            Enforcement::Validated(record) | Enforcement::Repaired(record) => record.to_value(),
            Enforcement::Bypassed(value) => value,
        }
    }
}

/// Builder for [`Enforcer`]
#[derive(Default)]
pub struct EnforcerBuilder {
    config: DoctrineConfig,
    contracts: Option<ContractRegistry>,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<DoctrineMetrics>,
}

impl EnforcerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: DoctrineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom contract registry instead of the built-in one
    pub fn contracts(mut self, contracts: ContractRegistry) -> Self {
        self.contracts = Some(contracts);
        self
    }

    /// Audit sink; overrides `audit_log` from the configuration
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn metrics(mut self, metrics: DoctrineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Enforcer {
        let audit = self.audit.or_else(|| {
            self.config
                .audit_log
                .as_ref()
                .map(|path| Arc::new(JsonLinesAuditSink::new(path.clone())) as Arc<dyn AuditSink>)
        });
        let sanitizer = Sanitizer::new().with_fields(&self.config.sensitive_fields);
        let contracts = self.contracts.unwrap_or_default();

        info!(
            enabled = self.config.enabled,
            strict = self.config.strict,
            contracts = contracts.kinds().len(),
            audit = audit.is_some(),
            "Doctrine enforcer initialized"
        );

        Enforcer {
            validator: Validator::new(Arc::new(contracts)),
            log: ViolationLog::with_sanitizer(sanitizer),
            enabled: AtomicBool::new(self.config.enabled),
            strict: AtomicBool::new(self.config.strict),
            config: self.config,
            audit,
            metrics: self.metrics,
        }
    }
}

/// Validation + violation tracking + projection facade
pub struct Enforcer {
    validator: Validator,
    log: ViolationLog,
    enabled: AtomicBool,
    strict: AtomicBool,
    config: DoctrineConfig,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<DoctrineMetrics>,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("enabled", &self.is_enabled())
            .field("strict", &self.is_strict())
            .field("violations", &self.log.len())
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Enforcer {
    fn default() -> Self {
        Self::new(DoctrineConfig::default())
    }
}

impl Enforcer {
    pub fn new(config: DoctrineConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> EnforcerBuilder {
        EnforcerBuilder::new()
    }

    pub fn config(&self) -> &DoctrineConfig {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn contracts(&self) -> &ContractRegistry {
        self.validator.registry()
    }

    pub fn violations(&self) -> &ViolationLog {
        &self.log
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_strict(&self) -> bool {
        self.strict.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if enabled {
            info!(previous, "Doctrine enforcement enabled");
        } else {
            warn!(previous, "Doctrine enforcement disabled");
        }
    }

    pub fn set_strict(&self, strict: bool) {
        let previous = self.strict.swap(strict, Ordering::SeqCst);
        info!(previous, strict, "Doctrine strict mode changed");
    }

    /// Validate a candidate and apply the mode policy
    pub fn enforce(&self, candidate: Value, kind: &SchemaKind, tool: &str, operation: &str) -> Result<Enforcement> {
        if tool.trim().is_empty() {
            return Err(DoctrineError::MissingToolName);
        }

        if !self.is_enabled() {
            warn!(tool, operation, kind = %kind, "Doctrine enforcement bypassed");
            self.record_outcome(tool, "bypassed");
            return Ok(Enforcement::Bypassed(candidate));
        }
        let strict = self.is_strict();

        let outcome = {
            let _timer = self.metrics.as_ref().map(|m| m.start_timer(kind.as_str()));
            self.validator.validate(&candidate, kind)
        };

        match outcome {
            Ok(record) => {
                debug!(
                    tool,
                    operation,
                    kind = %kind,
                    signature = record.execution_signature(),
                    "Contract validation passed"
                );
                self.record_outcome(tool, "validated");
                self.append_audit(&record, tool, operation);
                Ok(Enforcement::Validated(record))
            }
            Err(reason) => {
                self.log.record(Violation::new(
                    tool,
                    operation,
                    kind.clone(),
                    reason.clone(),
                    candidate.clone(),
                ));
                if let Some(metrics) = &self.metrics {
                    metrics.record_violation(kind.as_str(), reason.rule());
                    metrics.set_log_size(self.log.len());
                }
                warn!(
                    tool,
                    operation,
                    kind = %kind,
                    field = reason.field(),
                    rule = reason.rule(),
                    strict,
                    "Contract violation: {}",
                    reason
                );

                if strict {
                    self.record_outcome(tool, "rejected");
                    return Err(DoctrineError::ContractViolation {
                        tool: tool.to_string(),
                        operation: operation.to_string(),
                        reason,
                    });
                }

                let record = self.repair(candidate, tool, operation)?;
                info!(
                    tool,
                    operation,
                    signature = record.execution_signature(),
                    "Candidate repaired"
                );
                self.record_outcome(tool, "repaired");
                self.append_audit(&record, tool, operation);
                Ok(Enforcement::Repaired(record))
            }
        }
    }

    /// Enforce, then project the result for one sink
    ///
    /// A bypassed candidate is projected only if it happens to satisfy the
    /// contract; otherwise the call fails with `SinkMismatch`.
    pub fn enforce_for_sink(
        &self,
        candidate: Value,
        kind: &SchemaKind,
        tool: &str,
        operation: &str,
        sink: Sink,
    ) -> Result<SinkProjection> {
        match self.enforce(candidate, kind, tool, operation)? {
            Enforcement::Validated(record) | Enforcement::Repaired(record) => self.format(&record, sink),
            Enforcement::Bypassed(value) => {
                let record = self
                    .validator
                    .validate(&value, kind)
                    .map_err(|reason| DoctrineError::SinkMismatch {
                        sink,
                        reason: format!("bypassed candidate is not well-formed: {}", reason),
                    })?;
                self.format(&record, sink)
            }
        }
    }

    /// Project a record with the formatter matching the current mode
    ///
    /// Strict mode refuses repaired records.
    pub fn format(&self, record: &BaseRecord, sink: Sink) -> Result<SinkProjection> {
        let formatter = if self.is_strict() {
            Formatter::new()
        } else {
            Formatter::permissive()
        };
        let projection = formatter.format(record, sink)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_projection(sink.as_str());
        }
        Ok(projection)
    }

    /// Wrap a record for a store client, with the configured document TTL
    pub fn envelope(&self, record: &BaseRecord, target: &WriteTarget) -> Result<Envelope> {
        target.validate()?;
        let projection = self.format(record, target.sink())?;
        Envelope::wrap(target, projection, self.config.document_ttl_seconds)
    }

    /// Enforce, project for the target's sink and wrap the projection
    ///
    /// The target is checked before the candidate is enforced.
    pub fn write_envelope(
        &self,
        candidate: Value,
        kind: &SchemaKind,
        tool: &str,
        operation: &str,
        target: &WriteTarget,
    ) -> Result<Envelope> {
        target.validate()?;
        let projection = self.enforce_for_sink(candidate, kind, tool, operation, target.sink())?;
        Envelope::wrap(target, projection, self.config.document_ttl_seconds)
    }

    /// Build a fresh record for a tool, stamped with a generated signature
    pub fn create_record(&self, tool: &str, process_id: &str, payload: Map<String, Value>) -> Result<BaseRecord> {
        if tool.trim().is_empty() {
            return Err(DoctrineError::MissingToolName);
        }
        BaseRecord::builder(tool, process_id)
            .agent(tool)
            .schema_version(self.config.schema_version.clone())
            .payload(payload)
            .build()
            .map_err(|reason| DoctrineError::ContractViolation {
                tool: tool.to_string(),
                operation: "create_record".to_string(),
                reason,
            })
    }

    /// Per-tool handle; rejects an empty tool name
    pub fn for_tool(self: &Arc<Self>, tool: impl Into<String>) -> Result<ToolGuard> {
        let tool = tool.into();
        if tool.trim().is_empty() {
            return Err(DoctrineError::MissingToolName);
        }
        info!(tool = %tool, "Tool registered with doctrine enforcer");
        Ok(ToolGuard {
            enforcer: Arc::clone(self),
            tool,
        })
    }

    pub fn list_violations(&self) -> Vec<ViolationRecord> {
        self.log.list()
    }

    pub fn clear_violations(&self) -> usize {
        let removed = self.log.clear();
        if let Some(metrics) = &self.metrics {
            metrics.set_log_size(0);
        }
        removed
    }

    pub fn violation_summary(&self) -> ViolationSummary {
        self.log.summary()
    }

    /// Write a violation report into the configured report directory
    pub fn save_violation_report(&self) -> Result<Option<PathBuf>> {
        let dir = self
            .config
            .report_dir
            .as_deref()
            .ok_or_else(|| DoctrineError::Config("no report directory configured".to_string()))?;
        self.save_violation_report_to(dir)
    }

    pub fn save_violation_report_to(&self, dir: &Path) -> Result<Option<PathBuf>> {
        self.log.write_report(dir, self.is_enabled(), self.is_strict())
    }

    fn repair(&self, candidate: Value, tool: &str, operation: &str) -> Result<BaseRecord> {
        let non_empty = |field: &str| {
            candidate
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let source_id = non_empty("source_id").unwrap_or_else(|| self.config.default_source_id.clone());
        let process_id =
            non_empty("process_id").unwrap_or_else(|| format!("repair_{}", Utc::now().timestamp_millis()));

        let payload = match candidate {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("candidate".to_string(), other);
                map
            }
        };

        BaseRecord::builder(source_id, process_id)
            .agent(tool)
            .blueprint(REPAIR_BLUEPRINT)
            .schema_version(self.config.schema_version.clone())
            .payload(payload)
            .build()
            .map(BaseRecord::mark_repaired)
            .map_err(|reason| DoctrineError::ContractViolation {
                tool: tool.to_string(),
                operation: operation.to_string(),
                reason,
            })
    }

    fn record_outcome(&self, tool: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_enforcement(tool, outcome);
        }
    }

    fn append_audit(&self, record: &BaseRecord, tool: &str, operation: &str) {
        if let Some(sink) = &self.audit {
            if let Err(err) = sink.append(&AuditEntry::from_record(record, tool, operation)) {
                warn!(tool, operation, error = %err, "Failed to append audit entry");
            }
        }
    }
}

/// Enforcement bound to one tool name
#[derive(Debug, Clone)]
pub struct ToolGuard {
    enforcer: Arc<Enforcer>,
    tool: String,
}

impl ToolGuard {
    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn enforcer(&self) -> &Arc<Enforcer> {
        &self.enforcer
    }

    pub fn validate(&self, candidate: Value, kind: &SchemaKind, operation: &str) -> Result<Enforcement> {
        self.enforcer.enforce(candidate, kind, &self.tool, operation)
    }

    /// Enforce and project for a sink; the operation is named `<sink>_write`
    pub fn write_to(&self, sink: Sink, candidate: Value, kind: &SchemaKind) -> Result<SinkProjection> {
        let operation = format!("{}_write", sink);
        self.enforcer
            .enforce_for_sink(candidate, kind, &self.tool, &operation, sink)
    }

    /// Enforce and wrap for a store client; the operation is named `<sink>_write`
    pub fn write_envelope(&self, target: &WriteTarget, candidate: Value, kind: &SchemaKind) -> Result<Envelope> {
        let operation = format!("{}_write", target.sink());
        self.enforcer
            .write_envelope(candidate, kind, &self.tool, &operation, target)
    }

    /// Enforce and project each candidate of a stream, lazily
    pub fn stream<'a, I>(
        &'a self,
        sink: Sink,
        candidates: I,
        kind: &'a SchemaKind,
    ) -> impl Iterator<Item = Result<SinkProjection>> + 'a
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'a,
    {
        candidates
            .into_iter()
            .map(move |candidate| self.write_to(sink, candidate, kind))
    }

    pub fn create_record(&self, process_id: &str, payload: Map<String, Value>) -> Result<BaseRecord> {
        self.enforcer.create_record(&self.tool, process_id, payload)
    }
}

/// Late-bound shared enforcer slot
///
/// Clones share the same slot. Installing twice fails; using the handle
/// before anything is installed fails with `NotInitialized`.
#[derive(Debug, Clone, Default)]
pub struct EnforcerHandle {
    slot: Arc<OnceLock<Arc<Enforcer>>>,
}

impl EnforcerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, enforcer: Arc<Enforcer>) -> Result<Arc<Enforcer>> {
        self.slot
            .set(Arc::clone(&enforcer))
            .map_err(|_| DoctrineError::AlreadyInitialized)?;
        Ok(enforcer)
    }

    pub fn get(&self) -> Result<Arc<Enforcer>> {
        self.slot.get().cloned().ok_or(DoctrineError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn enforce(&self, candidate: Value, kind: &SchemaKind, tool: &str, operation: &str) -> Result<Enforcement> {
        self.get()?.enforce(candidate, kind, tool, operation)
    }
}

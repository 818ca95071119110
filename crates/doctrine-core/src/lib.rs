//! Doctrine Core
//!
//! Schema-contract enforcement between application tools and their
//! downstream stores. Every record a tool writes must satisfy one canonical
//! base contract; the enforcer validates candidates, reshapes validated
//! records for the document, relational and columnar sinks, and keeps an
//! audit ledger of every rejection.
//!
//! ## Architecture
//!
//! 1. **Contracts** (`contracts/`): declarative field specs for the base
//!    envelope and the command/task/project entities.
//!
//! 2. **Validator** (`validator`): narrows an untyped candidate into a
//!    [`BaseRecord`] or a single [`ViolationReason`].
//!
//! 3. **Violation Log** (`violations`): thread-safe, sanitized ledger of
//!    rejected attempts.
//!
//! 4. **Formatter** (`formatter/`): table-driven sink projections, the
//!    reverse `normalize`, and store write envelopes.
//!
//! 5. **Enforcer** (`enforcer`): strict/lenient facade over all of the above.
//!
//! ## Example
//!
//! ```rust,no_run
//! use doctrine_core::{Enforcer, SchemaKind, Sink};
//! use serde_json::json;
//!
//! let enforcer = Enforcer::default();
//! let candidate = json!({
//!     "source_id": "neon-sync",
//!     "process_id": "nightly-import",
//!     "validated": true,
//!     "execution_signature": "3f2a9c1e0b7d4a6f8e5c2b1a0d9f8e7c",
//!     "timestamp_last_touched": "2024-05-01T12:30:00Z"
//! });
//!
//! let outcome = enforcer.enforce(candidate, &SchemaKind::BASE, "neon-sync", "insert")?;
//! if let Some(record) = outcome.record() {
//!     let row = enforcer.format(record, Sink::Relational)?;
//!     println!("{}", row.into_value());
//! }
//! # Ok::<(), doctrine_core::DoctrineError>(())
//! ```

pub mod audit;
pub mod config;
pub mod contracts;
pub mod enforcer;
pub mod error;
pub mod formatter;
pub mod record;
pub mod telemetry;
pub mod validator;
pub mod violations;

pub use audit::{AuditEntry, AuditSink, AuditStatus, JsonLinesAuditSink};
pub use config::{ConfigError, DoctrineConfig, DoctrineConfigBuilder};
pub use contracts::{ContractRegistry, FieldSpec, FieldType, SchemaKind};
pub use enforcer::{Enforcement, Enforcer, EnforcerBuilder, EnforcerHandle, ToolGuard, REPAIR_BLUEPRINT};
pub use error::{DoctrineError, Result, ViolationReason};
pub use formatter::envelope::{
    ColumnarInsert, ColumnarRow, DocumentWrite, Envelope, RelationalUpsert, WriteTarget,
};
pub use formatter::{detect_sink, normalize, Formatter, Sink, SinkProjection};
pub use record::{
    generate_execution_signature, ApprovalStage, BaseRecord, EntityRecord, RecordBuilder, RecordOrigin,
    ValidationState,
};
pub use telemetry::{DoctrineMetrics, MetricsRegistry, TelemetryError};
pub use validator::Validator;
pub use violations::{
    Sanitizer, Violation, ViolationLog, ViolationRecord, ViolationReport, ViolationSummary,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Sink projections
//!
//! One generic projection driven by a declarative column table per sink.
//! Adding a sink means adding a [`SinkLayout`]; the projection and the
//! reverse [`normalize`] walk the table and never special-case a sink.

pub mod envelope;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::contracts::SchemaKind;
use crate::error::{DoctrineError, Result, ViolationReason};
use crate::record::{format_timestamp, BaseRecord, ValidationState};
use crate::validator::Validator;

/// Downstream store a record is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sink {
    /// Short-lived working-memory documents
    Document,
    /// Long-term relational store, upserted per task
    Relational,
    /// Analytics warehouse
    Columnar,
}

impl Sink {
    pub const ALL: [Sink; 3] = [Sink::Document, Sink::Relational, Sink::Columnar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sink::Document => "document",
            Sink::Relational => "relational",
            Sink::Columnar => "columnar",
        }
    }

    pub fn layout(&self) -> &'static SinkLayout {
        match self {
            Sink::Document => &DOCUMENT_LAYOUT,
            Sink::Relational => &RELATIONAL_LAYOUT,
            Sink::Columnar => &COLUMNAR_LAYOUT,
        }
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sink {
    type Err = DoctrineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "document" | "document_store" | "doc" => Ok(Sink::Document),
            "relational" | "relational_store" | "sql" => Ok(Sink::Relational),
            "columnar" | "columnar_store" | "warehouse" => Ok(Sink::Columnar),
            other => Err(DoctrineError::Serialization(format!("unknown sink '{}'", other))),
        }
    }
}

/// Base-record value a sink column is filled from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    SourceId,
    ProcessId,
    /// `validated` exactly as given
    ValidationState,
    /// `validated` collapsed to a boolean approval flag
    ApprovalFlag,
    /// `promoted_to`, null when absent
    PromotedTo,
    Signature,
    Timestamp,
    /// `data_payload` as a nested mapping, `{}` when absent
    Payload,
}

/// Column table of a sink
#[derive(Debug)]
pub struct SinkLayout {
    pub sink: Sink,
    pub columns: &'static [(&'static str, Column)],
    /// Spread payload keys into the projection instead of nesting them;
    /// envelope columns win on collision
    pub flatten_payload: bool,
}

impl SinkLayout {
    /// Name of the column carrying a given base value
    pub fn column_for(&self, column: Column) -> Option<&'static str> {
        self.columns
            .iter()
            .find(|(_, c)| *c == column)
            .map(|(name, _)| *name)
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| *column == name)
    }
}

static DOCUMENT_LAYOUT: SinkLayout = SinkLayout {
    sink: Sink::Document,
    columns: &[
        ("source_id", Column::SourceId),
        ("process_id", Column::ProcessId),
        ("validated", Column::ValidationState),
        ("promoted_to", Column::PromotedTo),
        ("execution_signature", Column::Signature),
        ("timestamp_last_touched", Column::Timestamp),
    ],
    flatten_payload: true,
};

static RELATIONAL_LAYOUT: SinkLayout = SinkLayout {
    sink: Sink::Relational,
    columns: &[
        ("source_id", Column::SourceId),
        ("task_id", Column::ProcessId),
        ("approved", Column::ApprovalFlag),
        ("migrated_to", Column::PromotedTo),
        ("process_signature", Column::Signature),
        ("event_timestamp", Column::Timestamp),
        ("data_payload", Column::Payload),
    ],
    flatten_payload: false,
};

static COLUMNAR_LAYOUT: SinkLayout = SinkLayout {
    sink: Sink::Columnar,
    columns: &[
        ("source_id", Column::SourceId),
        ("task_id", Column::ProcessId),
        ("analytics_approved", Column::ApprovalFlag),
        ("consolidated_from", Column::PromotedTo),
        ("knowledge_signature", Column::Signature),
        ("event_timestamp", Column::Timestamp),
        ("data_payload", Column::Payload),
    ],
    flatten_payload: false,
};

/// A record reshaped for one sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkProjection {
    pub sink: Sink,
    pub fields: Map<String, Value>,
}

impl SinkProjection {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    /// The execution signature, whatever the sink calls it
    pub fn execution_signature(&self) -> Option<&str> {
        self.sink
            .layout()
            .column_for(Column::Signature)
            .and_then(|column| self.fields.get(column))
            .and_then(Value::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// How the formatter treats records synthesized by the repair path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairedPolicy {
    Reject,
    Accept,
}

/// Projects validated records into sink shapes
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    repaired: RepairedPolicy,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter {
    /// Formatter that refuses repaired records
    pub fn new() -> Self {
        Self {
            repaired: RepairedPolicy::Reject,
        }
    }

    /// Formatter that also projects repaired records
    pub fn permissive() -> Self {
        Self {
            repaired: RepairedPolicy::Accept,
        }
    }

    pub fn repaired_policy(&self) -> RepairedPolicy {
        self.repaired
    }

    /// Project a record for one sink
    pub fn format(&self, record: &BaseRecord, sink: Sink) -> Result<SinkProjection> {
        if !record.is_well_formed() {
            return Err(DoctrineError::SinkMismatch {
                sink,
                reason: "record breaks the base contract invariant".to_string(),
            });
        }
        if record.is_repaired() && self.repaired == RepairedPolicy::Reject {
            return Err(DoctrineError::SinkMismatch {
                sink,
                reason: "repaired record has not passed the contract".to_string(),
            });
        }

        let layout = sink.layout();
        let mut fields = Map::new();

        if layout.flatten_payload {
            if let Some(payload) = record.data_payload() {
                fields.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        for (name, column) in layout.columns {
            fields.insert((*name).to_string(), column_value(record, *column));
        }

        Ok(SinkProjection { sink, fields })
    }

    /// Project a record for every sink, in [`Sink::ALL`] order
    pub fn format_all(&self, record: &BaseRecord) -> Result<Vec<SinkProjection>> {
        Sink::ALL.iter().map(|sink| self.format(record, *sink)).collect()
    }
}

fn column_value(record: &BaseRecord, column: Column) -> Value {
    match column {
        Column::SourceId => Value::from(record.source_id()),
        Column::ProcessId => Value::from(record.process_id()),
        Column::ValidationState => record.validated().to_value(),
        Column::ApprovalFlag => Value::Bool(record.validated().is_approved()),
        Column::PromotedTo => record.promoted_to().map(Value::from).unwrap_or(Value::Null),
        Column::Signature => Value::from(record.execution_signature()),
        Column::Timestamp => Value::from(format_timestamp(&record.timestamp_last_touched())),
        Column::Payload => Value::Object(record.data_payload().cloned().unwrap_or_default()),
    }
}

/// Guess which sink a stored row came from
pub fn detect_sink(row: &Map<String, Value>) -> Sink {
    if row.contains_key("task_id") && row.contains_key("approved") {
        Sink::Relational
    } else if row.contains_key("analytics_approved") && row.contains_key("knowledge_signature") {
        Sink::Columnar
    } else {
        Sink::Document
    }
}

/// Map a stored sink row back to a base record and re-validate it
///
/// Relational and columnar rows only keep the boolean approval flag, so an
/// approval stage comes back as `true`/`false`. An empty payload comes back
/// as absent.
pub fn normalize(row: &Value) -> std::result::Result<BaseRecord, ViolationReason> {
    let map = row.as_object().ok_or_else(|| ViolationReason::InvalidType {
        field: "$".to_string(),
        expected: crate::contracts::FieldType::Object,
        found: crate::contracts::json_type_name(row).to_string(),
        value: row.clone(),
    })?;
    let layout = detect_sink(map).layout();

    let mut candidate = Map::new();
    for (name, column) in layout.columns {
        let Some(value) = map.get(*name) else {
            continue;
        };
        let base_field = match column {
            Column::SourceId => "source_id",
            Column::ProcessId => "process_id",
            Column::ValidationState | Column::ApprovalFlag => "validated",
            Column::PromotedTo => "promoted_to",
            Column::Signature => "execution_signature",
            Column::Timestamp => "timestamp_last_touched",
            Column::Payload => "data_payload",
        };
        candidate.insert(base_field.to_string(), value.clone());
    }

    if layout.flatten_payload {
        let leftover: Map<String, Value> = map
            .iter()
            .filter(|(key, _)| !layout.has_column(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !leftover.is_empty() {
            candidate.insert("data_payload".to_string(), Value::Object(leftover));
        }
    } else if matches!(candidate.get("data_payload"), Some(Value::Object(p)) if p.is_empty()) {
        candidate.remove("data_payload");
    }

    Validator::default().validate(&Value::Object(candidate), &SchemaKind::BASE)
}

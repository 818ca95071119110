//! Write envelopes around sink projections
//!
//! The core never talks to a store. These types package a projection the
//! way each store's client expects it so the caller only has to hand it over.

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use super::{Sink, SinkProjection};
use crate::error::{DoctrineError, Result};
use crate::record::format_timestamp;

/// Default time-to-live of working-memory documents
pub const DEFAULT_DOCUMENT_TTL_SECONDS: u64 = 3600;

/// Collection type stamped on every document write
pub const WORKING_MEMORY: &str = "working_memory";

/// Conflict target of the relational upsert
pub const UPSERT_CONFLICT_COLUMNS: [&str; 3] = ["source_id", "task_id", "process_signature"];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap())
}

/// Check that a table, dataset or collection name is a plain identifier
/// (optionally schema-qualified)
pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(DoctrineError::InvalidIdentifier(name.to_string()))
    }
}

fn expect_sink(projection: &SinkProjection, sink: Sink) -> Result<()> {
    if projection.sink == sink {
        Ok(())
    } else {
        Err(DoctrineError::SinkMismatch {
            sink,
            reason: format!("projection was built for the {} sink", projection.sink),
        })
    }
}

/// Document-store write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentWrite {
    pub collection: String,
    pub document: Map<String, Value>,
}

impl DocumentWrite {
    pub fn new(collection: impl Into<String>, projection: SinkProjection) -> Result<Self> {
        Self::with_ttl(collection, projection, DEFAULT_DOCUMENT_TTL_SECONDS)
    }

    pub fn with_ttl(collection: impl Into<String>, projection: SinkProjection, ttl_seconds: u64) -> Result<Self> {
        let collection = collection.into();
        validate_identifier(&collection)?;
        expect_sink(&projection, Sink::Document)?;

        let mut document = projection.fields;
        document.insert("ttl".to_string(), Value::from(ttl_seconds));
        document.insert("created_at".to_string(), Value::from(format_timestamp(&Utc::now())));
        document.insert("collection_type".to_string(), Value::from(WORKING_MEMORY));

        Ok(Self { collection, document })
    }
}

/// Relational-store upsert with positional parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationalUpsert {
    pub table: String,
    pub sql: String,
    pub values: Vec<Value>,
}

impl RelationalUpsert {
    pub fn new(table: impl Into<String>, projection: &SinkProjection) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        expect_sink(projection, Sink::Relational)?;

        let layout = Sink::Relational.layout();
        let columns: Vec<&str> = layout.columns.iter().map(|(name, _)| *name).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let updates: Vec<String> = columns
            .iter()
            .filter(|column| !UPSERT_CONFLICT_COLUMNS.contains(*column))
            .map(|column| format!("{column} = EXCLUDED.{column}"))
            .collect();

        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}, updated_at = NOW()",
            columns.join(", "),
            placeholders.join(", "),
            UPSERT_CONFLICT_COLUMNS.join(", "),
            updates.join(", "),
        );

        let values = columns
            .iter()
            .map(|column| match (*column, projection.get(column)) {
                // Stored as JSON text
                ("data_payload", Some(payload)) => Value::String(payload.to_string()),
                (_, Some(value)) => value.clone(),
                (_, None) => Value::Null,
            })
            .collect();

        Ok(Self { table, sql, values })
    }
}

/// Hex SHA-256 over length-prefixed parts, so no pair of distinct tuples
/// can collide by shifting a separator between ids
fn insert_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// One row of a columnar insert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnarRow {
    /// Deterministic de-duplication key
    pub insert_id: String,
    pub json: Map<String, Value>,
}

/// Columnar-warehouse streaming insert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnarInsert {
    pub dataset: String,
    pub table: String,
    pub rows: Vec<ColumnarRow>,
}

impl ColumnarInsert {
    pub fn new<I>(dataset: impl Into<String>, table: impl Into<String>, projections: I) -> Result<Self>
    where
        I: IntoIterator<Item = SinkProjection>,
    {
        let dataset = dataset.into();
        let table = table.into();
        validate_identifier(&dataset)?;
        validate_identifier(&table)?;

        let rows = projections
            .into_iter()
            .map(|projection| {
                expect_sink(&projection, Sink::Columnar)?;
                let part = |column: &str| {
                    projection
                        .get(column)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                let (source, task, signature) = (part("source_id"), part("task_id"), part("knowledge_signature"));
                let insert_id = insert_id(&[source.as_str(), task.as_str(), signature.as_str()]);
                Ok(ColumnarRow {
                    insert_id,
                    json: projection.fields,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { dataset, table, rows })
    }
}

/// Store location a write envelope is addressed to
///
/// Parsed from `document:<collection>`, `relational:<table>` or
/// `columnar:<dataset>.<table>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sink", rename_all = "snake_case")]
pub enum WriteTarget {
    Document { collection: String },
    Relational { table: String },
    Columnar { dataset: String, table: String },
}

impl WriteTarget {
    pub fn sink(&self) -> Sink {
        match self {
            WriteTarget::Document { .. } => Sink::Document,
            WriteTarget::Relational { .. } => Sink::Relational,
            WriteTarget::Columnar { .. } => Sink::Columnar,
        }
    }

    /// Check every name of the target is a plain identifier
    pub fn validate(&self) -> Result<()> {
        match self {
            WriteTarget::Document { collection } => validate_identifier(collection),
            WriteTarget::Relational { table } => validate_identifier(table),
            WriteTarget::Columnar { dataset, table } => {
                validate_identifier(dataset)?;
                validate_identifier(table)
            }
        }
    }
}

impl fmt::Display for WriteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteTarget::Document { collection } => write!(f, "document:{}", collection),
            WriteTarget::Relational { table } => write!(f, "relational:{}", table),
            WriteTarget::Columnar { dataset, table } => write!(f, "columnar:{}.{}", dataset, table),
        }
    }
}

impl FromStr for WriteTarget {
    type Err = DoctrineError;

    fn from_str(s: &str) -> Result<Self> {
        let (sink, name) = s
            .split_once(':')
            .ok_or_else(|| DoctrineError::Serialization(format!("write target '{}' is not <sink>:<name>", s)))?;

        let target = match sink.parse::<Sink>()? {
            Sink::Document => WriteTarget::Document {
                collection: name.to_string(),
            },
            Sink::Relational => WriteTarget::Relational {
                table: name.to_string(),
            },
            Sink::Columnar => {
                let (dataset, table) = name
                    .split_once('.')
                    .ok_or_else(|| DoctrineError::InvalidIdentifier(name.to_string()))?;
                WriteTarget::Columnar {
                    dataset: dataset.to_string(),
                    table: table.to_string(),
                }
            }
        };
        target.validate()?;
        Ok(target)
    }
}

/// A projection packaged for one store client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "sink", rename_all = "snake_case")]
pub enum Envelope {
    Document(DocumentWrite),
    Relational(RelationalUpsert),
    Columnar(ColumnarInsert),
}

impl Envelope {
    /// Wrap a projection for `target`; the projection must be built for the
    /// target's sink
    pub fn wrap(target: &WriteTarget, projection: SinkProjection, document_ttl_seconds: u64) -> Result<Self> {
        match target {
            WriteTarget::Document { collection } => {
                DocumentWrite::with_ttl(collection.as_str(), projection, document_ttl_seconds).map(Envelope::Document)
            }
            WriteTarget::Relational { table } => {
                RelationalUpsert::new(table.as_str(), &projection).map(Envelope::Relational)
            }
            WriteTarget::Columnar { dataset, table } => {
                ColumnarInsert::new(dataset.as_str(), table.as_str(), [projection]).map(Envelope::Columnar)
            }
        }
    }

    pub fn sink(&self) -> Sink {
        match self {
            Envelope::Document(_) => Sink::Document,
            Envelope::Relational(_) => Sink::Relational,
            Envelope::Columnar(_) => Sink::Columnar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::Formatter;
    use crate::record::BaseRecord;
    use serde_json::json;

    fn record() -> BaseRecord {
        BaseRecord::builder("neon-sync", "import-42")
            .payload(json!({ "rows": 12 }).as_object().cloned().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("shq_records").is_ok());
        assert!(validate_identifier("public.shq_records").is_ok());
        assert!(matches!(
            validate_identifier("records; DROP TABLE x"),
            Err(DoctrineError::InvalidIdentifier(_))
        ));
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_document_write() {
        let projection = Formatter::new().format(&record(), Sink::Document).unwrap();
        let write = DocumentWrite::new("working_memory", projection).unwrap();
        assert_eq!(write.document["ttl"], json!(3600));
        assert_eq!(write.document["collection_type"], json!("working_memory"));
        assert_eq!(write.document["rows"], json!(12));
        assert!(write.document.contains_key("created_at"));
    }

    #[test]
    fn test_document_write_rejects_other_sinks() {
        let projection = Formatter::new().format(&record(), Sink::Relational).unwrap();
        assert!(matches!(
            DocumentWrite::new("working_memory", projection),
            Err(DoctrineError::SinkMismatch { sink: Sink::Document, .. })
        ));
    }

    #[test]
    fn test_relational_upsert() {
        let r = record();
        let projection = Formatter::new().format(&r, Sink::Relational).unwrap();
        let upsert = RelationalUpsert::new("shq_records", &projection).unwrap();

        assert!(upsert.sql.starts_with("INSERT INTO shq_records (source_id, task_id, approved"));
        assert!(upsert
            .sql
            .contains("ON CONFLICT (source_id, task_id, process_signature) DO UPDATE SET"));
        assert!(upsert.sql.contains("approved = EXCLUDED.approved"));
        assert!(!upsert.sql.contains("task_id = EXCLUDED"));
        assert!(upsert.sql.ends_with("updated_at = NOW()"));

        assert_eq!(upsert.values.len(), 7);
        assert_eq!(upsert.values[0], json!("neon-sync"));
        assert_eq!(upsert.values[4], json!(r.execution_signature()));
        assert_eq!(upsert.values[6], json!(r#"{"rows":12}"#));
    }

    #[test]
    fn test_columnar_insert_ids() {
        let r = record();
        let projection = Formatter::new().format(&r, Sink::Columnar).unwrap();
        let insert = ColumnarInsert::new("analytics", "records", vec![projection]).unwrap();
        assert_eq!(insert.rows.len(), 1);
        assert_eq!(insert.rows[0].insert_id.len(), 64);

        let again = ColumnarInsert::new("analytics", "records", vec![projection_of(&r)]).unwrap();
        assert_eq!(again.rows[0].insert_id, insert.rows[0].insert_id);
        assert!(ColumnarInsert::new("analytics", "bad-name", Vec::new()).is_err());
    }

    fn projection_of(record: &BaseRecord) -> SinkProjection {
        Formatter::new().format(record, Sink::Columnar).unwrap()
    }

    #[test]
    fn test_insert_ids_do_not_collide_on_dashes() {
        let with_ids = |source: &str, task: &str| {
            let record = BaseRecord::builder(source, task).build().unwrap();
            let mut projection = projection_of(&record);
            projection
                .fields
                .insert("knowledge_signature".to_string(), json!("sig"));
            ColumnarInsert::new("analytics", "records", vec![projection])
                .unwrap()
                .rows
                .remove(0)
                .insert_id
        };
        assert_ne!(with_ids("a-b", "c"), with_ids("a", "b-c"));
    }

    #[test]
    fn test_write_target_parsing() {
        assert_eq!(
            "document:working_memory".parse::<WriteTarget>().unwrap(),
            WriteTarget::Document {
                collection: "working_memory".to_string()
            }
        );
        assert_eq!(
            "sql:public.shq_records".parse::<WriteTarget>().unwrap(),
            WriteTarget::Relational {
                table: "public.shq_records".to_string()
            }
        );
        let columnar = "columnar:analytics.records".parse::<WriteTarget>().unwrap();
        assert_eq!(columnar.sink(), Sink::Columnar);
        assert_eq!(columnar.to_string(), "columnar:analytics.records");

        assert!("working_memory".parse::<WriteTarget>().is_err());
        assert!("columnar:records".parse::<WriteTarget>().is_err());
        assert!(matches!(
            "relational:x; DROP TABLE y".parse::<WriteTarget>(),
            Err(DoctrineError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_envelope_wrap() {
        let r = record();
        let target = WriteTarget::Document {
            collection: "working_memory".to_string(),
        };
        let projection = Formatter::new().format(&r, Sink::Document).unwrap();
        let envelope = Envelope::wrap(&target, projection, 60).unwrap();
        match &envelope {
            Envelope::Document(write) => assert_eq!(write.document["ttl"], json!(60)),
            other => panic!("expected document write, got {:?}", other),
        }
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["sink"], json!("document"));
        assert_eq!(value["collection"], json!("working_memory"));

        let mismatched = Formatter::new().format(&r, Sink::Columnar).unwrap();
        assert!(matches!(
            Envelope::wrap(&target, mismatched, 60),
            Err(DoctrineError::SinkMismatch { .. })
        ));
    }
}

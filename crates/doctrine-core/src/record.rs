//! Typed records produced by the validator
//!
//! A [`BaseRecord`] only exists once a candidate has passed the base
//! contract (or was synthesized by the lenient repair path, which is marked
//! through [`RecordOrigin`]). Its fields are private and read-only.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::contracts::SchemaKind;
use crate::error::ViolationReason;
use crate::validator::Validator;

/// Hex characters kept from the SHA-256 digest of a generated signature
pub const SIGNATURE_LENGTH: usize = 32;

/// Schema version stamped into generated signatures by default
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0.0";

/// Explicit approval stage of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStage {
    Pending,
    Approved,
    Rejected,
}

/// Outcome carried in the `validated` field
///
/// Either a plain pass/fail flag or an explicit approval stage; a record can be
/// structurally valid and still `pending` business approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidationState {
    Flag(bool),
    Stage(ApprovalStage),
}

impl ValidationState {
    /// Narrow a JSON value; `None` when it is neither a bool nor a known stage
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(flag) => Some(ValidationState::Flag(*flag)),
            Value::String(stage) => match stage.as_str() {
                "pending" => Some(ValidationState::Stage(ApprovalStage::Pending)),
                "approved" => Some(ValidationState::Stage(ApprovalStage::Approved)),
                "rejected" => Some(ValidationState::Stage(ApprovalStage::Rejected)),
                _ => None,
            },
            _ => None,
        }
    }

    /// `true` or `approved`
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            ValidationState::Flag(true) | ValidationState::Stage(ApprovalStage::Approved)
        )
    }

    pub fn to_value(&self) -> Value {
        match self {
            ValidationState::Flag(flag) => Value::Bool(*flag),
            ValidationState::Stage(ApprovalStage::Pending) => Value::from("pending"),
            ValidationState::Stage(ApprovalStage::Approved) => Value::from("approved"),
            ValidationState::Stage(ApprovalStage::Rejected) => Value::from("rejected"),
        }
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationState::Flag(flag) => write!(f, "{}", flag),
            ValidationState::Stage(ApprovalStage::Pending) => f.write_str("pending"),
            ValidationState::Stage(ApprovalStage::Approved) => f.write_str("approved"),
            ValidationState::Stage(ApprovalStage::Rejected) => f.write_str("rejected"),
        }
    }
}

/// How a record came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// Passed the contract
    Validated,
    /// Synthesized by the lenient repair path; never validated
    Repaired,
}

/// Render an instant the way every projection and audit row expects it
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

/// Canonical validated envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseRecord {
    source_id: String,
    process_id: String,
    validated: ValidationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    promoted_to: Option<String>,
    execution_signature: String,
    #[serde(serialize_with = "serialize_timestamp")]
    timestamp_last_touched: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_payload: Option<Map<String, Value>>,
    #[serde(skip)]
    origin: RecordOrigin,
}

impl BaseRecord {
    pub(crate) fn from_parts(
        source_id: String,
        process_id: String,
        validated: ValidationState,
        promoted_to: Option<String>,
        execution_signature: String,
        timestamp_last_touched: DateTime<Utc>,
        data_payload: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            source_id,
            process_id,
            validated,
            promoted_to,
            execution_signature,
            timestamp_last_touched,
            data_payload,
            origin: RecordOrigin::Validated,
        }
    }

    /// Start building a record at the call site
    pub fn builder(source_id: impl Into<String>, process_id: impl Into<String>) -> RecordBuilder {
        RecordBuilder::new(source_id, process_id)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn validated(&self) -> ValidationState {
        self.validated
    }

    pub fn promoted_to(&self) -> Option<&str> {
        self.promoted_to.as_deref()
    }

    pub fn execution_signature(&self) -> &str {
        &self.execution_signature
    }

    pub fn timestamp_last_touched(&self) -> DateTime<Utc> {
        self.timestamp_last_touched
    }

    pub fn data_payload(&self) -> Option<&Map<String, Value>> {
        self.data_payload.as_ref()
    }

    pub fn origin(&self) -> RecordOrigin {
        self.origin
    }

    pub fn is_repaired(&self) -> bool {
        self.origin == RecordOrigin::Repaired
    }

    pub(crate) fn mark_repaired(mut self) -> Self {
        self.origin = RecordOrigin::Repaired;
        self
    }

    /// Re-check the base invariant on an already-typed record
    pub fn is_well_formed(&self) -> bool {
        !self.source_id.is_empty()
            && !self.process_id.is_empty()
            && !self.execution_signature.is_empty()
    }

    /// Loose representation, suitable for re-submission through the validator
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("source_id".into(), Value::from(self.source_id.clone()));
        map.insert("process_id".into(), Value::from(self.process_id.clone()));
        map.insert("validated".into(), self.validated.to_value());
        if let Some(stage) = &self.promoted_to {
            map.insert("promoted_to".into(), Value::from(stage.clone()));
        }
        map.insert(
            "execution_signature".into(),
            Value::from(self.execution_signature.clone()),
        );
        map.insert(
            "timestamp_last_touched".into(),
            Value::from(format_timestamp(&self.timestamp_last_touched)),
        );
        if let Some(payload) = &self.data_payload {
            map.insert("data_payload".into(), Value::Object(payload.clone()));
        }
        Value::Object(map)
    }
}

/// Entity payload that passed its contract, with declared defaults applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    kind: SchemaKind,
    fields: Map<String, Value>,
}

impl EntityRecord {
    pub(crate) fn new(kind: SchemaKind, fields: Map<String, Value>) -> Self {
        Self { kind, fields }
    }

    pub fn kind(&self) -> &SchemaKind {
        &self.kind
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

/// Generate a fresh execution signature
///
/// SHA-256 over `agent:blueprint:version:nanos:nonce`, truncated to
/// [`SIGNATURE_LENGTH`] hex characters. The random nonce keeps signatures
/// unique across attempts made within the same clock tick.
pub fn generate_execution_signature(agent_id: &str, blueprint_id: &str, schema_version: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let nonce = uuid::Uuid::new_v4();

    let mut hasher = Sha256::new();
    hasher.update(format!("{agent_id}:{blueprint_id}:{schema_version}:{nanos}:{nonce}").as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(SIGNATURE_LENGTH);
    digest
}

/// Builder for records created directly by a producer
///
/// Starts unvalidated (`validated = false`) with the current time and a
/// generated signature; `build` runs the result through the base contract.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    source_id: String,
    process_id: String,
    validated: ValidationState,
    promoted_to: Option<String>,
    data_payload: Option<Map<String, Value>>,
    agent_id: String,
    blueprint_id: Option<String>,
    schema_version: String,
    timestamp: Option<DateTime<Utc>>,
}

impl RecordBuilder {
    pub fn new(source_id: impl Into<String>, process_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            process_id: process_id.into(),
            validated: ValidationState::Flag(false),
            promoted_to: None,
            data_payload: None,
            agent_id: "system".to_string(),
            blueprint_id: None,
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            timestamp: None,
        }
    }

    pub fn validated(mut self, state: ValidationState) -> Self {
        self.validated = state;
        self
    }

    pub fn promoted_to(mut self, stage: impl Into<String>) -> Self {
        self.promoted_to = Some(stage.into());
        self
    }

    pub fn payload(mut self, payload: Map<String, Value>) -> Self {
        self.data_payload = Some(payload);
        self
    }

    /// Agent id hashed into the signature (default `system`)
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Blueprint id hashed into the signature (default: the process id)
    pub fn blueprint(mut self, blueprint_id: impl Into<String>) -> Self {
        self.blueprint_id = Some(blueprint_id.into());
        self
    }

    pub fn schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    /// Override the last-touched instant (defaults to now)
    pub fn touched_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> Result<BaseRecord, ViolationReason> {
        let blueprint = self.blueprint_id.as_deref().unwrap_or(&self.process_id);
        let signature = generate_execution_signature(&self.agent_id, blueprint, &self.schema_version);
        let record = BaseRecord {
            source_id: self.source_id,
            process_id: self.process_id,
            validated: self.validated,
            promoted_to: self.promoted_to,
            execution_signature: signature,
            timestamp_last_touched: self.timestamp.unwrap_or_else(Utc::now),
            data_payload: self.data_payload,
            origin: RecordOrigin::Validated,
        };
        Validator::default().validate(&record.to_value(), &SchemaKind::BASE)
    }
}

/// Raw JSON helpers shared by the validator and the formatter
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

//! Contract schema definitions
//!
//! Declarative description of the canonical base record and of the entity
//! shapes layered on top of `data_payload`. This module is pure data: the
//! validator reads it through [`ContractRegistry::describe`] and never needs
//! to change when a new kind is registered.

pub mod entities;

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Name of a registered contract
///
/// Backed by a string so new entity kinds can be registered at runtime; the
/// built-in kinds are available as associated constants. Names are trimmed and
/// lowercased however the kind is constructed or deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SchemaKind(Cow<'static, str>);

impl SchemaKind {
    /// The canonical base envelope
    pub const BASE: SchemaKind = SchemaKind(Cow::Borrowed("base"));
    /// Command entity carried in `data_payload`
    pub const COMMAND: SchemaKind = SchemaKind(Cow::Borrowed("command"));
    /// Task entity carried in `data_payload`
    pub const TASK: SchemaKind = SchemaKind(Cow::Borrowed("task"));
    /// Project entity carried in `data_payload`
    pub const PROJECT: SchemaKind = SchemaKind(Cow::Borrowed("project"));

    /// Create a kind from a name; built-in names resolve to their constants
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim().to_lowercase();
        match name.as_str() {
            "base" => SchemaKind::BASE,
            "command" => SchemaKind::COMMAND,
            "task" => SchemaKind::TASK,
            "project" => SchemaKind::PROJECT,
            _ => SchemaKind(Cow::Owned(name)),
        }
    }

    /// Kind name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this kind layers an entity contract on top of the base envelope
    pub fn is_entity(&self) -> bool {
        *self != SchemaKind::BASE
    }
}

impl Default for SchemaKind {
    fn default() -> Self {
        SchemaKind::BASE
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SchemaKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SchemaKind::new(s))
    }
}

impl<'de> Deserialize<'de> for SchemaKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(SchemaKind::new(name))
    }
}

/// Expected type of a contract field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Boolean,
    Number,
    Object,
    Array,
    /// RFC 3339 timestamp string
    Timestamp,
    /// Hyphenated UUID string
    Uuid,
    /// Boolean pass/fail or an approval stage name
    ValidationState,
    Any,
}

impl FieldType {
    /// Whether a JSON value has the right shape for this type
    ///
    /// Only the JSON type is checked here; parseability of timestamps and
    /// uuids belongs to the constraint pass.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            FieldType::String | FieldType::Timestamp | FieldType::Uuid => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Number => value.is_number(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::ValidationState => matches!(value, Value::Bool(_) | Value::String(_)),
            FieldType::Any => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Number => "number",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Timestamp => "timestamp",
            FieldType::Uuid => "uuid",
            FieldType::ValidationState => "boolean or approval stage",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

/// JSON type name of a value, for violation messages
pub fn json_type_name(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Definition of a single contract field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name within the enclosing mapping
    pub name: String,

    /// Expected field type
    pub field_type: FieldType,

    /// Whether this field must be present and non-null
    #[serde(default)]
    pub required: bool,

    /// Minimum string length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Maximum string length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Allowed string values (empty means unconstrained)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,

    /// Value applied when the field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    fn new(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
            min_length: None,
            max_length: None,
            allowed_values: Vec::new(),
            default: None,
            description: None,
        }
    }

    /// A field that must be present
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, true)
    }

    /// A field that may be absent or null
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, false)
    }

    /// Require at least one character
    pub fn non_empty(self) -> Self {
        self.min_length(1)
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Restrict string values to the given set
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Allowed approval stages for the `validated` field
pub const APPROVAL_STAGES: [&str; 3] = ["pending", "approved", "rejected"];

/// Field specs of the canonical base envelope
pub fn base_record_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("source_id", FieldType::String)
            .non_empty()
            .describe("Identifier of the producing tool"),
        FieldSpec::required("process_id", FieldType::String)
            .non_empty()
            .describe("Identifier of the logical operation that produced the record"),
        FieldSpec::required("validated", FieldType::ValidationState)
            .one_of(APPROVAL_STAGES)
            .describe("Pass/fail flag or approval stage"),
        FieldSpec::optional("promoted_to", FieldType::String)
            .describe("Downstream stage the record has been escalated to"),
        FieldSpec::required("execution_signature", FieldType::String)
            .non_empty()
            .describe("Token identifying this validation attempt"),
        FieldSpec::required("timestamp_last_touched", FieldType::Timestamp)
            .describe("Instant of the last mutation"),
        FieldSpec::optional("data_payload", FieldType::Object)
            .describe("Producer-specific fields"),
    ]
}

/// Registry of contracts by kind
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    contracts: HashMap<SchemaKind, Vec<FieldSpec>>,
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractRegistry {
    /// Registry with the base envelope and the built-in entity contracts
    pub fn new() -> Self {
        let mut registry = Self::base_only();
        registry.register(SchemaKind::COMMAND, entities::command_fields());
        registry.register(SchemaKind::TASK, entities::task_fields());
        registry.register(SchemaKind::PROJECT, entities::project_fields());
        registry
    }

    /// Registry with only the base envelope
    pub fn base_only() -> Self {
        let mut contracts = HashMap::new();
        contracts.insert(SchemaKind::BASE, base_record_fields());
        Self { contracts }
    }

    /// Register (or replace) the contract for a kind
    pub fn register(&mut self, kind: SchemaKind, fields: Vec<FieldSpec>) {
        self.contracts.insert(kind, fields);
    }

    /// Field specs for a kind
    pub fn describe(&self, kind: &SchemaKind) -> Option<&[FieldSpec]> {
        self.contracts.get(kind).map(Vec::as_slice)
    }

    /// Registered kinds, sorted by name
    pub fn kinds(&self) -> Vec<SchemaKind> {
        let mut kinds: Vec<_> = self.contracts.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_base() {
        let registry = ContractRegistry::new();
        let fields = registry.describe(&SchemaKind::BASE).unwrap();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "source_id",
                "process_id",
                "validated",
                "promoted_to",
                "execution_signature",
                "timestamp_last_touched",
                "data_payload",
            ]
        );
        assert!(fields.iter().filter(|f| f.required).count() == 5);
    }

    #[test]
    fn test_builtin_kinds_registered() {
        let registry = ContractRegistry::new();
        assert_eq!(
            registry.kinds(),
            vec![
                SchemaKind::BASE,
                SchemaKind::COMMAND,
                SchemaKind::PROJECT,
                SchemaKind::TASK
            ]
        );
        assert!(ContractRegistry::base_only()
            .describe(&SchemaKind::COMMAND)
            .is_none());
    }

    #[test]
    fn test_register_custom_kind() {
        let mut registry = ContractRegistry::base_only();
        let kind = SchemaKind::new("Invoice");
        registry.register(
            kind.clone(),
            vec![FieldSpec::required("amount", FieldType::Number)],
        );
        assert_eq!(kind.as_str(), "invoice");
        assert_eq!(registry.describe(&kind).unwrap().len(), 1);
        assert!(kind.is_entity());
        assert!(!SchemaKind::BASE.is_entity());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("TASK".parse::<SchemaKind>().unwrap(), SchemaKind::TASK);
        assert_eq!(
            "widget".parse::<SchemaKind>().unwrap(),
            SchemaKind::new("widget")
        );
        assert_eq!(SchemaKind::new(" Project "), SchemaKind::PROJECT);
    }

    #[test]
    fn test_kind_deserialization_matches_parsing() {
        let kind: SchemaKind = serde_json::from_value(json!("Task")).unwrap();
        assert_eq!(kind, SchemaKind::TASK);
        assert_eq!(kind, "Task".parse::<SchemaKind>().unwrap());

        let custom: SchemaKind = serde_json::from_value(json!("WIDGET")).unwrap();
        assert_eq!(custom.as_str(), "widget");
        assert_eq!(serde_json::to_value(&custom).unwrap(), json!("widget"));
        assert!(serde_json::from_value::<SchemaKind>(json!(3)).is_err());
    }

    #[test]
    fn test_field_type_accepts() {
        assert!(FieldType::ValidationState.accepts(&json!(true)));
        assert!(FieldType::ValidationState.accepts(&json!("pending")));
        assert!(!FieldType::ValidationState.accepts(&json!(1)));
        assert!(FieldType::Timestamp.accepts(&json!("not yet parsed")));
        assert!(!FieldType::Object.accepts(&json!([])));
        assert!(FieldType::Any.accepts(&json!(null)));
    }
}

//! Error types for the doctrine core
//!
//! Two layers: [`ViolationReason`] is the field-level outcome produced by the
//! validator, [`DoctrineError`] is what the enforcer and formatter surface to
//! callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::{FieldType, SchemaKind};
use crate::formatter::Sink;

/// Field-level contract violation
///
/// The validator stops at the first failing check and returns exactly one of
/// these. Messages never embed the raw failing value; it is carried
/// separately so it can be sanitized before storage.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ViolationReason {
    /// A required field is absent or null
    #[error("required field '{field}' is missing")]
    MissingField { field: String },

    /// A field is present with the wrong JSON type
    #[error("field '{field}' must be {expected}, found {found}")]
    InvalidType {
        field: String,
        expected: FieldType,
        found: String,
        value: serde_json::Value,
    },

    /// A constrained field holds a value outside its allowed set
    #[error("field '{field}' must be one of [{}]", .allowed.join(", "))]
    InvalidEnumValue {
        field: String,
        allowed: Vec<String>,
        value: serde_json::Value,
    },

    /// A value-level constraint failed (non-empty, length, timestamp, uuid)
    #[error("field '{field}' violates constraint '{constraint}'")]
    ConstraintViolated {
        field: String,
        constraint: String,
        value: serde_json::Value,
    },

    /// No contract is registered for the requested kind
    #[error("no contract registered for schema kind '{kind}'")]
    UnknownSchema { kind: SchemaKind },
}

impl ViolationReason {
    /// Name of the field that failed (`$` for the candidate root)
    pub fn field(&self) -> &str {
        match self {
            ViolationReason::MissingField { field }
            | ViolationReason::InvalidType { field, .. }
            | ViolationReason::InvalidEnumValue { field, .. }
            | ViolationReason::ConstraintViolated { field, .. } => field,
            ViolationReason::UnknownSchema { .. } => "$",
        }
    }

    /// Short identifier of the rule that failed
    pub fn rule(&self) -> &'static str {
        match self {
            ViolationReason::MissingField { .. } => "required",
            ViolationReason::InvalidType { .. } => "type",
            ViolationReason::InvalidEnumValue { .. } => "enum",
            ViolationReason::ConstraintViolated { .. } => "constraint",
            ViolationReason::UnknownSchema { .. } => "schema",
        }
    }

    /// Raw failing value (null when the field was absent)
    pub fn value(&self) -> &serde_json::Value {
        static ABSENT: serde_json::Value = serde_json::Value::Null;
        match self {
            ViolationReason::InvalidType { value, .. }
            | ViolationReason::InvalidEnumValue { value, .. }
            | ViolationReason::ConstraintViolated { value, .. } => value,
            ViolationReason::MissingField { .. } | ViolationReason::UnknownSchema { .. } => &ABSENT,
        }
    }

    /// Prefix the field path, used when checking a nested contract layer
    pub(crate) fn nested_under(self, parent: &str) -> Self {
        let join = |field: String| {
            if field == "$" {
                parent.to_string()
            } else {
                format!("{}.{}", parent, field)
            }
        };
        match self {
            ViolationReason::MissingField { field } => ViolationReason::MissingField {
                field: join(field),
            },
            ViolationReason::InvalidType {
                field,
                expected,
                found,
                value,
            } => ViolationReason::InvalidType {
                field: join(field),
                expected,
                found,
                value,
            },
            ViolationReason::InvalidEnumValue {
                field,
                allowed,
                value,
            } => ViolationReason::InvalidEnumValue {
                field: join(field),
                allowed,
                value,
            },
            ViolationReason::ConstraintViolated {
                field,
                constraint,
                value,
            } => ViolationReason::ConstraintViolated {
                field: join(field),
                constraint,
                value,
            },
            other @ ViolationReason::UnknownSchema { .. } => other,
        }
    }
}

/// Errors surfaced by the enforcer, formatter and supporting services
#[derive(Error, Debug)]
pub enum DoctrineError {
    /// Strict-mode validation failure
    #[error("contract violation in {tool}.{operation}: {reason}")]
    ContractViolation {
        tool: String,
        operation: String,
        #[source]
        reason: ViolationReason,
    },

    /// The shared enforcer handle was used before an enforcer was installed
    #[error("doctrine enforcer used before initialization")]
    NotInitialized,

    /// The shared enforcer handle already holds an enforcer
    #[error("doctrine enforcer is already initialized")]
    AlreadyInitialized,

    /// Enforcement requested without naming the producing tool
    #[error("tool name is required for doctrine enforcement")]
    MissingToolName,

    /// Formatter received a record it must not project
    #[error("record cannot be projected for {sink} sink: {reason}")]
    SinkMismatch { sink: Sink, reason: String },

    /// A sink target name is not a plain identifier
    #[error("invalid sink identifier: {0}")]
    InvalidIdentifier(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// File access or I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DoctrineError {
    /// Field-level cause, when this error wraps a contract violation
    pub fn violation(&self) -> Option<&ViolationReason> {
        match self {
            DoctrineError::ContractViolation { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Whether the caller can fix the input and retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DoctrineError::ContractViolation { .. }
                | DoctrineError::MissingToolName
                | DoctrineError::InvalidIdentifier(_)
        )
    }
}

impl From<serde_json::Error> for DoctrineError {
    fn from(err: serde_json::Error) -> Self {
        DoctrineError::Serialization(format!("JSON error: {}", err))
    }
}

/// Result type alias for doctrine operations
pub type Result<T> = std::result::Result<T, DoctrineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reason_accessors() {
        let reason = ViolationReason::InvalidType {
            field: "source_id".to_string(),
            expected: FieldType::String,
            found: "number".to_string(),
            value: json!(42),
        };
        assert_eq!(reason.field(), "source_id");
        assert_eq!(reason.rule(), "type");
        assert_eq!(reason.value(), &json!(42));

        let missing = ViolationReason::MissingField {
            field: "process_id".to_string(),
        };
        assert_eq!(missing.value(), &serde_json::Value::Null);
        assert_eq!(missing.to_string(), "required field 'process_id' is missing");
    }

    #[test]
    fn test_messages_do_not_embed_values() {
        let reason = ViolationReason::ConstraintViolated {
            field: "password".to_string(),
            constraint: "non_empty".to_string(),
            value: json!("hunter2"),
        };
        assert!(!reason.to_string().contains("hunter2"));
    }

    #[test]
    fn test_nested_under() {
        let reason = ViolationReason::MissingField {
            field: "name".to_string(),
        }
        .nested_under("data_payload");
        assert_eq!(reason.field(), "data_payload.name");

        let root = ViolationReason::InvalidType {
            field: "$".to_string(),
            expected: FieldType::Object,
            found: "string".to_string(),
            value: json!("x"),
        }
        .nested_under("data_payload");
        assert_eq!(root.field(), "data_payload");
    }

    #[test]
    fn test_contract_violation_carries_cause() {
        let err = DoctrineError::ContractViolation {
            tool: "neon-sync".to_string(),
            operation: "insert".to_string(),
            reason: ViolationReason::MissingField {
                field: "source_id".to_string(),
            },
        };
        assert!(err.is_recoverable());
        assert_eq!(err.violation().map(|r| r.field()), Some("source_id"));
        assert!(err.to_string().contains("neon-sync.insert"));
        assert!(!DoctrineError::NotInitialized.is_recoverable());
    }
}

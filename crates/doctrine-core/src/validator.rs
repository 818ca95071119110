//! Contract validator
//!
//! Narrows an untyped candidate into a [`BaseRecord`] (or an [`EntityRecord`]).
//! Checks run in four passes over the contract's field specs: presence, type,
//! enum membership, then value constraints. The first failing check wins.
//!
//! The validator holds no mutable state and never logs; callers that need an
//! audit trail go through the enforcer.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::contracts::{json_type_name, ContractRegistry, FieldSpec, FieldType, SchemaKind};
use crate::error::ViolationReason;
use crate::record::{parse_timestamp, BaseRecord, EntityRecord, ValidationState};

const PAYLOAD_FIELD: &str = "data_payload";

/// Validates candidates against the registered contracts
#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<ContractRegistry>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Arc::new(ContractRegistry::new()))
    }
}

impl Validator {
    pub fn new(registry: Arc<ContractRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Validate a candidate envelope
    ///
    /// For an entity kind the envelope is checked first, then `data_payload`
    /// is required and checked against the entity contract. Violations inside
    /// the payload are reported as `data_payload.<field>`.
    pub fn validate(&self, candidate: &Value, kind: &SchemaKind) -> Result<BaseRecord, ViolationReason> {
        let base = self.contract(&SchemaKind::BASE)?;
        let entity = if kind.is_entity() {
            Some(self.contract(kind)?)
        } else {
            None
        };

        let fields = check_fields(candidate, base)?;

        if let Some(entity) = entity {
            let payload = fields.get(PAYLOAD_FIELD).ok_or_else(|| ViolationReason::MissingField {
                field: PAYLOAD_FIELD.to_string(),
            })?;
            check_fields(payload, entity).map_err(|reason| reason.nested_under(PAYLOAD_FIELD))?;
        }

        into_base_record(fields)
    }

    /// Validate a bare entity (or any registered kind) and apply its defaults
    pub fn validate_entity(&self, value: &Value, kind: &SchemaKind) -> Result<EntityRecord, ViolationReason> {
        let specs = self.contract(kind)?;
        let fields = check_fields(value, specs)?;
        Ok(EntityRecord::new(kind.clone(), fields))
    }

    fn contract(&self, kind: &SchemaKind) -> Result<&[FieldSpec], ViolationReason> {
        self.registry
            .describe(kind)
            .ok_or_else(|| ViolationReason::UnknownSchema { kind: kind.clone() })
    }
}

/// A present field; JSON null counts as absent
fn present<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    map.get(name).filter(|value| !value.is_null())
}

/// Run the four passes and return the declared fields, defaults applied
fn check_fields(candidate: &Value, specs: &[FieldSpec]) -> Result<Map<String, Value>, ViolationReason> {
    let map = candidate.as_object().ok_or_else(|| ViolationReason::InvalidType {
        field: "$".to_string(),
        expected: FieldType::Object,
        found: json_type_name(candidate).to_string(),
        value: candidate.clone(),
    })?;

    for spec in specs.iter().filter(|spec| spec.required) {
        if present(map, &spec.name).is_none() {
            return Err(ViolationReason::MissingField {
                field: spec.name.clone(),
            });
        }
    }

    for spec in specs {
        if let Some(value) = present(map, &spec.name) {
            if !spec.field_type.accepts(value) {
                return Err(ViolationReason::InvalidType {
                    field: spec.name.clone(),
                    expected: spec.field_type,
                    found: json_type_name(value).to_string(),
                    value: value.clone(),
                });
            }
        }
    }

    for spec in specs.iter().filter(|spec| !spec.allowed_values.is_empty()) {
        // Enum sets constrain string values only; a boolean validation flag passes
        if let Some(Value::String(s)) = present(map, &spec.name) {
            if !spec.allowed_values.iter().any(|allowed| allowed == s) {
                return Err(ViolationReason::InvalidEnumValue {
                    field: spec.name.clone(),
                    allowed: spec.allowed_values.clone(),
                    value: Value::String(s.clone()),
                });
            }
        }
    }

    for spec in specs {
        if let Some(value) = present(map, &spec.name) {
            if let Some(constraint) = failed_constraint(spec, value) {
                return Err(ViolationReason::ConstraintViolated {
                    field: spec.name.clone(),
                    constraint,
                    value: value.clone(),
                });
            }
        }
    }

    let mut fields = Map::new();
    for spec in specs {
        match (present(map, &spec.name), &spec.default) {
            (Some(value), _) => {
                fields.insert(spec.name.clone(), value.clone());
            }
            (None, Some(default)) => {
                fields.insert(spec.name.clone(), default.clone());
            }
            (None, None) => {}
        }
    }
    Ok(fields)
}

fn failed_constraint(spec: &FieldSpec, value: &Value) -> Option<String> {
    let s = value.as_str()?;
    let length = s.chars().count();

    if let Some(min) = spec.min_length {
        if length < min {
            return Some(if min == 1 {
                "non_empty".to_string()
            } else {
                format!("min_length:{}", min)
            });
        }
    }
    if let Some(max) = spec.max_length {
        if length > max {
            return Some(format!("max_length:{}", max));
        }
    }

    match spec.field_type {
        FieldType::Timestamp if parse_timestamp(s).is_none() => Some("rfc3339_timestamp".to_string()),
        FieldType::Uuid if uuid::Uuid::parse_str(s).is_err() => Some("uuid".to_string()),
        _ => None,
    }
}

fn take_string(fields: &mut Map<String, Value>, name: &str) -> Result<String, ViolationReason> {
    match fields.remove(name) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(ViolationReason::MissingField {
            field: name.to_string(),
        }),
    }
}

fn into_base_record(mut fields: Map<String, Value>) -> Result<BaseRecord, ViolationReason> {
    let source_id = take_string(&mut fields, "source_id")?;
    let process_id = take_string(&mut fields, "process_id")?;
    let execution_signature = take_string(&mut fields, "execution_signature")?;

    let raw_state = fields.remove("validated").unwrap_or(Value::Null);
    let validated = ValidationState::from_value(&raw_state).ok_or_else(|| ViolationReason::MissingField {
        field: "validated".to_string(),
    })?;

    let raw_timestamp = take_string(&mut fields, "timestamp_last_touched")?;
    let timestamp_last_touched =
        parse_timestamp(&raw_timestamp).ok_or_else(|| ViolationReason::ConstraintViolated {
            field: "timestamp_last_touched".to_string(),
            constraint: "rfc3339_timestamp".to_string(),
            value: Value::String(raw_timestamp.clone()),
        })?;

    let promoted_to = match fields.remove("promoted_to") {
        Some(Value::String(stage)) => Some(stage),
        _ => None,
    };
    let data_payload = match fields.remove(PAYLOAD_FIELD) {
        Some(Value::Object(payload)) => Some(payload),
        _ => None,
    };

    Ok(BaseRecord::from_parts(
        source_id,
        process_id,
        validated,
        promoted_to,
        execution_signature,
        timestamp_last_touched,
        data_payload,
    ))
}

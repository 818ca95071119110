//! Entity contracts carried inside `data_payload`
//!
//! Command, task and project payloads written by the command-center tools.

use serde_json::json;

use super::{FieldSpec, FieldType};

pub const PRIORITIES: [&str; 4] = ["low", "medium", "high", "critical"];

pub const COMMAND_STATUSES: [&str; 4] = ["active", "inactive", "draft", "archived"];

pub const TASK_STATUSES: [&str; 4] = ["pending", "in_progress", "completed", "failed"];

pub const PROJECT_STATUSES: [&str; 5] = ["planning", "active", "on_hold", "completed", "cancelled"];

fn priority() -> FieldSpec {
    FieldSpec::optional("priority", FieldType::String)
        .one_of(PRIORITIES)
        .with_default(json!("medium"))
}

fn timestamps() -> [FieldSpec; 2] {
    [
        FieldSpec::required("created_at", FieldType::Timestamp),
        FieldSpec::required("updated_at", FieldType::Timestamp),
    ]
}

pub fn command_fields() -> Vec<FieldSpec> {
    let mut fields = vec![
        FieldSpec::required("id", FieldType::Uuid),
        FieldSpec::required("name", FieldType::String)
            .non_empty()
            .max_length(255),
        FieldSpec::optional("description", FieldType::String),
        FieldSpec::required("category", FieldType::String).non_empty(),
        FieldSpec::required("status", FieldType::String).one_of(COMMAND_STATUSES),
        priority(),
    ];
    fields.extend(timestamps());
    fields.push(FieldSpec::optional("metadata", FieldType::Object));
    fields
}

pub fn task_fields() -> Vec<FieldSpec> {
    let mut fields = vec![
        FieldSpec::required("id", FieldType::Uuid),
        FieldSpec::required("command_id", FieldType::Uuid),
        FieldSpec::required("title", FieldType::String).non_empty(),
        FieldSpec::optional("description", FieldType::String),
        FieldSpec::required("status", FieldType::String).one_of(TASK_STATUSES),
        priority(),
        FieldSpec::optional("assigned_to", FieldType::String),
        FieldSpec::optional("due_date", FieldType::Timestamp),
    ];
    fields.extend(timestamps());
    fields.push(FieldSpec::optional("metadata", FieldType::Object));
    fields
}

pub fn project_fields() -> Vec<FieldSpec> {
    let mut fields = vec![
        FieldSpec::required("id", FieldType::Uuid),
        FieldSpec::required("name", FieldType::String)
            .non_empty()
            .max_length(255),
        FieldSpec::optional("description", FieldType::String),
        FieldSpec::required("status", FieldType::String).one_of(PROJECT_STATUSES),
        priority(),
        FieldSpec::optional("start_date", FieldType::Timestamp),
        FieldSpec::optional("end_date", FieldType::Timestamp),
    ];
    fields.extend(timestamps());
    fields.push(FieldSpec::optional("metadata", FieldType::Object));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_defaults_to_medium() {
        for fields in [command_fields(), task_fields(), project_fields()] {
            let priority = fields.iter().find(|f| f.name == "priority").unwrap();
            assert!(!priority.required);
            assert_eq!(priority.default, Some(json!("medium")));
        }
    }

    #[test]
    fn test_task_references_command() {
        let fields = task_fields();
        let command_id = fields.iter().find(|f| f.name == "command_id").unwrap();
        assert_eq!(command_id.field_type, FieldType::Uuid);
        assert!(command_id.required);
    }
}

//! Property tests for the validator and formatter

use doctrine_core::{normalize, Formatter, SchemaKind, Sink, Validator, ViolationReason};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

const REQUIRED: [&str; 5] = [
    "source_id",
    "process_id",
    "validated",
    "execution_signature",
    "timestamp_last_touched",
];

fn validation_state() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        prop::sample::select(vec!["pending", "approved", "rejected"]).prop_map(Value::from),
    ]
}

fn payload() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..5).prop_map(|entries| {
        entries
            .into_iter()
            // Keep payload keys clear of envelope column names
            .map(|(k, v)| (format!("p_{}", k), Value::from(v)))
            .collect()
    })
}

fn candidate() -> impl Strategy<Value = Value> {
    (
        "[a-z][a-z0-9-]{0,15}",
        "[a-z][a-z0-9_]{0,15}",
        validation_state(),
        prop::option::of("[a-z]{1,10}"),
        "[0-9a-f]{32}",
        0i64..4_000_000_000,
        prop::option::of(payload()),
    )
        .prop_map(|(source, process, state, promoted, signature, secs, payload)| {
            let mut value = json!({
                "source_id": source,
                "process_id": process,
                "validated": state,
                "execution_signature": signature,
                "timestamp_last_touched": chrono::DateTime::from_timestamp(secs, 0)
                    .unwrap()
                    .to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            });
            if let Some(promoted) = promoted {
                value["promoted_to"] = Value::from(promoted);
            }
            if let Some(payload) = payload {
                value["data_payload"] = Value::Object(payload);
            }
            value
        })
}

proptest! {
    #[test]
    fn well_formed_candidates_validate_field_equal(candidate in candidate()) {
        let record = Validator::default().validate(&candidate, &SchemaKind::BASE).unwrap();
        prop_assert_eq!(record.to_value(), candidate);
    }

    #[test]
    fn missing_required_field_is_named(candidate in candidate(), index in 0..REQUIRED.len()) {
        let mut candidate = candidate;
        let field = REQUIRED[index];
        candidate.as_object_mut().unwrap().remove(field);

        let err = Validator::default().validate(&candidate, &SchemaKind::BASE).unwrap_err();
        prop_assert_eq!(err, ViolationReason::MissingField { field: field.to_string() });
    }

    #[test]
    fn formatting_is_idempotent(candidate in candidate()) {
        let record = Validator::default().validate(&candidate, &SchemaKind::BASE).unwrap();
        let formatter = Formatter::new();
        for sink in Sink::ALL {
            prop_assert_eq!(formatter.format(&record, sink).unwrap(), formatter.format(&record, sink).unwrap());
        }
    }

    #[test]
    fn document_rows_normalize_to_the_record(candidate in candidate()) {
        let record = Validator::default().validate(&candidate, &SchemaKind::BASE).unwrap();
        let row = Formatter::new().format(&record, Sink::Document).unwrap().into_value();
        prop_assert_eq!(normalize(&row).unwrap(), record);
    }
}

//! Unit tests for task binding.

use std::collections::HashSet;
use once_cell::sync::OnceCell;

use rstest::{fixture, rstest};
use serde::Deserialize;
use serde_json::{Value, json};

use super::*;
use crate::data_source::{DataSource, TaskSource};
use crate::error::ConfigError;
use crate::plugin_type::PluginType;

fn column_descriptor() -> &'static TaskDescriptor {
    static DESCRIPTOR: OnceCell<TaskDescriptor> = OnceCell::new();
    DESCRIPTOR.get_or_init(|| {
        TaskDescriptor::builder("ColumnConfig")
            .field(FieldSpec::config("Name", "name", FieldType::String))
            .field(FieldSpec::config("Type", "type", FieldType::String).with_default("\"string\""))
            .validator(Rules::new().non_empty("Name"))
            .build()
            .expect("column descriptor")
    })
}

fn parser_descriptor() -> &'static TaskDescriptor {
    static DESCRIPTOR: OnceCell<TaskDescriptor> = OnceCell::new();
    DESCRIPTOR.get_or_init(|| {
        TaskDescriptor::builder("CsvParserTask")
            .field(FieldSpec::config("Delimiter", "delimiter", FieldType::String).with_default("\",\""))
            .field(FieldSpec::config("SkipHeaderLines", "skip_header_lines", FieldType::Integer).with_default("0"))
            .field(FieldSpec::config("Charset", "charset", FieldType::optional(FieldType::String)))
            .field(FieldSpec::config("Columns", "columns", FieldType::list(FieldType::Task(column_descriptor))))
            .field(FieldSpec::config("Decoder", "decoder", FieldType::PluginType).with_default("\"gzip\""))
            .field(FieldSpec::keyless("ResolvedPath", FieldType::String))
            .validator(Rules::new().min("SkipHeaderLines", 0))
            .build()
            .expect("parser descriptor")
    })
}

#[fixture]
fn csv_config() -> DataSource {
    DataSource::from_value(json!({
        "delimiter": "\t",
        "skip_header_lines": "1",
        "columns": [{"name": "id", "type": "long"}, {"name": "label"}],
        "decoder": {"source": "maven", "group": "org.embulk", "name": "zstd", "version": "1.0"},
        "unused_option": true,
    }))
    .expect("config")
}

// ---------------------------------------------------------------------------
// Config mode
// ---------------------------------------------------------------------------

#[rstest]
fn config_mode_applies_keys_defaults_and_coercion(csv_config: DataSource) {
    let task = csv_config.load_config(parser_descriptor()).expect("bind");
    assert_eq!(task.get::<String>("Delimiter").expect("delimiter"), "\t");
    assert_eq!(task.get::<i64>("SkipHeaderLines").expect("skip"), 1);
    assert_eq!(task.get_value("Charset"), Some(&Value::Null));
    assert_eq!(task.get_value("ResolvedPath"), Some(&Value::Null));
    assert_eq!(
        task.get_value("Columns"),
        Some(&json!([
            {"Name": "id", "Type": "long"},
            {"Name": "label", "Type": "string"},
        ]))
    );
    assert_eq!(
        task.get::<PluginType>("Decoder").expect("decoder"),
        PluginType::versioned("org.embulk", "zstd", Some("1.0"))
    );
}

#[rstest]
fn unknown_keys_are_ignored(csv_config: DataSource) {
    let task = csv_config.load_config(parser_descriptor()).expect("bind");
    assert!(task.get_value("unused_option").is_none());
    assert_eq!(task.fields().len(), parser_descriptor().fields().len());
}

#[test]
fn keyless_fields_ignore_same_named_input_in_config_mode() {
    let config = DataSource::from_value(json!({"columns": [], "ResolvedPath": "/tmp/x"}))
        .expect("config");
    let task = config.load_config(parser_descriptor()).expect("bind");
    assert_eq!(task.get_value("ResolvedPath"), Some(&Value::Null));
}

#[test]
fn fields_sharing_a_key_are_all_filled() {
    let descriptor = TaskDescriptor::builder("Shared")
        .field(FieldSpec::config("Raw", "limit", FieldType::Json))
        .field(FieldSpec::config("Text", "limit", FieldType::String))
        .build()
        .expect("descriptor");
    let config = DataSource::from_value(json!({"limit": 10})).expect("config");
    let task = config.load_config(&descriptor).expect("bind");
    assert_eq!(task.get_value("Raw"), Some(&json!(10)));
    assert_eq!(task.get_value("Text"), Some(&json!("10")));
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn every_missing_field_is_reported() {
    let descriptor = TaskDescriptor::builder("HttpTask")
        .field(FieldSpec::config("Host", "host", FieldType::String))
        .field(FieldSpec::config("Port", "port", FieldType::Integer))
        .field(FieldSpec::config("Path", "path", FieldType::String).with_default("\"/\""))
        .build()
        .expect("descriptor");
    let err = DataSource::new()
        .load_config(&descriptor)
        .expect_err("missing fields");
    let ConfigError::MissingRequiredFields { task, fields } = err else {
        panic!("expected MissingRequiredFields, got {err}");
    };
    assert_eq!(task, "HttpTask");
    assert_eq!(fields, ["Host", "Port"]);
}

#[test]
fn nested_missing_fields_carry_their_path() {
    let config = DataSource::from_value(json!({"columns": [{"type": "long"}, {}]}))
        .expect("config");
    let err = config
        .load_config(parser_descriptor())
        .expect_err("missing nested names");
    let ConfigError::MissingRequiredFields { fields, .. } = err else {
        panic!("expected MissingRequiredFields, got {err}");
    };
    assert_eq!(fields, ["Columns[0].Name", "Columns[1].Name"]);
}

#[rstest]
#[case::integer_text(json!({"columns": [], "skip_header_lines": "one"}), "SkipHeaderLines")]
#[case::list_scalar(json!({"columns": "id"}), "Columns")]
#[case::nested_scalar(json!({"columns": [5]}), "Columns[0]")]
#[case::plugin_number(json!({"columns": [], "decoder": 3}), "Decoder")]
#[case::string_from_array(json!({"columns": [], "delimiter": [","]}), "Delimiter")]
fn type_mismatches_name_the_field(#[case] input: Value, #[case] field_path: &str) {
    let config = DataSource::from_value(input).expect("config");
    let err = config
        .load_config(parser_descriptor())
        .expect_err("type mismatch");
    assert!(
        matches!(err, ConfigError::InvalidField { ref field, .. } if field == field_path),
        "unexpected error: {err}"
    );
}

#[test]
fn violations_are_aggregated_with_paths() {
    let config = DataSource::from_value(json!({
        "skip_header_lines": -1,
        "columns": [{"name": ""}],
    }))
    .expect("config");
    let err = config
        .load_config(parser_descriptor())
        .expect_err("validation");
    let ConfigError::ValidationFailed { task, violations } = err else {
        panic!("expected ValidationFailed, got {err}");
    };
    assert_eq!(task, "CsvParserTask");
    let paths: Vec<&str> = violations.iter().map(Violation::field_path).collect();
    assert_eq!(paths, ["Columns[0].Name", "SkipHeaderLines"]);
    assert_eq!(
        violations.get(1).map(Violation::invalid_value),
        Some(&json!(-1))
    );
}

#[test]
fn closure_validators_are_consulted() {
    let descriptor = TaskDescriptor::builder("Range")
        .field(FieldSpec::config("From", "from", FieldType::Integer))
        .field(FieldSpec::config("To", "to", FieldType::Integer))
        .validator(|task: &BoundTask| {
            let from = task.get::<i64>("From").unwrap_or_default();
            let to = task.get::<i64>("To").unwrap_or_default();
            if from > to {
                vec![Violation::new("To", "must not precede From", json!(to))]
            } else {
                Vec::new()
            }
        })
        .build()
        .expect("descriptor");
    let config = DataSource::from_value(json!({"from": 5, "to": 2})).expect("config");
    let err = config.load_config(&descriptor).expect_err("invalid range");
    assert!(err.to_string().contains("To: must not precede From (value: 2)"));
}

#[rstest]
#[case::empty_name(TaskDescriptor::builder(" "), "task name")]
#[case::duplicate_field(
    TaskDescriptor::builder("Dup")
        .field(FieldSpec::config("A", "a", FieldType::Bool))
        .field(FieldSpec::config("A", "b", FieldType::Bool)),
    "duplicate field 'A'"
)]
#[case::bad_default(
    TaskDescriptor::builder("Bad").field(FieldSpec::config("A", "a", FieldType::String).with_default("unquoted")),
    "not valid JSON"
)]
fn malformed_descriptors_are_rejected(#[case] builder: TaskDescriptorBuilder, #[case] expected: &str) {
    let err = builder.build().expect_err("invalid descriptor");
    assert!(matches!(err, ConfigError::InvalidDescriptor { .. }));
    assert!(err.to_string().contains(expected), "got: {err}");
}

// ---------------------------------------------------------------------------
// Task mode and dumping
// ---------------------------------------------------------------------------

#[rstest]
fn dump_uses_field_names(csv_config: DataSource) {
    let task = csv_config.load_config(parser_descriptor()).expect("bind");
    let dumped = TaskBinder::serialize(&task);
    let names: Vec<&str> = dumped.attribute_names().collect();
    assert_eq!(
        names,
        ["Delimiter", "SkipHeaderLines", "Charset", "Columns", "Decoder", "ResolvedPath"]
    );
    assert!(!dumped.has("delimiter"));
}

#[rstest]
fn task_mode_round_trips_dumped_tasks(csv_config: DataSource) {
    let task = csv_config
        .load_config(parser_descriptor())
        .expect("bind")
        .with_field("ResolvedPath", "/data/in.csv")
        .expect("fill keyless field");
    let dumped: TaskSource = task.dump();
    let rebound = dumped.load_task(parser_descriptor()).expect("rebind");
    assert_eq!(rebound, task);
    assert_eq!(
        rebound.get::<String>("ResolvedPath").expect("path"),
        "/data/in.csv"
    );
}

#[test]
fn task_mode_survives_json_text_round_trip() {
    let config = DataSource::from_value(json!({"columns": [{"name": "id"}]})).expect("config");
    let task = config.load_config(parser_descriptor()).expect("bind");
    let text = serde_json::to_string(&task).expect("encode");
    let reread = TaskSource::from_json_str(&text).expect("decode");
    assert_eq!(
        TaskBinder::task()
            .bind(parser_descriptor(), &reread)
            .expect("rebind"),
        task
    );
}

#[test]
fn nested_tasks_rebind_with_their_descriptor() {
    let descriptor = TaskDescriptor::builder("Outer")
        .field(FieldSpec::config("Column", "column", FieldType::Task(column_descriptor)))
        .build()
        .expect("descriptor");
    let config = DataSource::from_value(json!({"column": {"name": "id"}})).expect("config");
    let task = config.load_config(&descriptor).expect("bind");
    let column = task.nested("Column", column_descriptor()).expect("nested");
    assert_eq!(column.descriptor_name(), "ColumnConfig");
    assert_eq!(column.get::<String>("Type").expect("type"), "string");
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[test]
fn equality_and_hash_ignore_descriptor_name() {
    let first = TaskDescriptor::builder("First")
        .field(FieldSpec::config("A", "a", FieldType::Integer))
        .build()
        .expect("descriptor");
    let second = TaskDescriptor::builder("Second")
        .field(FieldSpec::config("A", "a", FieldType::Integer))
        .build()
        .expect("descriptor");
    let config = DataSource::from_value(json!({"a": 1})).expect("config");
    let left = config.load_config(&first).expect("bind");
    let right = config.load_config(&second).expect("bind");
    assert_eq!(left, right);
    let set: HashSet<BoundTask> = [left.clone(), right].into_iter().collect();
    assert_eq!(set.len(), 1);
    assert_eq!(left.to_string(), r#"First{"A":1}"#);
}

#[test]
fn with_field_rejects_undescribed_fields() {
    let config = DataSource::from_value(json!({"columns": []})).expect("config");
    let task = config.load_config(parser_descriptor()).expect("bind");
    let err = task.with_field("Nope", &1).expect_err("unknown field");
    assert!(matches!(err, ConfigError::UnknownField { .. }));
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct ColumnConfig {
    name: String,
    #[serde(rename = "Type")]
    column_type: String,
}

#[test]
fn bound_tasks_decode_into_plain_structs() {
    let config = DataSource::from_value(json!({"name": "id", "type": "long"})).expect("config");
    let task = config.load_config(column_descriptor()).expect("bind");
    let typed: ColumnConfig = task.to_typed().expect("typed");
    assert_eq!(
        typed,
        ColumnConfig {
            name: "id".to_owned(),
            column_type: "long".to_owned(),
        }
    );
}

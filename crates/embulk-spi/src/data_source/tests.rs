//! Unit tests for structured values.

use rstest::rstest;
use serde_json::{Value, json};

use super::*;

fn source(value: Value) -> DataSource {
    DataSource::from_value(value).expect("mapping")
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[rstest]
#[case::nested_mappings(json!({"a": {"x": 1}}), json!({"a": {"y": 2}}), json!({"a": {"x": 1, "y": 2}}))]
#[case::shorter_array(json!({"a": [1, 2]}), json!({"a": [9]}), json!({"a": [9, 2]}))]
#[case::longer_array(json!({"a": [1]}), json!({"a": [1, 2, 3]}), json!({"a": [1, 2, 3]}))]
#[case::array_of_mappings(
    json!({"a": [{"x": 1}, {"y": 1}]}),
    json!({"a": [{"z": 2}]}),
    json!({"a": [{"x": 1, "z": 2}, {"y": 1}]})
)]
#[case::nested_arrays(json!({"a": [[1, 2], 3]}), json!({"a": [[7]]}), json!({"a": [[7, 2], 3]}))]
#[case::mismatched_element_kinds(json!({"a": [{"x": 1}]}), json!({"a": [[1]]}), json!({"a": [[1]]}))]
#[case::scalar_replaces_mapping(json!({"a": {"x": 1}}), json!({"a": 5}), json!({"a": 5}))]
#[case::mapping_replaces_array(json!({"a": [1]}), json!({"a": {"x": 1}}), json!({"a": {"x": 1}}))]
#[case::new_key_added(json!({"a": 1}), json!({"b": 2}), json!({"a": 1, "b": 2}))]
#[case::null_replaces(json!({"a": {"x": 1}}), json!({"a": null}), json!({"a": null}))]
fn merge_follows_literal_rules(
    #[case] target: Value,
    #[case] diff: Value,
    #[case] expected: Value,
) {
    let mut merged = source(target);
    merged.merge(&source(diff));
    assert_eq!(merged.to_value(), expected);
}

#[rstest]
#[case::flat(json!({"a": 1, "b": "x"}))]
#[case::nested(json!({"a": {"b": {"c": [1, 2, {"d": true}]}}}))]
#[case::arrays(json!({"a": [[1], [2, 3]], "b": []}))]
fn merge_with_self_is_identity(#[case] value: Value) {
    let original = source(value);
    let mut merged = original.deep_copy();
    merged.merge(&original);
    assert_eq!(merged, original);
}

#[test]
fn merge_preserves_target_key_order() {
    let mut merged = source(json!({"b": 1, "a": 2}));
    merged.merge(&source(json!({"c": 3, "b": 4})));
    let names: Vec<&str> = merged.attribute_names().collect();
    assert_eq!(names, ["b", "a", "c"]);
}

// ---------------------------------------------------------------------------
// Set
// ---------------------------------------------------------------------------

#[test]
fn set_replaces_nested_mapping_wholesale() {
    let mut value = source(json!({"a": {"x": 1}}));
    value.set("a", &json!({"y": 2})).expect("set");
    assert_eq!(value.to_value(), json!({"a": {"y": 2}}));
}

#[test]
fn set_all_is_shallow() {
    let mut value = source(json!({"a": {"x": 1}, "b": [1, 2]}));
    value.set_all(&source(json!({"a": {"y": 2}, "b": [9]})));
    assert_eq!(value.to_value(), json!({"a": {"y": 2}, "b": [9]}));
}

#[test]
fn last_write_wins() {
    let mut value = DataSource::new();
    value.set("k", "first").expect("set");
    value.set("k", "second").expect("set");
    assert_eq!(value.len(), 1);
    assert_eq!(value.get::<String>("k").expect("get"), "second");
}

// ---------------------------------------------------------------------------
// Copy and access
// ---------------------------------------------------------------------------

#[test]
fn deep_copy_does_not_alias() {
    let original = source(json!({"a": {"x": [1]}}));
    let mut copy = original.deep_copy();
    copy.get_nested_or_set_empty("a")
        .expect("nested")
        .insert("x".to_owned(), json!([2]));
    assert_eq!(original.to_value(), json!({"a": {"x": [1]}}));
    assert_eq!(copy.to_value(), json!({"a": {"x": [2]}}));
}

#[test]
fn typed_get_reports_missing_and_invalid() {
    let value = source(json!({"n": "text"}));
    let missing = value.get::<i64>("absent").expect_err("missing");
    assert!(matches!(missing, ConfigError::MissingKey { ref key } if key == "absent"));
    let invalid = value.get::<i64>("n").expect_err("invalid");
    assert!(matches!(invalid, ConfigError::InvalidValue { ref key, .. } if key == "n"));
}

#[test]
fn optional_access_treats_null_as_absent() {
    let value = source(json!({"n": null, "m": 3}));
    assert_eq!(value.get_optional::<i64>("n").expect("null"), None);
    assert_eq!(value.get_optional::<i64>("absent").expect("absent"), None);
    assert_eq!(value.get_or("absent", 7_i64).expect("default"), 7);
    assert_eq!(value.get_or("m", 7_i64).expect("present"), 3);
}

#[test]
fn nested_access_rejects_scalars() {
    let value = source(json!({"a": 1}));
    assert!(matches!(
        value.get_nested("a"),
        Err(ConfigError::NotAnObject { found: "number" })
    ));
    assert!(matches!(
        value.get_nested("b"),
        Err(ConfigError::MissingKey { .. })
    ));
    assert!(value.get_nested_or_empty("b").expect("empty").is_empty());
}

#[test]
fn get_nested_or_set_empty_inserts_mapping() {
    let mut value = DataSource::new();
    value
        .get_nested_or_set_empty("out")
        .expect("nested")
        .insert("type".to_owned(), json!("stdout"));
    assert_eq!(value.to_value(), json!({"out": {"type": "stdout"}}));
}

#[test]
fn remove_keeps_remaining_order() {
    let mut value = source(json!({"a": 1, "b": 2, "c": 3}));
    assert_eq!(value.remove("b"), Some(json!(2)));
    assert!(!value.has("b"));
    assert_eq!(value.to_json_string(), r#"{"a":1,"c":3}"#);
}

#[rstest]
#[case::array("[1]", "array")]
#[case::string("\"x\"", "string")]
fn non_mapping_documents_are_rejected(#[case] text: &str, #[case] kind: &str) {
    let err = DataSource::from_json_str(text).expect_err("not an object");
    assert!(matches!(err, ConfigError::NotAnObject { found } if found == kind));
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[test]
fn config_diff_is_applied_with_merge() {
    let mut config = ConfigSource::from_json_str(r#"{"in": {"path": "a", "files": ["x"]}}"#)
        .expect("config");
    let diff = ConfigDiff::from_json_str(r#"{"in": {"files": ["y", "z"]}}"#).expect("diff");
    config.apply_diff(&diff);
    assert_eq!(
        config.to_value(),
        json!({"in": {"path": "a", "files": ["y", "z"]}})
    );
}

#[test]
fn roles_serialise_transparently() {
    let report = DataSource::from_json_str(r#"{"rows": 10}"#)
        .expect("json")
        .into_report();
    assert_eq!(serde_json::to_string(&report).expect("encode"), r#"{"rows":10}"#);
    let decoded: TaskReport = serde_json::from_str(r#"{"rows": 10}"#).expect("decode");
    assert_eq!(decoded, report);
}

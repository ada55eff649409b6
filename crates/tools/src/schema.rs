//! Argument validation against a tool's JSON parameter schema.
//!
//! Covers the subset tool schemas use: a top-level `object` with `required`
//! fields and per-property `type` (a string or a list of strings).

use serde_json::Value;
use skein_core::error::ToolFailure;

/// Check `arguments` against `schema`, collecting every missing required
/// field and every property of the wrong type.
pub fn validate(schema: &Value, arguments: &Value) -> Result<(), ToolFailure> {
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Ok(());
    }
    let Some(object) = arguments.as_object() else {
        return Err(ToolFailure::invalid_arguments(format!(
            "expected a JSON object, got {}",
            type_name(arguments)
        )));
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let missing: Vec<String> = required
        .iter()
        .filter(|name| object.get(**name).is_none_or(Value::is_null))
        .map(|name| name.to_string())
        .collect();

    let mut mismatched = Vec::new();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in object {
            let Some(expected) = properties.get(name).and_then(|p| p.get("type")) else {
                continue;
            };
            // An explicit null stands in for an absent optional field.
            if value.is_null() && !required.contains(&name.as_str()) {
                continue;
            }
            if !matches_type(expected, value) {
                mismatched.push(name.clone());
            }
        }
    }

    if missing.is_empty() && mismatched.is_empty() {
        Ok(())
    } else {
        Err(ToolFailure::InvalidArguments {
            missing,
            mismatched,
            reason: None,
        })
    }
}

fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => matches_named(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| matches_named(name, value)),
        // Unknown schema shapes are not enforced.
        _ => true,
    }
}

fn matches_named(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "limit": {"type": "integer"},
                "tags": {"type": ["array", "null"]}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn valid_arguments_pass() {
        assert!(validate(&schema(), &json!({"path": "a.txt", "limit": 3})).is_ok());
        assert!(validate(&schema(), &json!({"path": "a.txt", "tags": null, "extra": true})).is_ok());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = validate(&schema(), &json!({"limit": 3})).unwrap_err();
        assert_eq!(
            err,
            ToolFailure::InvalidArguments { missing: vec!["path".into()], mismatched: vec![], reason: None }
        );
        let err = validate(&schema(), &json!({"path": null})).unwrap_err();
        assert!(matches!(err, ToolFailure::InvalidArguments { missing, .. } if missing == ["path"]));
    }

    #[test]
    fn wrong_types_are_reported() {
        let err = validate(&schema(), &json!({"path": 7, "limit": 1.5})).unwrap_err();
        let ToolFailure::InvalidArguments { mut mismatched, missing, .. } = err else {
            panic!("expected InvalidArguments");
        };
        mismatched.sort();
        assert_eq!(mismatched, vec!["limit", "path"]);
        assert!(missing.is_empty());
    }

    #[test]
    fn non_object_arguments_rejected() {
        let err = validate(&schema(), &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ToolFailure::InvalidArguments { reason: Some(r), .. } if r.contains("array")));
    }
}

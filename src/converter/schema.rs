//!
//! Tool definition clean-up shared by the client converters.
//!
//! The backend accepts a narrow JSON-schema dialect and a restricted set of
//! function-name characters; client tool definitions are normalized to fit.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::{Map, Value, json};

/* --- constants ------------------------------------------------------------------------------- */

/// JSON-schema keywords the backend rejects
const UNSUPPORTED_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "definitions",
    "example",
    "examples",
    "readOnly",
    "writeOnly",
    "default",
    "exclusiveMaximum",
    "exclusiveMinimum",
    "oneOf",
    "anyOf",
    "allOf",
    "const",
    "additionalItems",
    "contains",
    "patternProperties",
    "dependencies",
    "propertyNames",
    "if",
    "then",
    "else",
    "contentEncoding",
    "contentMediaType",
];

const MAX_FUNCTION_NAME_LEN: usize = 64;

const UNNAMED_FUNCTION: &str = "_unnamed_function";

/* --- start of code -------------------------------------------------------------------------- */

///
/// Strip unsupported keywords from a parameter schema, recursively.
///
/// `type: [T, "null"]` becomes `type: T` plus `nullable: true`, and an object
/// schema with `properties` but no `type` gets `type: object`.
///
/// # Arguments
///  * `schema` - client-supplied JSON schema
///
/// # Returns
///  * Cleaned schema
pub fn clean_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(fields) => Value::Object(clean_object(fields)),
        Value::Array(items) => Value::Array(items.iter().map(clean_schema).collect()),
        other => other.clone(),
    }
}

fn clean_object(fields: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::new();
    for (key, value) in fields {
        if UNSUPPORTED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = match key.as_str() {
            // property names are user data, only their schemas get cleaned
            "properties" => match value {
                Value::Object(props) => Value::Object(
                    props.iter().map(|(name, s)| (name.clone(), clean_schema(s))).collect(),
                ),
                other => other.clone(),
            },
            "type" => match value {
                Value::Array(types) => {
                    let concrete: Vec<&Value> = types.iter().filter(|t| t.as_str() != Some("null")).collect();
                    if concrete.len() < types.len() {
                        cleaned.insert("nullable".to_string(), Value::Bool(true));
                    }
                    concrete.first().map(|t| (*t).clone()).unwrap_or_else(|| json!("string"))
                }
                other => other.clone(),
            },
            _ => clean_schema(value),
        };
        cleaned.insert(key.clone(), value);
    }

    if cleaned.contains_key("properties") && !cleaned.contains_key("type") {
        cleaned.insert("type".to_string(), json!("object"));
    }
    cleaned
}

///
/// Normalize a function name to `[A-Za-z_][A-Za-z0-9_.-]{0,63}`.
///
/// # Arguments
///  * `name` - client-supplied function name
///
/// # Returns
///  * Name accepted by the backend; identical to `name` when it already complies
pub fn normalize_function_name(name: &str) -> String {
    let mut normalized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
        .collect();

    if !normalized.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        normalized.insert(0, '_');
    }

    let mut collapsed = String::with_capacity(normalized.len());
    for c in normalized.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        return UNNAMED_FUNCTION.to_string();
    }
    // a leading digit or dash needs its underscore back after trimming
    let mut result = if trimmed.starts_with(|c: char| c.is_ascii_alphabetic()) {
        trimmed.to_string()
    } else {
        format!("_{}", trimmed)
    };
    result.truncate(MAX_FUNCTION_NAME_LEN);
    result
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_schema_strips_and_fixes_types() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "properties": {
                "default": {"type": "string", "default": "x"},
                "count": {"type": ["integer", "null"], "exclusiveMinimum": 0},
                "items": {"type": "array", "items": {"anyOf": [{"type": "string"}], "type": "string"}}
            },
            "required": ["count"],
            "additionalProperties": false
        });

        let cleaned = clean_schema(&schema);
        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": {
                    "default": {"type": "string"},
                    "count": {"type": "integer", "nullable": true},
                    "items": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["count"],
                "additionalProperties": false
            })
        );
    }

    #[test]
    fn test_normalize_function_name() {
        assert_eq!(normalize_function_name("get_weather"), "get_weather");
        assert_eq!(normalize_function_name("mcp__github__search"), "mcp_github_search");
        assert_eq!(normalize_function_name("read file!"), "read_file");
        assert_eq!(normalize_function_name("1st-tool"), "_1st-tool");
        assert_eq!(normalize_function_name("???"), "_unnamed_function");
        assert_eq!(normalize_function_name(&"a".repeat(80)).len(), 64);
    }
}

//! Update translation.
//!
//! Lowers `operator__field__path = value` update keywords into a native update
//! document such as `{"$set": {..}, "$inc": {..}}`. Field paths are translated
//! to on-wire names exactly as in queries; the segment `S` stands for the
//! positional operator `$`.

use docmap_core::{DocmapError, DocmapResult};

use super::compiler::COMPARISON_OPERATORS;
use crate::fields::{FieldDef, FieldType};
use crate::schema::{LookupPart, Schema};
use crate::value::{Json, Value, WireDoc};

/// Update operators recognised as the leading segment of an update key.
pub const UPDATE_OPERATORS: &[&str] = &[
    "set",
    "unset",
    "inc",
    "dec",
    "mul",
    "min",
    "max",
    "push",
    "push_all",
    "pull",
    "pull_all",
    "add_to_set",
    "pop",
    "rename",
    "set_on_insert",
];

/// The native name of an update operator.
fn native_operator(op: &str) -> &str {
    match op {
        "dec" => "inc",
        "push_all" => "push",
        "pull_all" => "pullAll",
        "add_to_set" => "addToSet",
        "set_on_insert" => "setOnInsert",
        other => other,
    }
}

/// Translates update keywords into an update document.
///
/// # Errors
///
/// Returns `LookupError` for unresolvable paths and `InvalidQuery` for values
/// of the wrong shape (a non-numeric `dec`, a non-list `push_all`).
///
/// # Examples
///
/// ```
/// use docmap_odm::fields::{FieldDef, FieldType};
/// use docmap_odm::query::update::translate_update;
/// use docmap_odm::schema::SchemaBuilder;
/// use docmap_odm::value::Value;
///
/// let schema = SchemaBuilder::document("Counter")
///     .field(FieldDef::new("hits", FieldType::int()).db_field("h"))
///     .field(FieldDef::new("name", FieldType::string()))
///     .build()
///     .unwrap();
///
/// let update = translate_update(
///     &schema,
///     &[("dec__hits".to_string(), Value::from(2_i64)), ("name".to_string(), Value::from("x"))],
/// )
/// .unwrap();
/// assert_eq!(
///     serde_json::Value::Object(update),
///     serde_json::json!({"$inc": {"h": -2}, "$set": {"name": "x"}})
/// );
/// ```
pub fn translate_update(schema: &Schema, spec: &[(String, Value)]) -> DocmapResult<WireDoc> {
    let mut update = WireDoc::new();
    for (key, value) in spec {
        let (op, entry) = translate_key(schema, key, value)?;
        let op_key = format!("${op}");
        match update.get_mut(&op_key) {
            Some(Json::Object(existing)) => existing.extend(entry),
            _ => {
                update.insert(op_key, Json::Object(entry));
            }
        }
    }
    Ok(update)
}

fn translate_key(schema: &Schema, key: &str, value: &Value) -> DocmapResult<(String, WireDoc)> {
    let mut parts: Vec<&str> = key.split("__").collect();
    let op = if parts.len() > 1 && UPDATE_OPERATORS.contains(&parts[0]) {
        parts.remove(0)
    } else {
        "set"
    };

    let mut matcher = None;
    if parts.len() > 1 && parts.last().is_some_and(|p| COMPARISON_OPERATORS.contains(p)) {
        matcher = parts.pop();
    }
    if parts.len() > 1 && parts.last() == Some(&"") {
        parts.pop();
    }

    let resolved = schema.lookup_field(&parts)?;
    let db_parts: Vec<String> = resolved
        .iter()
        .map(|part| match part {
            LookupPart::Raw("S") => "$".to_string(),
            other => other.db_name().to_string(),
        })
        .collect();
    let dynamic_field;
    let field = match resolved.iter().rev().find_map(LookupPart::field) {
        Some(field) => field,
        None => {
            dynamic_field = FieldDef::new(key, FieldType::Dynamic);
            &dynamic_field
        }
    };

    let value = if op == "dec" {
        negate(key, value)?
    } else {
        value.clone()
    };

    let prepared = match op {
        "unset" => Json::from(1),
        "pop" | "rename" => value.to_json(),
        "push_all" | "pull_all" => match &value {
            Value::List(items) => prepare_each(field, op, items.iter())?,
            _ => {
                return Err(DocmapError::InvalidQuery(format!(
                    "'{key}' needs a list of values"
                )))
            }
        },
        "pull" if matches!(matcher, Some("in" | "nin")) => match &value {
            Value::List(items) => prepare_each(field, op, items.iter())?,
            _ => value.to_json(),
        },
        "push" | "add_to_set" => match &value {
            Value::List(items) if !item_is_list(field) => prepare_each(field, op, items.iter())?,
            _ => field.prepare_query_value(Some(op), &value)?,
        },
        _ => field.prepare_query_value(Some(op), &value)?,
    };
    let prepared = match matcher {
        Some(m) => {
            let mut doc = WireDoc::new();
            doc.insert(format!("${m}"), prepared);
            Json::Object(doc)
        }
        None => prepared,
    };

    let mut entry = WireDoc::new();
    let is_list_value = matches!(value, Value::List(_)) && !item_is_list(field);
    match op {
        "push" | "push_all" => {
            let positional = db_parts
                .last()
                .and_then(|last| last.parse::<u64>().ok())
                .filter(|_| db_parts.len() > 1);
            if let Some(position) = positional {
                let path = db_parts[..db_parts.len() - 1].join(".");
                let each = match prepared {
                    Json::Array(items) => items,
                    single => vec![single],
                };
                entry.insert(
                    path,
                    serde_json::json!({"$each": each, "$position": position}),
                );
            } else if op == "push_all" || is_list_value {
                entry.insert(db_parts.join("."), serde_json::json!({ "$each": prepared }));
            } else {
                entry.insert(db_parts.join("."), prepared);
            }
        }
        "add_to_set" if is_list_value => {
            entry.insert(db_parts.join("."), serde_json::json!({ "$each": prepared }));
        }
        _ => {
            entry.insert(db_parts.join("."), prepared);
        }
    }
    Ok((native_operator(op).to_string(), entry))
}

/// Whether a list field holds lists, in which case a list value is one item.
fn item_is_list(field: &FieldDef) -> bool {
    matches!(
        field.item_field().map(|item| &item.field_type),
        Some(FieldType::List(_))
    )
}

fn prepare_each<'v>(
    field: &FieldDef,
    op: &str,
    items: impl Iterator<Item = &'v Value>,
) -> DocmapResult<Json> {
    items
        .map(|item| field.prepare_query_value(Some(op), item))
        .collect::<DocmapResult<Vec<_>>>()
        .map(Json::Array)
}

fn negate(key: &str, value: &Value) -> DocmapResult<Value> {
    match value {
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| {
            DocmapError::InvalidQuery(format!("'{key}' cannot negate {i} without overflow"))
        }),
        Value::Float(f) => Ok(Value::Float(-f)),
        _ => Err(DocmapError::InvalidQuery(format!(
            "'{key}' needs a numeric value"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::schema::SchemaBuilder;

    fn blog() -> Arc<Schema> {
        let comment = SchemaBuilder::embedded("UpdateComment")
            .field(FieldDef::new("text", FieldType::string()).db_field("t"))
            .field(FieldDef::new("votes", FieldType::int()))
            .build()
            .unwrap();
        SchemaBuilder::document("UpdatePost")
            .field(FieldDef::new("title", FieldType::string()))
            .field(FieldDef::new("hits", FieldType::int()).db_field("h"))
            .field(FieldDef::new("tags", FieldType::list(FieldType::string())))
            .field(FieldDef::new(
                "comments",
                FieldType::list(FieldType::Embedded(comment)),
            ))
            .build()
            .unwrap()
    }

    fn translate(pairs: &[(&str, Value)]) -> Json {
        let schema = blog();
        let spec: Vec<(String, Value)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        Json::Object(translate_update(&schema, &spec).unwrap())
    }

    #[test]
    fn test_implicit_set_and_merge() {
        assert_eq!(
            translate(&[("title", Value::from("a")), ("set__hits", Value::from(3_i64))]),
            json!({"$set": {"title": "a", "h": 3}})
        );
    }

    #[test]
    fn test_numeric_operators() {
        assert_eq!(
            translate(&[("inc__hits", Value::from(2_i64))]),
            json!({"$inc": {"h": 2}})
        );
        assert_eq!(
            translate(&[("dec__hits", Value::from(2_i64))]),
            json!({"$inc": {"h": -2}})
        );
        assert_eq!(
            translate(&[("mul__hits", Value::from(3_i64)), ("max__hits", Value::from(9_i64))]),
            json!({"$mul": {"h": 3}, "$max": {"h": 9}})
        );
    }

    #[test]
    fn test_dec_rejects_non_numeric() {
        let schema = blog();
        let err = translate_update(&schema, &[("dec__hits".into(), Value::from("x"))]).unwrap_err();
        assert!(matches!(err, DocmapError::InvalidQuery(_)));
    }

    #[test]
    fn test_dec_of_smallest_int_is_rejected() {
        let schema = blog();
        let err = translate_update(&schema, &[("dec__hits".into(), Value::from(i64::MIN))])
            .unwrap_err();
        assert!(matches!(err, DocmapError::InvalidQuery(_)));
        assert_eq!(
            translate(&[("dec__hits", Value::from(i64::MAX))]),
            json!({"$inc": {"h": -i64::MAX}})
        );
    }

    #[test]
    fn test_unset_pop_rename() {
        assert_eq!(
            translate(&[("unset__title", Value::from(true))]),
            json!({"$unset": {"title": 1}})
        );
        assert_eq!(
            translate(&[("pop__tags", Value::from(-1_i64))]),
            json!({"$pop": {"tags": -1}})
        );
        assert_eq!(
            translate(&[("rename__hits", Value::from("views"))]),
            json!({"$rename": {"h": "views"}})
        );
    }

    #[test]
    fn test_push_variants() {
        assert_eq!(
            translate(&[("push__tags", Value::from("x"))]),
            json!({"$push": {"tags": "x"}})
        );
        assert_eq!(
            translate(&[("push__tags", Value::list(["x", "y"]))]),
            json!({"$push": {"tags": {"$each": ["x", "y"]}}})
        );
        assert_eq!(
            translate(&[("push_all__tags", Value::list(["x"]))]),
            json!({"$push": {"tags": {"$each": ["x"]}}})
        );
        assert_eq!(
            translate(&[("push__tags__0", Value::from("first"))]),
            json!({"$push": {"tags": {"$each": ["first"], "$position": 0}}})
        );
    }

    #[test]
    fn test_add_to_set_and_pulls() {
        assert_eq!(
            translate(&[("add_to_set__tags", Value::list(["a", "b"]))]),
            json!({"$addToSet": {"tags": {"$each": ["a", "b"]}}})
        );
        assert_eq!(
            translate(&[("add_to_set__tags", Value::from("a"))]),
            json!({"$addToSet": {"tags": "a"}})
        );
        assert_eq!(
            translate(&[("pull__tags", Value::from("a"))]),
            json!({"$pull": {"tags": "a"}})
        );
        assert_eq!(
            translate(&[("pull_all__tags", Value::list(["a", "b"]))]),
            json!({"$pullAll": {"tags": ["a", "b"]}})
        );
        assert_eq!(
            translate(&[("pull__tags__in", Value::list(["a"]))]),
            json!({"$pull": {"tags": {"$in": ["a"]}}})
        );
    }

    #[test]
    fn test_positional_operator() {
        assert_eq!(
            translate(&[("inc__comments__S__votes", Value::from(1_i64))]),
            json!({"$inc": {"comments.$.votes": 1}})
        );
        assert_eq!(
            translate(&[("set__comments__1__text", Value::from("hi"))]),
            json!({"$set": {"comments.1.t": "hi"}})
        );
    }

    #[test]
    fn test_set_on_insert() {
        assert_eq!(
            translate(&[("set_on_insert__title", Value::from("new"))]),
            json!({"$setOnInsert": {"title": "new"}})
        );
    }

    #[test]
    fn test_unknown_field_is_lookup_error() {
        let schema = blog();
        let err = translate_update(&schema, &[("set__nope".into(), Value::from(1_i64))]).unwrap_err();
        assert!(matches!(err, DocmapError::LookupError(_)));
    }
}

//! Application of native update documents.
//!
//! Supports the operators the mapper emits: `$set`, `$unset`, `$inc`, `$mul`,
//! `$min`, `$max`, `$push` (with `$each` / `$position`), `$addToSet`,
//! `$pull`, `$pullAll`, `$pop`, `$rename` and `$setOnInsert`. A `$` segment
//! in a path is resolved against the filter that selected the document.

use std::cmp::Ordering;

use docmap_odm::driver::{DriverError, DriverResult};
use docmap_odm::value::{Json, WireDoc};

use crate::matcher::{compare_values, element_matches, matches, remove_path};

/// Applies `update` to `doc`. `inserting` enables `$setOnInsert`.
///
/// # Errors
///
/// Returns a driver error for unknown operators, type mismatches and
/// positional paths the filter cannot resolve.
pub fn apply_update(
    doc: &mut WireDoc,
    update: &WireDoc,
    filter: &WireDoc,
    inserting: bool,
) -> DriverResult<()> {
    if !update.keys().any(|k| k.starts_with('$')) {
        let id = doc.get("_id").cloned();
        *doc = update.clone();
        if let Some(id) = id {
            doc.insert("_id".into(), id);
        }
        return Ok(());
    }
    for (op, fields) in update {
        let Some(fields) = fields.as_object() else {
            return Err(DriverError::other(format!("{op} needs a document")));
        };
        for (path, arg) in fields {
            let path = resolve_positional(doc, path, filter)?;
            apply_operator(doc, op, &path, arg, inserting)?;
        }
    }
    Ok(())
}

fn apply_operator(
    doc: &mut WireDoc,
    op: &str,
    path: &str,
    arg: &Json,
    inserting: bool,
) -> DriverResult<()> {
    match op {
        "$set" => set_path(doc, path, arg.clone()),
        "$setOnInsert" if inserting => set_path(doc, path, arg.clone()),
        "$setOnInsert" => Ok(()),
        "$unset" => {
            remove_path(doc, path);
            Ok(())
        }
        "$inc" | "$mul" => {
            let current = get_path(doc, path).cloned();
            let next = match current {
                None | Some(Json::Null) if op == "$inc" => arg.clone(),
                None | Some(Json::Null) => multiply(&Json::from(0), arg)?,
                Some(value) if op == "$inc" => add(&value, arg)?,
                Some(value) => multiply(&value, arg)?,
            };
            set_path(doc, path, next)
        }
        "$min" | "$max" => {
            let wanted = if op == "$min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let replace = match get_path(doc, path) {
                None | Some(Json::Null) => true,
                Some(current) => compare_values(arg, current) == Some(wanted),
            };
            if replace {
                set_path(doc, path, arg.clone())
            } else {
                Ok(())
            }
        }
        "$push" | "$addToSet" => {
            let (values, position) = match arg.as_object().and_then(|o| o.get("$each")) {
                Some(Json::Array(each)) => (
                    each.clone(),
                    arg.get("$position").and_then(Json::as_u64),
                ),
                _ => (vec![arg.clone()], None),
            };
            let items = array_at(doc, path)?;
            let mut index = position.map_or(items.len(), |p| (p as usize).min(items.len()));
            for value in values {
                if op == "$addToSet" && items.contains(&value) {
                    continue;
                }
                items.insert(index, value);
                index += 1;
            }
            Ok(())
        }
        "$pull" => {
            if let Some(items) = existing_array(doc, path)? {
                items.retain(|item| !element_matches(item, arg));
            }
            Ok(())
        }
        "$pullAll" => {
            let unwanted = arg.as_array().cloned().unwrap_or_default();
            if let Some(items) = existing_array(doc, path)? {
                items.retain(|item| !unwanted.contains(item));
            }
            Ok(())
        }
        "$pop" => {
            if let Some(items) = existing_array(doc, path)? {
                if arg.as_i64().unwrap_or(1) < 0 {
                    if !items.is_empty() {
                        items.remove(0);
                    }
                } else {
                    items.pop();
                }
            }
            Ok(())
        }
        "$rename" => {
            let target = arg
                .as_str()
                .ok_or_else(|| DriverError::other("$rename needs a field name"))?;
            if let Some(value) = remove_path(doc, path) {
                set_path(doc, target, value)?;
            }
            Ok(())
        }
        other => Err(DriverError::other(format!("unknown update operator {other}"))),
    }
}

fn add(a: &Json, b: &Json) -> DriverResult<Json> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Ok(Json::from(x + y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Json::from(x + y)),
            _ => Err(DriverError::other("Cannot apply $inc to a non-numeric value")),
        },
    }
}

fn multiply(a: &Json, b: &Json) -> DriverResult<Json> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Ok(Json::from(x * y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Json::from(x * y)),
            _ => Err(DriverError::other("Cannot apply $mul to a non-numeric value")),
        },
    }
}

/// Replaces a `$` segment with the index of the first array element the
/// filter matched.
fn resolve_positional(doc: &WireDoc, path: &str, filter: &WireDoc) -> DriverResult<String> {
    let parts: Vec<&str> = path.split('.').collect();
    let Some(pos) = parts.iter().position(|part| *part == "$") else {
        return Ok(path.to_string());
    };
    let array_path = parts[..pos].join(".");
    let Some(Json::Array(items)) = get_path(doc, &array_path) else {
        return Err(positional_error());
    };
    let prefix = format!("{array_path}.");
    let index = items.iter().position(|item| {
        filter.iter().any(|(key, condition)| {
            if *key == array_path {
                match condition.get("$elemMatch") {
                    Some(inner) => element_matches(item, inner),
                    None => element_matches(item, condition),
                }
            } else if let Some(rest) = key.strip_prefix(&prefix) {
                let mut sub = WireDoc::new();
                sub.insert(rest.to_string(), condition.clone());
                item.as_object().is_some_and(|obj| matches(obj, &sub))
            } else {
                false
            }
        })
    });
    let index = index.ok_or_else(positional_error)?;
    let mut resolved: Vec<String> = parts.iter().map(|p| (*p).to_string()).collect();
    resolved[pos] = index.to_string();
    Ok(resolved.join("."))
}

fn positional_error() -> DriverError {
    DriverError::other("The positional operator did not find the match needed from the query.")
}

fn get_path<'a>(doc: &'a WireDoc, path: &str) -> Option<&'a Json> {
    let mut parts = path.split('.');
    let mut node = doc.get(parts.next()?)?;
    for part in parts {
        node = match node {
            Json::Object(obj) => obj.get(part)?,
            Json::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Sets a dotted path, creating intermediate documents and padding arrays.
pub fn set_path(doc: &mut WireDoc, path: &str, value: Json) -> DriverResult<()> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let Some(rest) = rest else {
        doc.insert(head.to_string(), value);
        return Ok(());
    };
    let slot = doc
        .entry(head.to_string())
        .or_insert_with(|| Json::Object(WireDoc::new()));
    set_in(slot, rest, value)
}

fn set_in(node: &mut Json, path: &str, value: Json) -> DriverResult<()> {
    match node {
        Json::Object(obj) => set_path(obj, path, value),
        Json::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let index = head
                .parse::<usize>()
                .map_err(|_| DriverError::other(format!("cannot index an array with '{head}'")))?;
            if items.len() <= index {
                items.resize(index + 1, Json::Null);
            }
            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => {
                    if items[index].is_null() {
                        items[index] = Json::Object(WireDoc::new());
                    }
                    set_in(&mut items[index], rest, value)
                }
            }
        }
        Json::Null => {
            *node = Json::Object(WireDoc::new());
            set_in(node, path, value)
        }
        _ => Err(DriverError::other(format!(
            "cannot create field '{path}' inside a scalar"
        ))),
    }
}

/// The array at `path`, created empty when missing.
fn array_at<'a>(doc: &'a mut WireDoc, path: &str) -> DriverResult<&'a mut Vec<Json>> {
    if get_path(doc, path).map_or(true, Json::is_null) {
        set_path(doc, path, Json::Array(Vec::new()))?;
    }
    existing_array(doc, path)?.ok_or_else(|| DriverError::other(format!("no array at '{path}'")))
}

fn existing_array<'a>(doc: &'a mut WireDoc, path: &str) -> DriverResult<Option<&'a mut Vec<Json>>> {
    let mut parts = path.split('.');
    let Some(first) = parts.next() else {
        return Ok(None);
    };
    let Some(mut node) = doc.get_mut(first) else {
        return Ok(None);
    };
    for part in parts {
        node = match node {
            Json::Object(obj) => match obj.get_mut(part) {
                Some(next) => next,
                None => return Ok(None),
            },
            Json::Array(items) => match part.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(next) => next,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
    }
    match node {
        Json::Array(items) => Ok(Some(items)),
        Json::Null => Ok(None),
        _ => Err(DriverError::other(format!(
            "The field '{path}' must be an array"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(value: Json) -> WireDoc {
        value.as_object().cloned().unwrap()
    }

    fn updated(doc: Json, update: Json) -> Json {
        let mut doc = obj(doc);
        apply_update(&mut doc, &obj(update), &WireDoc::new(), false).unwrap();
        Json::Object(doc)
    }

    #[test]
    fn test_set_unset_inc() {
        assert_eq!(
            updated(
                json!({"a": 1, "b": 2, "n": {"x": 1}}),
                json!({"$set": {"n.y": 2}, "$unset": {"b": 1}, "$inc": {"a": 5}})
            ),
            json!({"a": 6, "n": {"x": 1, "y": 2}})
        );
        assert_eq!(updated(json!({}), json!({"$inc": {"c": -2}})), json!({"c": -2}));
    }

    #[test]
    fn test_array_operators() {
        assert_eq!(
            updated(
                json!({"t": ["b"]}),
                json!({"$push": {"t": {"$each": ["a"], "$position": 0}}})
            ),
            json!({"t": ["a", "b"]})
        );
        assert_eq!(
            updated(json!({"t": ["a"]}), json!({"$addToSet": {"t": {"$each": ["a", "c"]}}})),
            json!({"t": ["a", "c"]})
        );
        assert_eq!(
            updated(json!({"t": ["a", "b", "a"]}), json!({"$pull": {"t": "a"}})),
            json!({"t": ["b"]})
        );
        assert_eq!(
            updated(json!({"t": [1, 5, 9]}), json!({"$pull": {"t": {"$gt": 4}}})),
            json!({"t": [1]})
        );
        assert_eq!(
            updated(json!({"t": [1, 2, 3]}), json!({"$pop": {"t": -1}})),
            json!({"t": [2, 3]})
        );
        assert_eq!(
            updated(json!({"t": [1, 2, 3]}), json!({"$pullAll": {"t": [1, 3]}})),
            json!({"t": [2]})
        );
    }

    #[test]
    fn test_positional_operator() {
        let mut doc = obj(json!({"c": [{"by": "a", "v": 1}, {"by": "b", "v": 1}]}));
        apply_update(
            &mut doc,
            &obj(json!({"$inc": {"c.$.v": 1}})),
            &obj(json!({"c.by": "b"})),
            false,
        )
        .unwrap();
        assert_eq!(Json::Object(doc), json!({"c": [{"by": "a", "v": 1}, {"by": "b", "v": 2}]}));
    }

    #[test]
    fn test_set_on_insert_and_rename() {
        let mut doc = WireDoc::new();
        apply_update(
            &mut doc,
            &obj(json!({"$setOnInsert": {"a": 1}, "$set": {"b": 2}})),
            &WireDoc::new(),
            true,
        )
        .unwrap();
        assert_eq!(Json::Object(doc.clone()), json!({"a": 1, "b": 2}));
        apply_update(&mut doc, &obj(json!({"$rename": {"b": "c"}})), &WireDoc::new(), false)
            .unwrap();
        assert_eq!(Json::Object(doc), json!({"a": 1, "c": 2}));
    }

    #[test]
    fn test_errors() {
        let mut doc = obj(json!({"s": "x"}));
        assert!(apply_update(&mut doc, &obj(json!({"$inc": {"s": 1}})), &WireDoc::new(), false)
            .is_err());
        assert!(apply_update(&mut doc, &obj(json!({"$bogus": {"s": 1}})), &WireDoc::new(), false)
            .is_err());
    }
}

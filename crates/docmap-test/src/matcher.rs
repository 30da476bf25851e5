//! Evaluation of native filter, sort and projection documents.
//!
//! These are the read-side semantics the in-memory driver needs: dotted
//! paths traverse embedded documents and arrays, equality against an array
//! field matches any element, and the comparison operators order numbers,
//! strings and `{"$date": millis}` values.

use std::cmp::Ordering;

use docmap_odm::value::{Json, WireDoc};
use regex::RegexBuilder;

/// Collects every value reachable at `path`, descending into arrays.
pub fn values_at<'a>(doc: &'a WireDoc, path: &str) -> Vec<&'a Json> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = parts.split_first() {
        if let Some(value) = doc.get(*head) {
            collect(value, rest, &mut out);
        }
    }
    out
}

fn collect<'a>(value: &'a Json, parts: &[&str], out: &mut Vec<&'a Json>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Json::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect(next, rest, out);
            }
        }
        Json::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect(item, rest, out);
                }
            }
            for item in items.iter().filter(|item| item.is_object()) {
                collect(item, parts, out);
            }
        }
        _ => {}
    }
}

fn is_operator_doc(value: &Json) -> bool {
    value
        .as_object()
        .is_some_and(|obj| !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')))
}

/// Returns `true` if `doc` satisfies `filter`.
pub fn matches(doc: &WireDoc, filter: &WireDoc) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => each_filter(condition).all(|sub| matches(doc, sub)),
        "$or" => each_filter(condition).any(|sub| matches(doc, sub)),
        "$nor" => !each_filter(condition).any(|sub| matches(doc, sub)),
        path => {
            let candidates = values_at(doc, path);
            if is_operator_doc(condition) {
                condition_holds(&candidates, condition)
            } else {
                equals_any(&candidates, condition)
            }
        }
    })
}

fn each_filter(condition: &Json) -> impl Iterator<Item = &WireDoc> {
    condition
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Json::as_object)
}

fn equals_any(candidates: &[&Json], target: &Json) -> bool {
    if target.is_null() && candidates.is_empty() {
        return true;
    }
    candidates.iter().any(|candidate| {
        *candidate == target
            || candidate
                .as_array()
                .is_some_and(|items| items.contains(target))
    })
}

/// Evaluates an operator document such as `{"$gt": 3, "$lt": 9}`.
fn condition_holds(candidates: &[&Json], condition: &Json) -> bool {
    let Some(ops) = condition.as_object() else {
        return false;
    };
    ops.iter().all(|(op, arg)| match op.as_str() {
        "$eq" => equals_any(candidates, arg),
        "$ne" => !equals_any(candidates, arg),
        "$gt" => compare_any(candidates, arg, |o| o == Ordering::Greater),
        "$gte" => compare_any(candidates, arg, |o| o != Ordering::Less),
        "$lt" => compare_any(candidates, arg, |o| o == Ordering::Less),
        "$lte" => compare_any(candidates, arg, |o| o != Ordering::Greater),
        "$in" => arg
            .as_array()
            .is_some_and(|options| options.iter().any(|o| in_candidates(candidates, o))),
        "$nin" => !arg
            .as_array()
            .is_some_and(|options| options.iter().any(|o| in_candidates(candidates, o))),
        "$all" => arg.as_array().is_some_and(|wanted| {
            candidates.iter().any(|candidate| {
                candidate
                    .as_array()
                    .is_some_and(|items| wanted.iter().all(|w| items.contains(w)))
            })
        }),
        "$size" => arg.as_u64().is_some_and(|size| {
            candidates
                .iter()
                .any(|c| c.as_array().is_some_and(|items| items.len() as u64 == size))
        }),
        "$exists" => {
            let wanted = arg.as_bool().unwrap_or_else(|| arg.as_i64() != Some(0));
            candidates.is_empty() != wanted
        }
        "$not" => {
            if arg.is_object() {
                !condition_holds(candidates, arg)
            } else {
                !regex_any(candidates, arg, None)
            }
        }
        "$regex" => regex_any(candidates, arg, ops.get("$options").and_then(Json::as_str)),
        "$options" => true,
        "$elemMatch" => candidates.iter().any(|candidate| {
            candidate
                .as_array()
                .is_some_and(|items| items.iter().any(|item| element_matches(item, arg)))
        }),
        "$mod" => match arg.as_array().map(Vec::as_slice) {
            Some([divisor, remainder]) => match (divisor.as_i64(), remainder.as_i64()) {
                (Some(d), Some(r)) if d != 0 => candidates
                    .iter()
                    .any(|c| c.as_i64().is_some_and(|v| v % d == r)),
                _ => false,
            },
            _ => false,
        },
        _ => false,
    })
}

fn in_candidates(candidates: &[&Json], option: &Json) -> bool {
    if let Some(pattern) = option.as_object().and_then(|o| o.get("$regex")) {
        return regex_any(candidates, pattern, None);
    }
    equals_any(candidates, option)
}

/// Matches one array element against an `$elemMatch` argument.
pub fn element_matches(item: &Json, condition: &Json) -> bool {
    if is_operator_doc(condition) {
        return condition_holds(&[item], condition);
    }
    match (item.as_object(), condition.as_object()) {
        (Some(obj), Some(filter)) => matches(obj, filter),
        _ => item == condition,
    }
}

fn compare_any(candidates: &[&Json], arg: &Json, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates.iter().any(|candidate| {
        let direct = compare_values(candidate, arg).is_some_and(&accept);
        direct
            || candidate.as_array().is_some_and(|items| {
                items
                    .iter()
                    .any(|item| compare_values(item, arg).is_some_and(&accept))
            })
    })
}

fn regex_any(candidates: &[&Json], pattern: &Json, options: Option<&str>) -> bool {
    let (source, flags) = match pattern {
        Json::String(s) => (s.as_str(), options.unwrap_or("")),
        Json::Object(obj) => (
            obj.get("$regex").and_then(Json::as_str).unwrap_or(""),
            obj.get("$options").and_then(Json::as_str).unwrap_or(""),
        ),
        _ => return false,
    };
    let Ok(re) = RegexBuilder::new(source)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .build()
    else {
        return false;
    };
    candidates.iter().any(|candidate| match candidate {
        Json::String(s) => re.is_match(s),
        Json::Array(items) => items
            .iter()
            .any(|item| item.as_str().is_some_and(|s| re.is_match(s))),
        _ => false,
    })
}

fn date_millis(value: &Json) -> Option<i64> {
    value.as_object()?.get("$date")?.as_i64()
}

/// Orders two values of the same kind; `None` when they are not comparable.
pub fn compare_values(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        (Json::Bool(x), Json::Bool(y)) => Some(x.cmp(y)),
        _ => date_millis(a)?.partial_cmp(&date_millis(b)?),
    }
}

/// A total order across kinds for sorting: null, numbers, strings, objects,
/// arrays, booleans.
fn sort_rank(value: &Json) -> u8 {
    match value {
        Json::Null => 0,
        Json::Number(_) => 1,
        Json::String(_) => 2,
        Json::Object(_) => 3,
        Json::Array(_) => 4,
        Json::Bool(_) => 5,
    }
}

fn sort_cmp(a: &Json, b: &Json) -> Ordering {
    compare_values(a, b).unwrap_or_else(|| sort_rank(a).cmp(&sort_rank(b)))
}

/// Sorts documents in place by `(path, 1 | -1)` keys. The sort is stable.
pub fn sort_documents(docs: &mut [WireDoc], keys: &[(String, i32)]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, direction) in keys {
            let left = values_at(a, path).first().copied().unwrap_or(&Json::Null);
            let right = values_at(b, path).first().copied().unwrap_or(&Json::Null);
            let ordering = sort_cmp(left, right);
            let ordering = if *direction < 0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Applies a projection document to a stored document.
pub fn project(doc: &WireDoc, projection: &WireDoc) -> WireDoc {
    let include_id = projection.get("_id").map_or(true, |flag| flag != &Json::from(0));
    let flag = |value: &Json| value.as_i64().or_else(|| value.as_bool().map(i64::from));
    let included: Vec<&String> = projection
        .iter()
        .filter(|(k, v)| *k != "_id" && flag(v) == Some(1))
        .map(|(k, _)| k)
        .collect();
    let operators: Vec<(&String, &WireDoc)> = projection
        .iter()
        .filter_map(|(k, v)| v.as_object().map(|op| (k, op)))
        .collect();

    let mut out = if included.is_empty() {
        let mut out = doc.clone();
        for (key, value) in projection {
            if key != "_id" && flag(value) == Some(0) {
                remove_path(&mut out, key);
            }
        }
        out
    } else {
        let mut out = WireDoc::new();
        if let Some(id) = doc.get("_id") {
            out.insert("_id".into(), id.clone());
        }
        for path in included.iter().copied().chain(operators.iter().map(|(k, _)| *k)) {
            copy_path(doc, &mut out, path);
        }
        out
    };
    if !include_id {
        out.remove("_id");
    }
    for (path, op) in operators {
        apply_projection_operator(&mut out, path, op);
    }
    out
}

fn copy_path(src: &WireDoc, dst: &mut WireDoc, path: &str) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let Some(value) = src.get(head) else {
        return;
    };
    match (rest, value) {
        (None, _) => {
            dst.insert(head.to_string(), value.clone());
        }
        (Some(rest), Json::Object(inner)) => {
            let slot = dst
                .entry(head.to_string())
                .or_insert_with(|| Json::Object(WireDoc::new()));
            if let Json::Object(slot) = slot {
                copy_path(inner, slot, rest);
            }
        }
        (Some(rest), Json::Array(items)) => {
            let projected = items
                .iter()
                .filter_map(Json::as_object)
                .map(|item| {
                    let mut out = WireDoc::new();
                    copy_path(item, &mut out, rest);
                    Json::Object(out)
                })
                .collect();
            dst.insert(head.to_string(), Json::Array(projected));
        }
        _ => {}
    }
}

/// Removes the value at a dotted path, if present.
pub fn remove_path(doc: &mut WireDoc, path: &str) -> Option<Json> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Json::Object(inner) => remove_path(inner, rest),
            Json::Array(items) => {
                let (index, tail) = match rest.split_once('.') {
                    Some((index, tail)) => (index, Some(tail)),
                    None => (rest, None),
                };
                let index = index.parse::<usize>().ok()?;
                match tail {
                    // Removing an array slot leaves null in its place.
                    None => items.get_mut(index).map(std::mem::take),
                    Some(tail) => match items.get_mut(index)? {
                        Json::Object(inner) => remove_path(inner, tail),
                        _ => None,
                    },
                }
            }
            _ => None,
        },
    }
}

fn apply_projection_operator(doc: &mut WireDoc, path: &str, op: &WireDoc) {
    let Some(Json::Array(items)) = doc.get_mut(path) else {
        return;
    };
    if let Some(slice) = op.get("$slice") {
        let len = items.len();
        let (start, count) = match slice {
            Json::Array(bounds) => {
                let skip = bounds.first().and_then(Json::as_i64).unwrap_or(0);
                let limit = bounds.get(1).and_then(Json::as_u64).unwrap_or(0);
                let start = if skip < 0 {
                    len.saturating_sub(skip.unsigned_abs() as usize)
                } else {
                    (skip as usize).min(len)
                };
                (start, limit as usize)
            }
            other => {
                let n = other.as_i64().unwrap_or(0);
                if n < 0 {
                    let count = (n.unsigned_abs() as usize).min(len);
                    (len - count, count)
                } else {
                    (0, n as usize)
                }
            }
        };
        let kept: Vec<Json> = items.iter().skip(start).take(count).cloned().collect();
        *items = kept;
    } else if let Some(condition) = op.get("$elemMatch") {
        let first = items
            .iter()
            .find(|item| element_matches(item, condition))
            .cloned();
        match first {
            Some(item) => *items = vec![item],
            None => {
                doc.remove(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Json) -> WireDoc {
        value.as_object().cloned().unwrap()
    }

    fn filter(value: Json) -> WireDoc {
        doc(value)
    }

    #[test]
    fn test_equality_and_array_membership() {
        let d = doc(json!({"name": "Ada", "tags": ["a", "b"]}));
        assert!(matches(&d, &filter(json!({"name": "Ada"}))));
        assert!(matches(&d, &filter(json!({"tags": "a"}))));
        assert!(matches(&d, &filter(json!({"tags": ["a", "b"]}))));
        assert!(!matches(&d, &filter(json!({"tags": "z"}))));
        assert!(matches(&d, &filter(json!({"missing": null}))));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let d = doc(json!({"age": 30, "when": {"$date": 1000}}));
        assert!(matches(&d, &filter(json!({"age": {"$gt": 20, "$lte": 30}}))));
        assert!(!matches(&d, &filter(json!({"age": {"$not": {"$gt": 20}}}))));
        assert!(matches(&d, &filter(json!({"when": {"$lt": {"$date": 2000}}}))));
        assert!(matches(
            &d,
            &filter(json!({"$or": [{"age": 1}, {"age": {"$in": [30, 31]}}]}))
        ));
        assert!(matches(
            &d,
            &filter(json!({"$and": [{"age": {"$ne": 1}}, {"age": {"$nin": [2]}}]}))
        ));
    }

    #[test]
    fn test_embedded_paths_and_elem_match() {
        let d = doc(json!({"comments": [{"by": "a", "votes": 1}, {"by": "b", "votes": 5}]}));
        assert!(matches(&d, &filter(json!({"comments.by": "b"}))));
        assert!(matches(&d, &filter(json!({"comments.1.votes": 5}))));
        assert!(matches(
            &d,
            &filter(json!({"comments": {"$elemMatch": {"by": "b", "votes": {"$gt": 3}}}}))
        ));
        assert!(!matches(
            &d,
            &filter(json!({"comments": {"$elemMatch": {"by": "a", "votes": {"$gt": 3}}}}))
        ));
        assert!(matches(&d, &filter(json!({"comments": {"$size": 2}}))));
    }

    #[test]
    fn test_regex_and_exists() {
        let d = doc(json!({"name": "Alice"}));
        assert!(matches(&d, &filter(json!({"name": {"$regex": "^al", "$options": "i"}}))));
        assert!(!matches(&d, &filter(json!({"name": {"$regex": "^al"}}))));
        assert!(matches(&d, &filter(json!({"name": {"$exists": true}}))));
        assert!(matches(&d, &filter(json!({"age": {"$exists": false}}))));
    }

    #[test]
    fn test_sort_is_stable_and_multi_key() {
        let mut docs = vec![
            doc(json!({"_id": 1, "a": 2, "b": "x"})),
            doc(json!({"_id": 2, "a": 1, "b": "y"})),
            doc(json!({"_id": 3, "a": 2, "b": "a"})),
        ];
        sort_documents(&mut docs, &[("a".into(), -1), ("b".into(), 1)]);
        let ids: Vec<i64> = docs.iter().map(|d| d["_id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_projection() {
        let d = doc(json!({"_id": 1, "a": 1, "b": {"c": 2, "d": 3}, "l": [1, 2, 3, 4]}));
        assert_eq!(
            Json::Object(project(&d, &filter(json!({"a": 1, "b.c": 1})))),
            json!({"_id": 1, "a": 1, "b": {"c": 2}})
        );
        assert_eq!(
            Json::Object(project(&d, &filter(json!({"b": 0, "_id": 0})))),
            json!({"a": 1, "l": [1, 2, 3, 4]})
        );
        assert_eq!(
            project(&d, &filter(json!({"l": {"$slice": -2}})))["l"],
            json!([3, 4])
        );
        assert_eq!(
            project(&d, &filter(json!({"l": {"$slice": [1, 2]}})))["l"],
            json!([2, 3])
        );
    }
}

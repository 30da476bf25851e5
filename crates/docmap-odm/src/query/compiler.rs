//! Filter compilation.
//!
//! This module lowers a [`Q`] tree into the native filter document understood
//! by the storage driver. Compilation runs in two passes: [`simplify`] merges
//! AND-ed leaves into one leaf where no condition key repeats, then the
//! [`QueryCompiler`] translates every `field__path__operator` keyword against
//! the schema.
//!
//! # Examples
//!
//! ```
//! use docmap_odm::fields::{FieldDef, FieldType};
//! use docmap_odm::query::compiler::QueryCompiler;
//! use docmap_odm::query::lookups::Q;
//! use docmap_odm::schema::SchemaBuilder;
//!
//! let schema = SchemaBuilder::document("Person")
//!     .field(FieldDef::new("age", FieldType::int()).db_field("a"))
//!     .build()
//!     .unwrap();
//!
//! let filter = QueryCompiler::new(&schema)
//!     .compile_filter(&Q::kw("age__gt", 20_i64))
//!     .unwrap();
//! assert_eq!(serde_json::Value::Object(filter), serde_json::json!({"a": {"$gt": 20}}));
//! ```

use std::collections::HashSet;

use docmap_core::{DocmapError, DocmapResult};

use super::lookups::Q;
use crate::fields::{FieldDef, FieldType, STRING_OPERATORS};
use crate::schema::{LookupPart, Schema};
use crate::value::{Json, Value, WireDoc};

/// Comparison operators recognised as the trailing segment of a condition key.
pub const COMPARISON_OPERATORS: &[&str] = &[
    "ne",
    "gt",
    "gte",
    "lt",
    "lte",
    "in",
    "nin",
    "mod",
    "all",
    "size",
    "exists",
    "not",
    "elemMatch",
    "elem_match",
    "match",
    "type",
];

/// Operators whose operand is prepared as a single value.
const SINGULAR_OPERATORS: &[&str] = &["ne", "gt", "gte", "lt", "lte", "not"];

fn is_operator(segment: &str) -> bool {
    COMPARISON_OPERATORS.contains(&segment) || STRING_OPERATORS.contains(&segment)
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn single(key: &str, value: Json) -> Json {
    let mut doc = WireDoc::new();
    doc.insert(key.to_string(), value);
    Json::Object(doc)
}

/// A sort key on an on-wire path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// The dotted on-wire path to sort on.
    pub path: String,
    /// Whether to sort in descending order.
    pub descending: bool,
}

impl OrderBy {
    /// Creates an ascending order.
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            descending: false,
        }
    }

    /// Creates a descending order.
    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            descending: true,
        }
    }

    /// The `(path, 1 | -1)` driver form.
    pub fn direction(&self) -> i32 {
        if self.descending {
            -1
        } else {
            1
        }
    }
}

/// Merges AND-ed leaves, bottom-up.
///
/// An AND whose children are all leaves becomes one leaf, unless two children
/// share a condition key; such a combination is left untouched so both
/// conditions survive.
pub fn simplify(q: &Q) -> Q {
    match q {
        Q::Leaf(_) => q.clone(),
        Q::Or(children) => Q::Or(children.iter().map(simplify).collect()),
        Q::And(children) => {
            let children: Vec<Q> = children.iter().map(simplify).collect();
            let mut merged: Vec<(String, Value)> = Vec::new();
            let mut seen = HashSet::new();
            for child in &children {
                let Q::Leaf(conditions) = child else {
                    return Q::And(children);
                };
                for (key, value) in conditions {
                    if !seen.insert(key.clone()) {
                        return Q::And(children);
                    }
                    merged.push((key.clone(), value.clone()));
                }
            }
            Q::Leaf(merged)
        }
    }
}

/// Translates queries, sort keys and projections for one schema.
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler<'a> {
    schema: &'a Schema,
}

impl<'a> QueryCompiler<'a> {
    /// Creates a compiler for `schema`.
    pub const fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Compiles a condition tree into a filter document. The empty tree
    /// compiles to `{}`.
    pub fn compile_filter(&self, q: &Q) -> DocmapResult<WireDoc> {
        self.compile_node(&simplify(q))
    }

    /// Translates `[+|-]attr.path` sort keys to on-wire paths.
    pub fn compile_sort<S: AsRef<str>>(&self, keys: &[S]) -> DocmapResult<Vec<OrderBy>> {
        keys.iter()
            .map(AsRef::as_ref)
            .filter(|key| !key.is_empty())
            .map(|key| {
                let (descending, path) = match key.as_bytes()[0] {
                    b'-' => (true, &key[1..]),
                    b'+' => (false, &key[1..]),
                    _ => (false, key),
                };
                let path = self.schema.translate_path(path)?;
                Ok(OrderBy { path, descending })
            })
            .collect()
    }

    fn compile_node(&self, q: &Q) -> DocmapResult<WireDoc> {
        match q {
            Q::Leaf(conditions) => self.compile_conditions(conditions),
            Q::Or(children) => {
                let compiled = children
                    .iter()
                    .map(|child| self.compile_node(child).map(Json::Object))
                    .collect::<DocmapResult<Vec<_>>>()?;
                let mut doc = WireDoc::new();
                doc.insert("$or".into(), Json::Array(compiled));
                Ok(doc)
            }
            Q::And(children) => {
                let compiled = children
                    .iter()
                    .map(|child| self.compile_node(child))
                    .collect::<DocmapResult<Vec<_>>>()?;
                Ok(conjoin(compiled))
            }
        }
    }

    /// Compiles the conditions of one leaf.
    ///
    /// Conditions on the same path merge when both are operator documents;
    /// otherwise they are moved into an `$and`.
    pub(crate) fn compile_conditions(&self, conditions: &[(String, Value)]) -> DocmapResult<WireDoc> {
        let mut query = WireDoc::new();
        let mut conflicts: Vec<(String, Vec<Json>)> = Vec::new();

        for (key, value) in conditions {
            let (path, compiled) = self.compile_condition(key, value)?;
            if let Some((_, values)) = conflicts.iter_mut().find(|(p, _)| *p == path) {
                values.push(compiled);
                continue;
            }
            if !query.contains_key(&path) {
                query.insert(path, compiled);
                continue;
            }
            if let (Some(Json::Object(existing)), Json::Object(ops)) =
                (query.get_mut(&path), &compiled)
            {
                existing.extend(ops.clone());
                continue;
            }
            let existing = query.remove(&path).unwrap_or(Json::Null);
            conflicts.push((path, vec![existing, compiled]));
        }

        if !conflicts.is_empty() {
            let mut all = Vec::new();
            for (path, values) in conflicts {
                all.extend(values.into_iter().map(|v| single(&path, v)));
            }
            query.insert("$and".into(), Json::Array(all));
        }
        Ok(query)
    }

    fn compile_condition(&self, key: &str, value: &Value) -> DocmapResult<(String, Json)> {
        let mut parts: Vec<&str> = key.split("__").collect();
        let indices: Vec<(usize, &str)> = parts
            .iter()
            .enumerate()
            .filter(|(_, part)| is_index(part))
            .map(|(i, part)| (i, *part))
            .collect();
        parts.retain(|part| !is_index(part));

        let mut op = None;
        if parts.len() > 1 && parts.last().is_some_and(|p| is_operator(p)) {
            op = parts.pop();
        }
        // A trailing empty segment escapes an operator-like field name.
        if parts.len() > 1 && parts.last() == Some(&"") {
            parts.pop();
        }
        let mut negate = false;
        if parts.len() > 1 && parts.last() == Some(&"not") {
            parts.pop();
            negate = true;
        }

        let resolved = self.schema.lookup_field(&parts)?;
        let mut db_parts: Vec<String> = resolved
            .iter()
            .map(|part| part.db_name().to_string())
            .collect();
        let dynamic_field;
        let field = match resolved.iter().rev().find_map(LookupPart::field) {
            Some(field) => field,
            None => {
                dynamic_field = FieldDef::new(key, FieldType::Dynamic);
                &dynamic_field
            }
        };

        let prepared = match op {
            None => field.prepare_query_value(None, value)?,
            Some(o) if SINGULAR_OPERATORS.contains(&o) || STRING_OPERATORS.contains(&o) => {
                field.prepare_query_value(op, value)?
            }
            Some("in" | "nin" | "all") => match value {
                Value::List(items) => Json::Array(
                    items
                        .iter()
                        .map(|item| field.prepare_query_value(op, item))
                        .collect::<DocmapResult<Vec<_>>>()?,
                ),
                Value::Dict(_) => value.to_json(),
                _ => {
                    return Err(DocmapError::InvalidQuery(format!(
                        "The '{}' operator on '{key}' needs a list of values",
                        op.unwrap_or_default()
                    )))
                }
            },
            Some("match" | "elemMatch" | "elem_match") => self.compile_elem_match(field, value)?,
            Some(_) => value.to_json(),
        };

        if field.is_generic_reference() {
            if let Some(last) = db_parts.last_mut() {
                match value {
                    Value::Reference(_) | Value::Document(_) => last.push_str("._ref"),
                    Value::String(_) => last.push_str("._ref.$id"),
                    _ => {}
                }
            }
        }

        let mut compiled = match op {
            None | Some("match" | "elemMatch" | "elem_match") => prepared,
            Some(o) if STRING_OPERATORS.contains(&o) => prepared,
            Some(o) => single(&format!("${o}"), prepared),
        };
        if negate {
            compiled = single("$not", compiled);
        }

        for (i, index) in indices {
            db_parts.insert(i.min(db_parts.len()), index.to_string());
        }
        Ok((db_parts.join("."), compiled))
    }

    /// Builds an `$elemMatch` operand. A dict of conditions against a list of
    /// embedded documents compiles as a sub-query on the item schema.
    fn compile_elem_match(&self, field: &FieldDef, value: &Value) -> DocmapResult<Json> {
        let item_schema = match field.item_field().map(|item| &item.field_type) {
            Some(FieldType::Embedded(schema)) => Some(schema),
            _ => None,
        };
        let inner = match (item_schema, value) {
            (Some(schema), Value::Dict(conditions)) => {
                let pairs: Vec<(String, Value)> = conditions
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Json::Object(QueryCompiler::new(schema).compile_conditions(&pairs)?)
            }
            (_, Value::Dict(_)) => value.to_json(),
            _ => field.prepare_query_value(None, value)?,
        };
        Ok(single("$elemMatch", inner))
    }
}

/// Merges compiled AND children flat, or wraps them in `$and` on a key clash.
fn conjoin(parts: Vec<WireDoc>) -> WireDoc {
    let parts: Vec<WireDoc> = parts.into_iter().filter(|p| !p.is_empty()).collect();
    let mut seen = HashSet::new();
    let collides = parts
        .iter()
        .flat_map(|part| part.keys())
        .any(|key| !seen.insert(key.clone()));
    if collides {
        let mut doc = WireDoc::new();
        doc.insert(
            "$and".into(),
            Json::Array(parts.into_iter().map(Json::Object).collect()),
        );
        doc
    } else {
        parts.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::schema::SchemaBuilder;
    use crate::value::DocRef;

    fn person() -> Arc<Schema> {
        let address = SchemaBuilder::embedded("CompilerAddress")
            .field(FieldDef::new("city", FieldType::string()).db_field("c"))
            .field(FieldDef::new("zip", FieldType::string()))
            .build()
            .unwrap();
        SchemaBuilder::document("CompilerPerson")
            .field(FieldDef::new("name", FieldType::string()))
            .field(FieldDef::new("age", FieldType::int()).db_field("a"))
            .field(FieldDef::new("tags", FieldType::list(FieldType::string())))
            .field(FieldDef::new("address", FieldType::Embedded(Arc::clone(&address))))
            .field(FieldDef::new(
                "addresses",
                FieldType::list(FieldType::Embedded(address)),
            ))
            .field(FieldDef::new("friend", FieldType::reference("CompilerPerson")))
            .field(FieldDef::new("thing", FieldType::GenericReference))
            .field(FieldDef::new("size", FieldType::int()))
            .build()
            .unwrap()
    }

    fn compile(q: &Q) -> Json {
        let schema = person();
        Json::Object(QueryCompiler::new(&schema).compile_filter(q).unwrap())
    }

    #[test]
    fn test_db_field_translation() {
        assert_eq!(compile(&Q::kw("age__gt", 20_i64)), json!({"a": {"$gt": 20}}));
        assert_eq!(compile(&Q::kw("pk", "x")), json!({"_id": "x"}));
    }

    #[test]
    fn test_empty_compiles_to_empty_document() {
        assert_eq!(compile(&Q::empty()), json!({}));
    }

    #[test]
    fn test_simplify_merges_and_of_leaves() {
        let q = Q::kw("name", "Ada") & Q::kw("age__gte", 18_i64);
        assert_eq!(
            simplify(&q),
            Q::new([("name", Value::from("Ada")), ("age__gte", Value::from(18_i64))])
        );
        assert_eq!(compile(&q), json!({"name": "Ada", "a": {"$gte": 18}}));
    }

    #[test]
    fn test_duplicate_keys_stay_separate() {
        let q = Q::kw("age__gt", 1_i64) & Q::kw("age__gt", 5_i64);
        assert!(matches!(simplify(&q), Q::And(_)));
        assert_eq!(
            compile(&q),
            json!({"$and": [{"a": {"$gt": 1}}, {"a": {"$gt": 5}}]})
        );
    }

    #[test]
    fn test_operators_on_same_path_merge() {
        let q = Q::new([("age__gt", 1_i64), ("age__lt", 5_i64)]);
        assert_eq!(compile(&q), json!({"a": {"$gt": 1, "$lt": 5}}));
    }

    #[test]
    fn test_conflicting_values_fall_back_to_and() {
        let q = Q::new([("age", 5_i64), ("age__gt", 1_i64)]);
        assert_eq!(compile(&q), json!({"$and": [{"a": 5}, {"a": {"$gt": 1}}]}));
    }

    #[test]
    fn test_or() {
        let q = Q::kw("name", "Ada") | Q::kw("age__lt", 3_i64);
        assert_eq!(compile(&q), json!({"$or": [{"name": "Ada"}, {"a": {"$lt": 3}}]}));
    }

    #[test]
    fn test_and_with_or_child_merges_flat() {
        let q = Q::kw("name", "Ada") & (Q::kw("age", 1_i64) | Q::kw("age", 2_i64));
        assert_eq!(
            compile(&q),
            json!({"name": "Ada", "$or": [{"a": 1}, {"a": 2}]})
        );
    }

    #[test]
    fn test_associativity() {
        let q1 = Q::kw("name", "Ada");
        let q2 = Q::kw("age__gt", 1_i64) | Q::kw("size", 2_i64);
        let q3 = Q::kw("tags", "x");
        let left = (q1.clone() & q2.clone()) & q3.clone();
        let right = q1 & (q2 & q3);
        assert_eq!(compile(&left), compile(&right));
    }

    #[test]
    fn test_negation_and_string_operators() {
        assert_eq!(
            compile(&Q::kw("age__not__gt", 5_i64)),
            json!({"a": {"$not": {"$gt": 5}}})
        );
        assert_eq!(
            compile(&Q::kw("name__istartswith", "ad")),
            json!({"name": {"$regex": "^ad", "$options": "i"}})
        );
    }

    #[test]
    fn test_in_prepares_each_element() {
        assert_eq!(
            compile(&Q::kw("age__in", Value::list([1_i64, 2]))),
            json!({"a": {"$in": [1, 2]}})
        );
        let schema = person();
        let err = QueryCompiler::new(&schema)
            .compile_filter(&Q::kw("age__in", 1_i64))
            .unwrap_err();
        assert!(matches!(err, DocmapError::InvalidQuery(_)));
    }

    #[test]
    fn test_embedded_and_indexed_paths() {
        assert_eq!(compile(&Q::kw("address__city", "Rome")), json!({"address.c": "Rome"}));
        assert_eq!(
            compile(&Q::kw("addresses__1__city", "Rome")),
            json!({"addresses.1.c": "Rome"})
        );
        assert_eq!(compile(&Q::kw("tags__0", "x")), json!({"tags.0": "x"}));
    }

    #[test]
    fn test_escaped_operator_name() {
        assert_eq!(compile(&Q::kw("size__", 3_i64)), json!({"size": 3}));
        assert_eq!(compile(&Q::kw("tags__size", 3_i64)), json!({"tags": {"$size": 3}}));
        assert_eq!(compile(&Q::kw("name__exists", false)), json!({"name": {"$exists": false}}));
    }

    #[test]
    fn test_reference_join_is_refused() {
        let schema = person();
        let err = QueryCompiler::new(&schema)
            .compile_filter(&Q::kw("friend__name", "Ada"))
            .unwrap_err();
        assert!(matches!(err, DocmapError::LookupError(_)));
    }

    #[test]
    fn test_generic_reference_key_rewrite() {
        let marker = DocRef::generic("CompilerPerson", "compiler_person", "x1");
        assert_eq!(
            compile(&Q::kw("thing", marker)),
            json!({"thing._ref": {"$ref": "compiler_person", "$id": "x1"}})
        );
        assert_eq!(compile(&Q::kw("thing", "x1")), json!({"thing._ref.$id": "x1"}));
    }

    #[test]
    fn test_elem_match_compiles_sub_query() {
        let cond = Value::dict([("city", Value::from("Rome")), ("zip__ne", Value::Null)]);
        assert_eq!(
            compile(&Q::kw("addresses__match", cond)),
            json!({"addresses": {"$elemMatch": {"c": "Rome", "zip": {"$ne": null}}}})
        );
    }

    #[test]
    fn test_compile_sort() {
        let schema = person();
        let order = QueryCompiler::new(&schema)
            .compile_sort(&["-age", "+address.city", "name"])
            .unwrap();
        assert_eq!(
            order,
            vec![
                OrderBy::desc("a"),
                OrderBy::asc("address.c"),
                OrderBy::asc("name"),
            ]
        );
    }
}

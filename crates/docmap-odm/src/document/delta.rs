//! Delta computation: the minimal `$set` / `$unset` pair for a document.

use crate::fields::{FieldDef, FieldType};
use crate::value::{Json, WireDoc};

use super::Document;

/// What a changed on-wire path points at in the schema.
enum PathTarget {
    Declared(FieldDef),
    Dynamic,
    Unknown,
}

impl Document {
    /// Computes the update needed to persist the recorded changes.
    ///
    /// Each changed path is looked up in the current wire form and recorded in
    /// the first map. Empty values (`null`, `""`, `[]`, `{}`) equal to the
    /// field's default move to the second map instead; empty dynamic fields are
    /// always unset. Paths that no longer exist are skipped.
    ///
    /// # Examples
    ///
    /// ```
    /// use docmap_odm::document::Document;
    /// use docmap_odm::fields::{FieldDef, FieldType};
    /// use docmap_odm::schema::SchemaBuilder;
    ///
    /// let schema = SchemaBuilder::document("Post")
    ///     .field(FieldDef::new("tags", FieldType::list(FieldType::string())))
    ///     .build()
    ///     .unwrap();
    /// let wire = serde_json::json!({"_id": "p", "tags": ["a"]});
    /// let mut post = Document::from_wire(&schema, wire.as_object().unwrap()).unwrap();
    /// post.list_mut("tags").unwrap().clear();
    ///
    /// let (set, unset) = post.delta();
    /// assert!(set.is_empty());
    /// assert_eq!(unset["tags"], 1);
    /// ```
    pub fn delta(&self) -> (WireDoc, WireDoc) {
        let wire = Json::Object(self.to_wire());
        let mut set = WireDoc::new();
        let mut unset = WireDoc::new();

        for path in self.get_changed_fields() {
            let Some((path, value)) = walk_wire(&wire, &path) else {
                continue;
            };
            if !is_empty_json(&value) {
                set.insert(path, value);
                continue;
            }
            let parts: Vec<&str> = path.split('.').collect();
            let unset_it = match self.path_target(&parts) {
                PathTarget::Dynamic => true,
                PathTarget::Declared(field) => field.default_wire() == value,
                PathTarget::Unknown => value.is_null(),
            };
            if unset_it {
                unset.insert(path, Json::from(1));
            } else {
                set.insert(path, value);
            }
        }
        (set, unset)
    }

    /// Resolves an on-wire path to the descriptor of its last segment.
    fn path_target(&self, parts: &[&str]) -> PathTarget {
        let Some((first, rest)) = parts.split_first() else {
            return PathTarget::Unknown;
        };
        let Some(mut field) = self.schema.field_by_db(first).cloned() else {
            return if self.schema.is_dynamic() {
                PathTarget::Dynamic
            } else {
                PathTarget::Unknown
            };
        };
        for part in rest {
            let next = match &field.field_type {
                FieldType::Embedded(schema) => schema.field_by_db(part).cloned(),
                FieldType::List(item) => Some(item.as_ref().clone()),
                FieldType::Dict(Some(item)) => Some(item.as_ref().clone()),
                _ => None,
            };
            match next {
                Some(next) => field = next,
                None => return PathTarget::Unknown,
            }
        }
        PathTarget::Declared(field)
    }
}

/// Follows `path` through the wire form.
///
/// Returns the path actually reached with its value, or `None` when the path
/// has gone stale. Walking stops early at scalars and reference markers.
fn walk_wire(root: &Json, path: &str) -> Option<(String, Json)> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut node = root;
    for (i, part) in parts.iter().enumerate() {
        let last = i + 1 == parts.len();
        match node {
            Json::Object(obj) if !is_reference_marker(obj) => match obj.get(*part) {
                Some(next) => node = next,
                None if last => return Some((path.to_string(), Json::Null)),
                None => return None,
            },
            Json::Array(items) => {
                node = part.parse::<usize>().ok().and_then(|idx| items.get(idx))?;
            }
            _ => return Some((parts[..i].join("."), node.clone())),
        }
    }
    Some((path.to_string(), node.clone()))
}

fn is_reference_marker(obj: &WireDoc) -> bool {
    obj.contains_key("$ref") || obj.contains_key("_ref")
}

fn is_empty_json(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::String(s) => s.is_empty(),
        Json::Array(items) => items.is_empty(),
        Json::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::document::Document;
    use crate::schema::{Schema, SchemaBuilder};
    use crate::value::Value;

    fn address() -> Arc<Schema> {
        SchemaBuilder::embedded("DeltaAddress")
            .field(FieldDef::new("city", FieldType::string()).db_field("c"))
            .field(FieldDef::new("tags", FieldType::list(FieldType::string())))
            .build()
            .unwrap()
    }

    fn person() -> Arc<Schema> {
        SchemaBuilder::document("DeltaPerson")
            .field(FieldDef::new("name", FieldType::string()))
            .field(FieldDef::new("age", FieldType::int()))
            .field(FieldDef::new("nick", FieldType::string()).default("anon"))
            .field(FieldDef::new("active", FieldType::Bool))
            .field(FieldDef::new("tags", FieldType::list(FieldType::string())))
            .field(FieldDef::new("address", FieldType::Embedded(address())))
            .field(FieldDef::new(
                "history",
                FieldType::list(FieldType::Embedded(address())),
            ))
            .build()
            .unwrap()
    }

    fn load(schema: &Arc<Schema>, wire: Json) -> Document {
        Document::from_wire(schema, wire.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_fresh_load_has_no_delta() {
        let doc = load(&person(), json!({"_id": "x", "name": "Ada", "tags": ["a"]}));
        let (set, unset) = doc.delta();
        assert!(set.is_empty());
        assert!(unset.is_empty());
    }

    #[test]
    fn test_scalar_change() {
        let mut doc = load(&person(), json!({"_id": "x", "name": "Ada", "age": 20}));
        doc.set("age", 21_i64).unwrap();
        let (set, unset) = doc.delta();
        assert_eq!(Json::Object(set), json!({"age": 21}));
        assert!(unset.is_empty());
    }

    #[test]
    fn test_empty_list_equal_to_default_is_unset() {
        let mut doc = load(&person(), json!({"_id": "x", "tags": ["a", "b"]}));
        doc.set("tags", Value::list(Vec::<Value>::new())).unwrap();
        let (set, unset) = doc.delta();
        assert!(set.is_empty());
        assert_eq!(Json::Object(unset), json!({"tags": 1}));
    }

    #[test]
    fn test_null_is_unset_but_falsy_scalars_are_set() {
        let mut doc = load(&person(), json!({"_id": "x", "name": "Ada", "age": 3, "active": true}));
        doc.set("name", Value::Null).unwrap();
        doc.set("age", 0_i64).unwrap();
        doc.set("active", false).unwrap();
        let (set, unset) = doc.delta();
        assert_eq!(Json::Object(set), json!({"age": 0, "active": false}));
        assert_eq!(Json::Object(unset), json!({"name": 1}));
    }

    #[test]
    fn test_empty_string_differing_from_default_is_set() {
        let mut doc = load(&person(), json!({"_id": "x", "nick": "bob"}));
        doc.set("nick", "").unwrap();
        let (set, unset) = doc.delta();
        assert_eq!(Json::Object(set), json!({"nick": ""}));
        assert!(unset.is_empty());
    }

    #[test]
    fn test_embedded_field_paths_use_db_names() {
        let mut doc = load(
            &person(),
            json!({"_id": "x", "address": {"c": "Paris", "tags": ["t"]}}),
        );
        {
            let address = doc.embedded_mut("address").unwrap();
            address.set("city", "Rome").unwrap();
            address.list_mut("tags").unwrap().clear();
        }
        let (set, unset) = doc.delta();
        assert_eq!(Json::Object(set), json!({"address.c": "Rome"}));
        assert_eq!(Json::Object(unset), json!({"address.tags": 1}));
    }

    #[test]
    fn test_list_index_change() {
        let mut doc = load(&person(), json!({"_id": "x", "tags": ["a", "b"]}));
        doc.list_mut("tags").unwrap().set(1, Value::from("z")).unwrap();
        let (set, _) = doc.delta();
        assert_eq!(Json::Object(set), json!({"tags.1": "z"}));
    }

    #[test]
    fn test_list_of_embedded_change() {
        let mut doc = load(
            &person(),
            json!({"_id": "x", "history": [{"c": "A"}, {"c": "B"}]}),
        );
        doc.list_mut("history")
            .unwrap()
            .embedded_at_mut(0)
            .unwrap()
            .set("city", "Z")
            .unwrap();
        let (set, _) = doc.delta();
        assert_eq!(Json::Object(set), json!({"history.0.c": "Z"}));
    }

    #[test]
    fn test_stale_path_is_skipped() {
        let mut doc = load(&person(), json!({"_id": "x", "tags": ["a", "b", "c"]}));
        doc.mark_changed("tags.7");
        doc.mark_changed("address.c");
        let (set, unset) = doc.delta();
        assert!(set.is_empty());
        assert!(unset.is_empty());
    }

    #[test]
    fn test_dynamic_empty_is_always_unset() {
        let schema = SchemaBuilder::document("DeltaLoose").dynamic().build().unwrap();
        let mut doc = load(&schema, json!({"_id": "x", "note": "hi", "n": 1}));
        doc.set("note", "").unwrap();
        doc.set("n", 2_i64).unwrap();
        let (set, unset) = doc.delta();
        assert_eq!(Json::Object(set), json!({"n": 2}));
        assert_eq!(Json::Object(unset), json!({"note": 1}));
    }

    #[test]
    fn test_walk_stops_at_scalar() {
        let root = json!({"a": 5});
        assert_eq!(walk_wire(&root, "a.b"), Some(("a".to_string(), json!(5))));
        assert_eq!(walk_wire(&root, "z"), Some(("z".to_string(), Json::Null)));
        assert_eq!(walk_wire(&root, "z.y"), None);
    }
}

//! Native value types for document data.
//!
//! The [`Value`] enum is the in-memory representation of every field value held
//! by a [`Document`]. It differs from the wire form ([`Json`]) in three ways:
//! containers are change-tracked, embedded documents keep their schema, and
//! references are either unresolved markers ([`DocRef`]) or live, shared
//! instances ([`ResolvedRef`]).
//!
//! The field-less conversions [`Value::to_json`] and [`Value::from_json`] are
//! used for dynamic fields and for values that have no field descriptor. Field
//! aware conversion lives in [`FieldDef`](crate::fields::FieldDef).

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use docmap_core::{DocmapError, DocmapResult};
use serde::{Deserialize, Serialize};

use crate::document::containers::{TrackedDict, TrackedList};
use crate::document::Document;
use crate::registry;

/// A value as it travels to and from the storage driver.
pub type Json = serde_json::Value;

/// A document as it travels to and from the storage driver.
pub type WireDoc = serde_json::Map<String, Json>;

/// A resolved document shared between every place that references it.
///
/// Documents are deliberately `!Send`: a resolved graph may contain cycles and
/// carries no internal locking.
pub type DocumentRef = Rc<RefCell<Document>>;

/// Wraps a document in a shared handle.
pub fn shared(doc: Document) -> DocumentRef {
    Rc::new(RefCell::new(doc))
}

/// A reference marker: the wire-level pointer to a foreign document.
///
/// Typed markers (from a reference field with a known target) carry no class
/// name. Generic markers carry the discriminator of the referenced document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocRef {
    /// The collection the referenced document lives in.
    pub collection: String,
    /// The referenced primary key, in wire form.
    pub id: Json,
    /// The referenced document's class name, for generic references.
    pub class_name: Option<String>,
}

impl DocRef {
    /// Creates a typed marker.
    pub fn new(collection: impl Into<String>, id: impl Into<Json>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            class_name: None,
        }
    }

    /// Creates a generic marker carrying the referenced class name.
    pub fn generic(
        class_name: impl Into<String>,
        collection: impl Into<String>,
        id: impl Into<Json>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            class_name: Some(class_name.into()),
        }
    }

    /// The `(collection, id)` identity used to deduplicate fetches.
    pub fn key(&self) -> (String, String) {
        (self.collection.clone(), id_key(&self.id))
    }

    /// The `{"$ref": .., "$id": ..}` wire form.
    pub fn to_dbref(&self) -> Json {
        serde_json::json!({ "$ref": self.collection, "$id": self.id })
    }

    /// The generic-reference wire form, `{"_cls": .., "_ref": {..}}`.
    pub fn to_generic(&self) -> Json {
        let mut map = WireDoc::new();
        if let Some(class_name) = &self.class_name {
            map.insert("_cls".into(), Json::String(class_name.clone()));
        }
        map.insert("_ref".into(), self.to_dbref());
        Json::Object(map)
    }

    /// Parses a `{"$ref", "$id"}` object.
    pub fn from_dbref(json: &Json) -> Option<Self> {
        let obj = json.as_object()?;
        let collection = obj.get("$ref")?.as_str()?;
        let id = obj.get("$id")?;
        Some(Self::new(collection, id.clone()))
    }

    /// Parses a `{"_cls", "_ref": {"$ref", "$id"}}` object.
    pub fn from_generic(json: &Json) -> Option<Self> {
        let obj = json.as_object()?;
        let mut marker = Self::from_dbref(obj.get("_ref")?)?;
        marker.class_name = obj.get("_cls").and_then(Json::as_str).map(String::from);
        Some(marker)
    }
}

/// A reference that has been resolved to a live document.
///
/// The original marker is kept alongside the handle so that serialization and
/// comparison never need to borrow the referenced document, which may be
/// mutably borrowed elsewhere in a cyclic graph.
///
/// The handle is either owning or a back-edge. Dereferencing only hands out
/// owning handles along edges that lead away from the documents the caller
/// holds, so a resolved graph never contains a cycle of owning handles and is
/// freed once the caller drops its documents. A back-edge whose target has been
/// dropped no longer upgrades; the reference then behaves as its marker.
#[derive(Clone)]
pub struct ResolvedRef {
    marker: DocRef,
    link: Link,
}

#[derive(Clone)]
enum Link {
    Owned(DocumentRef),
    Back(Weak<RefCell<Document>>),
}

impl ResolvedRef {
    /// Wraps a saved document so it can be stored in a reference field.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the document has no primary key yet, or is an
    /// embedded document.
    pub fn new(doc: &DocumentRef) -> DocmapResult<Self> {
        let marker = doc.borrow().to_marker().ok_or_else(|| {
            DocmapError::ValidationError(docmap_core::ValidationError::new(
                "You can only reference documents once they have been saved to the database",
                "unsaved_reference",
            ))
        })?;
        Ok(Self {
            marker,
            link: Link::Owned(Rc::clone(doc)),
        })
    }

    pub(crate) fn owned(marker: DocRef, doc: DocumentRef) -> Self {
        Self {
            marker,
            link: Link::Owned(doc),
        }
    }

    pub(crate) fn back_edge(marker: DocRef, doc: &DocumentRef) -> Self {
        Self {
            marker,
            link: Link::Back(Rc::downgrade(doc)),
        }
    }

    /// The marker this reference was resolved from.
    pub fn marker(&self) -> &DocRef {
        &self.marker
    }

    /// The shared document handle, or `None` if a back-edge outlived its target.
    pub fn doc(&self) -> Option<DocumentRef> {
        match &self.link {
            Link::Owned(doc) => Some(Rc::clone(doc)),
            Link::Back(weak) => weak.upgrade(),
        }
    }

    /// Returns `true` if this reference keeps its target alive.
    pub const fn is_owning(&self) -> bool {
        matches!(self.link, Link::Owned(_))
    }
}

impl fmt::Debug for ResolvedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRef")
            .field("collection", &self.marker.collection)
            .field("id", &self.marker.id)
            .finish_non_exhaustive()
    }
}

/// A native document value.
///
/// # Examples
///
/// ```
/// use docmap_odm::value::Value;
///
/// let v = Value::from(42_i64);
/// assert_eq!(v, Value::Int(42));
///
/// let v = Value::from("hello");
/// assert_eq!(v, Value::String("hello".to_string()));
/// assert!(Value::list(Vec::<Value>::new()).is_empty_value());
/// ```
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent / null.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// A UTC timestamp (millisecond precision on the wire).
    DateTime(DateTime<Utc>),
    /// A change-tracked list.
    List(TrackedList),
    /// A change-tracked mapping.
    Dict(TrackedDict),
    /// An embedded document owned by its parent.
    Embedded(Box<Document>),
    /// An unresolved reference marker.
    Reference(DocRef),
    /// A resolved, shared reference.
    Document(ResolvedRef),
}

impl Value {
    /// Builds a list value.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a dict value.
    pub fn dict<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Dict(items.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Builds a resolved reference value from a saved document.
    pub fn reference_to(doc: &DocumentRef) -> DocmapResult<Self> {
        ResolvedRef::new(doc).map(Self::Document)
    }

    /// Returns `true` for `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for the values a delta treats as "empty": null, the empty
    /// string, the empty list and the empty dict. `0` and `false` are not empty.
    pub fn is_empty_value(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Dict(d) => d.is_empty(),
            _ => false,
        }
    }

    /// Returns the string slice if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Int`.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float value of an `Int` or `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the list if this is a `List`.
    pub const fn as_list(&self) -> Option<&TrackedList> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the dict if this is a `Dict`.
    pub const fn as_dict(&self) -> Option<&TrackedDict> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the embedded document if this is `Embedded`.
    pub fn as_embedded(&self) -> Option<&Document> {
        match self {
            Self::Embedded(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the shared handle if this is a resolved reference whose target
    /// is still alive.
    pub fn as_document(&self) -> Option<DocumentRef> {
        match self {
            Self::Document(r) => r.doc(),
            _ => None,
        }
    }

    /// Returns the marker of a reference, resolved or not.
    pub const fn as_marker(&self) -> Option<&DocRef> {
        match self {
            Self::Reference(m) => Some(m),
            Self::Document(r) => Some(&r.marker),
            _ => None,
        }
    }

    /// Converts to wire form without a field descriptor.
    ///
    /// Embedded documents always carry `_cls` so that [`Value::from_json`] can
    /// rebuild them. Markers are written as generic references when they carry
    /// a class name, as `{"$ref", "$id"}` otherwise.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Self::String(s) => Json::String(s.clone()),
            Self::DateTime(dt) => datetime_to_json(dt),
            Self::List(l) => Json::Array(l.iter().map(Self::to_json).collect()),
            Self::Dict(d) => Json::Object(d.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Self::Embedded(doc) => {
                let mut wire = doc.to_wire();
                wire.insert("_cls".into(), Json::String(doc.schema().class_name().to_string()));
                Json::Object(wire)
            }
            Self::Reference(marker) => marker_to_json(marker),
            Self::Document(resolved) => marker_to_json(&resolved.marker),
        }
    }

    /// Converts from wire form without a field descriptor.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or_default()), Self::Int),
            Json::String(s) => Self::String(s.clone()),
            Json::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Json::Object(obj) => {
                if let Some(dt) = datetime_from_json(json) {
                    return Self::DateTime(dt);
                }
                if let Some(marker) = DocRef::from_dbref(json) {
                    return Self::Reference(marker);
                }
                if let Some(marker) = DocRef::from_generic(json) {
                    return Self::Reference(marker);
                }
                if let Some(class_name) = obj.get("_cls").and_then(Json::as_str) {
                    if let Some(schema) = registry::resolve(class_name) {
                        if schema.is_embedded() {
                            return Self::Embedded(Box::new(Document::from_embedded_wire(
                                &schema, obj,
                            )));
                        }
                    }
                }
                Self::Dict(
                    obj.iter()
                        .map(|(k, v)| (k.clone(), Self::from_json(v)))
                        .collect(),
                )
            }
        }
    }
}

fn marker_to_json(marker: &DocRef) -> Json {
    if marker.class_name.is_some() {
        marker.to_generic()
    } else {
        marker.to_dbref()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Embedded(a), Self::Embedded(b)) => a == b,
            // References compare by identity, resolved or not.
            (
                Self::Reference(_) | Self::Document(_),
                Self::Reference(_) | Self::Document(_),
            ) => match (self.as_marker(), other.as_marker()) {
                (Some(a), Some(b)) => a.collection == b.collection && a.id == b.id,
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Dict(d) => {
                write!(f, "{{")?;
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Embedded(doc) => write!(f, "<{}>", doc.schema().name()),
            Self::Reference(m) => write!(f, "<ref {}:{}>", m.collection, m.id),
            Self::Document(r) => write!(f, "<{}:{}>", r.marker.collection, r.marker.id),
        }
    }
}

// ── From implementations ───────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v.into_iter().collect())
    }
}

impl From<TrackedList> for Value {
    fn from(v: TrackedList) -> Self {
        Self::List(v)
    }
}

impl From<TrackedDict> for Value {
    fn from(v: TrackedDict) -> Self {
        Self::Dict(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Embedded(Box::new(v))
    }
}

impl From<DocRef> for Value {
    fn from(v: DocRef) -> Self {
        Self::Reference(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ── Wire helpers ───────────────────────────────────────────────────────

/// Canonical string form of an id, used as a hash key.
pub fn id_key(id: &Json) -> String {
    match id {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encodes a timestamp as `{"$date": millis}`.
pub fn datetime_to_json(dt: &DateTime<Utc>) -> Json {
    serde_json::json!({ "$date": dt.timestamp_millis() })
}

/// Decodes a `{"$date": millis}` object.
pub fn datetime_from_json(json: &Json) -> Option<DateTime<Utc>> {
    let obj = json.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    let millis = obj.get("$date")?.as_i64()?;
    DateTime::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7_i32), Value::Int(7));
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_empty_values() {
        assert!(Value::Null.is_empty_value());
        assert!(Value::from("").is_empty_value());
        assert!(Value::list(Vec::<Value>::new()).is_empty_value());
        assert!(!Value::from(0_i64).is_empty_value());
        assert!(!Value::from(false).is_empty_value());
    }

    #[test]
    fn test_int_float_equality() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::String("3".into()));
    }

    #[test]
    fn test_datetime_json() {
        let dt = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let json = Value::from(dt).to_json();
        assert_eq!(json, serde_json::json!({"$date": 1_700_000_000_123_i64}));
        assert_eq!(Value::from_json(&json), Value::DateTime(dt));
    }

    #[test]
    fn test_marker_json_forms() {
        let typed = DocRef::new("people", "abc");
        assert_eq!(
            Value::Reference(typed.clone()).to_json(),
            serde_json::json!({"$ref": "people", "$id": "abc"})
        );
        let generic = DocRef::generic("Person", "people", "abc");
        let json = Value::Reference(generic.clone()).to_json();
        assert_eq!(json["_cls"], "Person");
        assert_eq!(Value::from_json(&json), Value::Reference(generic));
        assert_eq!(Value::from_json(&typed.to_dbref()), Value::Reference(typed));
    }

    #[test]
    fn test_nested_from_json() {
        let json = serde_json::json!({"a": [1, 2.5, "x"], "b": null});
        let value = Value::from_json(&json);
        let dict = value.as_dict().unwrap();
        let list = dict.get("a").and_then(Value::as_list).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(1), Some(&Value::Float(2.5)));
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_id_key() {
        assert_eq!(id_key(&serde_json::json!("abc")), "abc");
        assert_eq!(id_key(&serde_json::json!(12)), "12");
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::list([1_i64, 2]).to_string(), "[1, 2]");
        assert_eq!(Value::Null.to_string(), "null");
    }
}

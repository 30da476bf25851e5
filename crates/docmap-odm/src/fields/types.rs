//! Field type definitions.
//!
//! A [`FieldDef`] describes one field of a document schema: its attribute
//! name, on-wire name, default, constraints and [`FieldType`]. The field type
//! owns the per-type rules for converting between native [`Value`]s and wire
//! [`Json`], validating values, and preparing query operands.

use std::fmt;
use std::sync::Arc;

use docmap_core::{DocmapError, DocmapResult, ValidationError};

use crate::document::Document;
use crate::registry;
use crate::schema::{default_collection_name, Schema};
use crate::value::{datetime_from_json, datetime_to_json, DocRef, Json, Value, WireDoc};

/// Query operators that take a string and compile to a regular expression.
pub const STRING_OPERATORS: &[&str] = &[
    "contains",
    "icontains",
    "startswith",
    "istartswith",
    "endswith",
    "iendswith",
    "exact",
    "iexact",
    "regex",
    "iregex",
    "wholeword",
    "iwholeword",
];

/// The type of a field, determining its conversion and validation rules.
#[derive(Clone)]
pub enum FieldType {
    /// A generated identifier (uuid-v4 string).
    ObjectId,
    /// A UTF-8 string with optional length bounds.
    String {
        /// Minimum length in characters.
        min_length: Option<usize>,
        /// Maximum length in characters.
        max_length: Option<usize>,
    },
    /// A 64-bit integer with optional bounds.
    Int {
        /// Smallest accepted value.
        min_value: Option<i64>,
        /// Largest accepted value.
        max_value: Option<i64>,
    },
    /// A 64-bit float with optional bounds.
    Float {
        /// Smallest accepted value.
        min_value: Option<f64>,
        /// Largest accepted value.
        max_value: Option<f64>,
    },
    /// A boolean.
    Bool,
    /// A UTC timestamp, `{"$date": millis}` on the wire.
    DateTime,
    /// A list whose items are described by the inner field.
    List(Box<FieldDef>),
    /// A string-keyed mapping, optionally with typed values.
    Dict(Option<Box<FieldDef>>),
    /// An embedded document of the given schema (or a subclass).
    Embedded(Arc<Schema>),
    /// A reference to a document of the named class.
    Reference {
        /// Class name of the referenced schema.
        target: String,
        /// Store `{"$ref", "$id"}` instead of the bare id.
        dbref: bool,
    },
    /// A reference to a document of any class.
    GenericReference,
    /// Any value, converted without a descriptor.
    Dynamic,
}

impl FieldType {
    /// An unbounded string.
    pub const fn string() -> Self {
        Self::String {
            min_length: None,
            max_length: None,
        }
    }

    /// An unbounded integer.
    pub const fn int() -> Self {
        Self::Int {
            min_value: None,
            max_value: None,
        }
    }

    /// An unbounded float.
    pub const fn float() -> Self {
        Self::Float {
            min_value: None,
            max_value: None,
        }
    }

    /// A list of the given item type.
    pub fn list(item: Self) -> Self {
        Self::List(Box::new(FieldDef::new("", item)))
    }

    /// A mapping with values of the given type.
    pub fn dict_of(item: Self) -> Self {
        Self::Dict(Some(Box::new(FieldDef::new("", item))))
    }

    /// A reference to `target`, stored as the bare id.
    pub fn reference(target: impl Into<String>) -> Self {
        Self::Reference {
            target: target.into(),
            dbref: false,
        }
    }

    /// Short name used in error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::ObjectId => "ObjectId",
            Self::String { .. } => "String",
            Self::Int { .. } => "Int",
            Self::Float { .. } => "Float",
            Self::Bool => "Bool",
            Self::DateTime => "DateTime",
            Self::List(_) => "List",
            Self::Dict(_) => "Dict",
            Self::Embedded(_) => "Embedded",
            Self::Reference { .. } => "Reference",
            Self::GenericReference => "GenericReference",
            Self::Dynamic => "Dynamic",
        }
    }
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(item) => write!(f, "List({:?})", item.field_type),
            Self::Dict(Some(item)) => write!(f, "Dict({:?})", item.field_type),
            Self::Embedded(schema) => write!(f, "Embedded({})", schema.class_name()),
            Self::Reference { target, .. } => write!(f, "Reference({target})"),
            other => f.write_str(other.type_name()),
        }
    }
}

/// The default of a field.
///
/// Static defaults are kept in wire form so that schemas stay `Send + Sync`;
/// they are converted through the field on every use, so no two documents ever
/// share a mutable default.
#[derive(Clone)]
pub enum FieldDefault {
    /// A constant default, in wire form.
    Wire(Json),
    /// A factory invoked fresh for every new document.
    Factory(fn() -> Value),
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(json) => write!(f, "Wire({json})"),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Complete definition of a document field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The attribute name of this field.
    pub name: String,
    /// The on-wire name (defaults to `name`; `_id` for the primary key).
    pub db_field: String,
    /// The type of this field.
    pub field_type: FieldType,
    /// Whether a value must be present for the document to validate.
    pub required: bool,
    /// The declared default.
    pub default: Option<FieldDefault>,
    /// Whether a unique index is declared.
    pub unique: bool,
    /// Whether this field is the primary key.
    pub primary_key: bool,
    /// Allowed values.
    pub choices: Option<Vec<Json>>,
}

impl FieldDef {
    /// Creates a new `FieldDef` with sensible defaults.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            db_field: name.clone(),
            name,
            field_type,
            required: false,
            default: None,
            unique: false,
            primary_key: false,
            choices: None,
        }
    }

    /// Sets the on-wire name.
    #[must_use]
    pub fn db_field(mut self, db_field: impl Into<String>) -> Self {
        self.db_field = db_field.into();
        self
    }

    /// Marks the field as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Declares a unique index on the field.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Sets a constant default.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        let wire = self.to_wire(&value.into());
        self.default = Some(FieldDefault::Wire(wire));
        self
    }

    /// Sets a default factory, invoked fresh for every new document.
    #[must_use]
    pub fn default_with(mut self, factory: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Factory(factory));
        self
    }

    /// Restricts the field to the given values.
    #[must_use]
    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let wire = choices
            .into_iter()
            .map(|c| self.to_wire(&c.into()))
            .collect();
        self.choices = Some(wire);
        self
    }

    // ── introspection ──

    /// The item descriptor of a list or typed dict field.
    pub fn item_field(&self) -> Option<&FieldDef> {
        match &self.field_type {
            FieldType::List(item) => Some(item),
            FieldType::Dict(item) => item.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` for list and dict fields.
    pub const fn is_complex(&self) -> bool {
        matches!(self.field_type, FieldType::List(_) | FieldType::Dict(_))
    }

    /// Returns `true` for typed and generic reference fields.
    pub const fn is_reference(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::Reference { .. } | FieldType::GenericReference
        )
    }

    /// Returns `true` for generic reference fields.
    pub const fn is_generic_reference(&self) -> bool {
        matches!(self.field_type, FieldType::GenericReference)
    }

    /// Returns `true` if the field or its item type is a reference.
    pub fn holds_references(&self) -> bool {
        self.is_reference() || self.item_field().is_some_and(Self::holds_references)
    }

    /// The class name of a typed reference target, looking through lists and dicts.
    pub fn reference_target(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::Reference { target, .. } => Some(target),
            FieldType::List(_) | FieldType::Dict(_) => {
                self.item_field().and_then(Self::reference_target)
            }
            _ => None,
        }
    }

    /// Resolves a member name below this field (embedded field, or the item
    /// type's member for lists and dicts).
    pub fn lookup_member(&self, name: &str) -> Option<&FieldDef> {
        match &self.field_type {
            FieldType::Embedded(schema) => schema.field(name),
            FieldType::List(_) | FieldType::Dict(_) => {
                self.item_field().and_then(|item| item.lookup_member(name))
            }
            _ => None,
        }
    }

    /// A fresh copy of the declared default.
    ///
    /// Without a declared default, lists default to `[]`, dicts to `{}` and
    /// everything else to null.
    pub fn default_value(&self) -> Value {
        match &self.default {
            Some(FieldDefault::Wire(json)) => self.to_native(json),
            Some(FieldDefault::Factory(factory)) => factory(),
            None => match self.field_type {
                FieldType::List(_) => Value::List(Default::default()),
                FieldType::Dict(_) => Value::Dict(Default::default()),
                _ => Value::Null,
            },
        }
    }

    /// The wire form of [`default_value`](Self::default_value).
    pub fn default_wire(&self) -> Json {
        match &self.default {
            Some(FieldDefault::Wire(json)) => json.clone(),
            _ => self.to_wire(&self.default_value()),
        }
    }

    // ── conversion ──

    /// Converts a native value to wire form.
    ///
    /// Values whose shape does not match the field type are converted without
    /// the descriptor; validation reports the mismatch.
    pub fn to_wire(&self, value: &Value) -> Json {
        match (&self.field_type, value) {
            (_, Value::Null) => Json::Null,
            (FieldType::Float { .. }, Value::Int(i)) => Value::Float(*i as f64).to_json(),
            (FieldType::List(item), Value::List(list)) => {
                Json::Array(list.iter().map(|v| item.to_wire(v)).collect())
            }
            (FieldType::Dict(Some(item)), Value::Dict(dict)) => Json::Object(
                dict.iter()
                    .map(|(k, v)| (k.clone(), item.to_wire(v)))
                    .collect(),
            ),
            (FieldType::Embedded(_), Value::Embedded(doc)) => Json::Object(doc.to_wire()),
            (FieldType::Reference { dbref, .. }, Value::Reference(_) | Value::Document(_)) => {
                match value.as_marker() {
                    Some(marker) if *dbref => marker.to_dbref(),
                    Some(marker) => marker.id.clone(),
                    None => Json::Null,
                }
            }
            (FieldType::GenericReference, Value::Reference(_) | Value::Document(_)) => value
                .as_marker()
                .map_or(Json::Null, DocRef::to_generic),
            (FieldType::DateTime, Value::DateTime(dt)) => datetime_to_json(dt),
            _ => value.to_json(),
        }
    }

    /// Converts a wire value to native form.
    pub fn to_native(&self, json: &Json) -> Value {
        match (&self.field_type, json) {
            (_, Json::Null) => Value::Null,
            (FieldType::ObjectId | FieldType::String { .. }, Json::String(s)) => {
                Value::String(s.clone())
            }
            (FieldType::Int { .. }, Json::Number(n)) if n.is_i64() => {
                Value::Int(n.as_i64().unwrap_or_default())
            }
            (FieldType::Float { .. }, Json::Number(n)) => {
                Value::Float(n.as_f64().unwrap_or_default())
            }
            (FieldType::Bool, Json::Bool(b)) => Value::Bool(*b),
            (FieldType::DateTime, _) => {
                datetime_from_json(json).map_or_else(|| Value::from_json(json), Value::DateTime)
            }
            (FieldType::List(item), Json::Array(items)) => {
                Value::List(items.iter().map(|v| item.to_native(v)).collect())
            }
            (FieldType::Dict(Some(item)), Json::Object(obj)) => Value::Dict(
                obj.iter()
                    .map(|(k, v)| (k.clone(), item.to_native(v)))
                    .collect(),
            ),
            (FieldType::Embedded(schema), Json::Object(obj)) => {
                Value::Embedded(Box::new(Document::from_embedded_wire(schema, obj)))
            }
            (FieldType::Reference { target, .. }, _) => DocRef::from_dbref(json).map_or_else(
                || Value::Reference(DocRef::new(target_collection(target), json.clone())),
                Value::Reference,
            ),
            (FieldType::GenericReference, _) => {
                DocRef::from_generic(json).map_or_else(|| Value::from_json(json), Value::Reference)
            }
            _ => Value::from_json(json),
        }
    }

    // ── validation ──

    /// Validates a non-null value against the field type and choices.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if value.is_null() {
            return Ok(());
        }
        self.validate_type(value)?;
        if let Some(choices) = &self.choices {
            let wire = self.to_wire(value);
            if !choices.contains(&wire) {
                return Err(ValidationError::new(
                    format!("Value must be one of {}", Json::Array(choices.clone())),
                    "choice",
                ));
            }
        }
        Ok(())
    }

    fn invalid(&self) -> ValidationError {
        ValidationError::new(
            format!("expected a {} value", self.field_type.type_name()),
            "invalid",
        )
    }

    fn validate_type(&self, value: &Value) -> Result<(), ValidationError> {
        match (&self.field_type, value) {
            (FieldType::ObjectId, Value::String(s)) => uuid::Uuid::parse_str(s)
                .map(|_| ())
                .map_err(|_| ValidationError::new(format!("'{s}' is not a valid ObjectId"), "invalid")),
            (
                FieldType::String {
                    min_length,
                    max_length,
                },
                Value::String(s),
            ) => {
                let len = s.chars().count();
                if max_length.is_some_and(|max| len > max) {
                    return Err(ValidationError::new("String value is too long", "max_length"));
                }
                if min_length.is_some_and(|min| len < min) {
                    return Err(ValidationError::new("String value is too short", "min_length"));
                }
                Ok(())
            }
            (
                FieldType::Int {
                    min_value,
                    max_value,
                },
                Value::Int(i),
            ) => {
                if min_value.is_some_and(|min| *i < min) {
                    return Err(ValidationError::new("Integer value is too small", "min_value"));
                }
                if max_value.is_some_and(|max| *i > max) {
                    return Err(ValidationError::new("Integer value is too large", "max_value"));
                }
                Ok(())
            }
            (
                FieldType::Float {
                    min_value,
                    max_value,
                },
                Value::Int(_) | Value::Float(_),
            ) => {
                let f = value.as_f64().unwrap_or_default();
                if min_value.is_some_and(|min| f < min) {
                    return Err(ValidationError::new("Float value is too small", "min_value"));
                }
                if max_value.is_some_and(|max| f > max) {
                    return Err(ValidationError::new("Float value is too large", "max_value"));
                }
                Ok(())
            }
            (FieldType::Bool, Value::Bool(_)) | (FieldType::DateTime, Value::DateTime(_)) => Ok(()),
            (FieldType::List(item), Value::List(list)) => {
                let mut errors = ValidationError::default();
                for (i, v) in list.iter().enumerate() {
                    if let Err(e) = item.validate(v) {
                        errors.merge_prefixed(&i.to_string(), e);
                    }
                }
                if errors.is_empty() { Ok(()) } else { Err(errors) }
            }
            (FieldType::Dict(item), Value::Dict(dict)) => {
                let mut errors = ValidationError::default();
                for (k, v) in dict.iter() {
                    if k.contains('.') || k.starts_with('$') {
                        errors.add_field_error(
                            k.clone(),
                            ValidationError::new(
                                "Invalid dictionary key: may not contain \".\" or start with \"$\"",
                                "invalid_key",
                            ),
                        );
                    } else if let Some(item) = item {
                        if let Err(e) = item.validate(v) {
                            errors.merge_prefixed(k, e);
                        }
                    }
                }
                if errors.is_empty() { Ok(()) } else { Err(errors) }
            }
            (FieldType::Embedded(schema), Value::Embedded(doc)) => {
                if !doc.schema().is_same_or_subclass_of(schema) {
                    return Err(ValidationError::new(
                        format!(
                            "Invalid embedded document instance provided to an EmbeddedDocumentField; expected {}",
                            schema.name()
                        ),
                        "invalid",
                    ));
                }
                doc.validate()
            }
            (FieldType::Reference { target, .. }, Value::Reference(_) | Value::Document(_)) => {
                let class_name = value.as_marker().and_then(|m| m.class_name.as_deref());
                match (class_name, registry::resolve(target)) {
                    (Some(class_name), Some(expected))
                        if !(class_name == expected.class_name()
                            || class_name.starts_with(&format!("{}.", expected.class_name()))) =>
                    {
                        Err(ValidationError::new(
                            format!("A ReferenceField only accepts {} documents", expected.name()),
                            "invalid",
                        ))
                    }
                    _ => Ok(()),
                }
            }
            (FieldType::GenericReference, Value::Reference(_) | Value::Document(_)) => {
                if value.as_marker().is_some_and(|m| m.class_name.is_some()) {
                    Ok(())
                } else {
                    Err(ValidationError::new(
                        "A GenericReferenceField needs the referenced class name",
                        "invalid",
                    ))
                }
            }
            (FieldType::Dynamic, Value::Embedded(doc)) => doc.validate(),
            (FieldType::Dynamic, _) => Ok(()),
            _ => Err(self.invalid()),
        }
    }

    // ── queries ──

    /// Prepares a query operand for this field.
    ///
    /// String operators compile to a `{"$regex", "$options"}` document. List
    /// fields delegate single-item operands to their item type. References are
    /// reduced to the stored id form.
    pub fn prepare_query_value(&self, op: Option<&str>, value: &Value) -> DocmapResult<Json> {
        if let Some(op) = op.filter(|op| STRING_OPERATORS.contains(op)) {
            return match (&self.field_type, value) {
                (FieldType::List(item), _) => item.prepare_query_value(Some(op), value),
                (
                    FieldType::String { .. }
                    | FieldType::ObjectId
                    | FieldType::Dict(_)
                    | FieldType::Dynamic,
                    Value::String(s),
                ) => Ok(string_operator_regex(op, s)),
                _ => Err(DocmapError::InvalidQuery(format!(
                    "the '{op}' operator is not supported on {} field '{}'",
                    self.field_type.type_name(),
                    self.name
                ))),
            };
        }
        match (&self.field_type, value) {
            (FieldType::List(_), Value::List(_)) => Ok(self.to_wire(value)),
            (FieldType::List(item), _) => item.prepare_query_value(op, value),
            (FieldType::Dict(Some(item)), v) if !matches!(v, Value::Dict(_)) => {
                item.prepare_query_value(op, value)
            }
            (FieldType::GenericReference, Value::Reference(_) | Value::Document(_)) => {
                Ok(value.as_marker().map_or(Json::Null, DocRef::to_dbref))
            }
            (FieldType::Embedded(_), Value::Dict(_)) => Ok(value.to_json()),
            _ => Ok(self.to_wire(value)),
        }
    }
}

/// Builds the regex query document for a string operator.
pub fn string_operator_regex(op: &str, value: &str) -> Json {
    let escaped = regex::escape(value);
    let pattern = match op.trim_start_matches('i') {
        "contains" => escaped,
        "startswith" => format!("^{escaped}"),
        "endswith" => format!("{escaped}$"),
        "exact" => format!("^{escaped}$"),
        "wholeword" => format!("\\b{escaped}\\b"),
        _ => value.to_string(),
    };
    let mut doc = WireDoc::new();
    doc.insert("$regex".into(), Json::String(pattern));
    if op.starts_with('i') {
        doc.insert("$options".into(), Json::String("i".into()));
    }
    Json::Object(doc)
}

/// The collection of a reference target, from the registry when registered.
pub(crate) fn target_collection(target: &str) -> String {
    registry::resolve(target)
        .and_then(|schema| schema.collection().map(String::from))
        .unwrap_or_else(|| default_collection_name(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_def_new_defaults() {
        let f = FieldDef::new("first_name", FieldType::string());
        assert_eq!(f.name, "first_name");
        assert_eq!(f.db_field, "first_name");
        assert!(!f.required);
        assert!(!f.unique);
        assert!(!f.primary_key);
        assert!(f.default.is_none());
    }

    #[test]
    fn test_field_def_builder() {
        let f = FieldDef::new("age", FieldType::int())
            .db_field("a")
            .required()
            .unique()
            .default(18_i64);
        assert_eq!(f.db_field, "a");
        assert!(f.required);
        assert!(f.unique);
        assert_eq!(f.default_value(), Value::Int(18));
    }

    #[test]
    fn test_container_defaults_are_fresh() {
        let f = FieldDef::new("tags", FieldType::list(FieldType::string()));
        let mut first = f.default_value();
        if let Value::List(list) = &mut first {
            list.push("x");
        }
        assert!(f.default_value().is_empty_value());
        assert_eq!(f.default_wire(), serde_json::json!([]));
    }

    #[test]
    fn test_factory_default() {
        let f = FieldDef::new("tags", FieldType::list(FieldType::string()))
            .default_with(|| Value::list(["new"]));
        assert_eq!(f.default_value(), Value::list(["new"]));
    }

    #[test]
    fn test_string_length_validation() {
        let f = FieldDef::new(
            "code",
            FieldType::String {
                min_length: Some(2),
                max_length: Some(3),
            },
        );
        assert!(f.validate(&Value::from("ab")).is_ok());
        assert_eq!(f.validate(&Value::from("abcd")).unwrap_err().code, "max_length");
        assert_eq!(f.validate(&Value::from("a")).unwrap_err().code, "min_length");
        assert_eq!(f.validate(&Value::from(3_i64)).unwrap_err().code, "invalid");
    }

    #[test]
    fn test_int_bounds_and_choices() {
        let f = FieldDef::new(
            "level",
            FieldType::Int {
                min_value: Some(1),
                max_value: None,
            },
        )
        .choices([1_i64, 2, 3]);
        assert!(f.validate(&Value::from(2_i64)).is_ok());
        assert_eq!(f.validate(&Value::from(0_i64)).unwrap_err().code, "min_value");
        assert_eq!(f.validate(&Value::from(9_i64)).unwrap_err().code, "choice");
    }

    #[test]
    fn test_list_item_errors_are_indexed() {
        let f = FieldDef::new("scores", FieldType::list(FieldType::int()));
        let err = f
            .validate(&Value::list([Value::from(1_i64), Value::from("x")]))
            .unwrap_err();
        assert!(err.errors_for("1").is_some());
    }

    #[test]
    fn test_datetime_round_trip() {
        let f = FieldDef::new("at", FieldType::DateTime);
        let dt = chrono::DateTime::from_timestamp_millis(86_400_000).unwrap();
        let wire = f.to_wire(&Value::from(dt));
        assert_eq!(wire, serde_json::json!({"$date": 86_400_000}));
        assert_eq!(f.to_native(&wire), Value::DateTime(dt));
    }

    #[test]
    fn test_reference_wire_forms() {
        let plain = FieldDef::new("owner", FieldType::reference("NoSuchOwnerSchema"));
        let marker = Value::Reference(DocRef::new("no_such_owner_schema", "u1"));
        assert_eq!(plain.to_wire(&marker), serde_json::json!("u1"));
        assert_eq!(plain.to_native(&serde_json::json!("u1")), marker);

        let dbref = FieldDef::new(
            "owner",
            FieldType::Reference {
                target: "NoSuchOwnerSchema".into(),
                dbref: true,
            },
        );
        assert_eq!(
            dbref.to_wire(&marker),
            serde_json::json!({"$ref": "no_such_owner_schema", "$id": "u1"})
        );
    }

    #[test]
    fn test_string_operator_regex() {
        assert_eq!(
            string_operator_regex("icontains", "a.b"),
            serde_json::json!({"$regex": "a\\.b", "$options": "i"})
        );
        assert_eq!(
            string_operator_regex("startswith", "ab"),
            serde_json::json!({"$regex": "^ab"})
        );
        assert_eq!(
            string_operator_regex("iexact", "ab"),
            serde_json::json!({"$regex": "^ab$", "$options": "i"})
        );
        assert_eq!(
            string_operator_regex("regex", "^a.*"),
            serde_json::json!({"$regex": "^a.*"})
        );
    }

    #[test]
    fn test_prepare_query_value_list_delegates_to_item() {
        let f = FieldDef::new("tags", FieldType::list(FieldType::string()));
        assert_eq!(
            f.prepare_query_value(None, &Value::from("rust")).unwrap(),
            serde_json::json!("rust")
        );
        assert_eq!(
            f.prepare_query_value(Some("startswith"), &Value::from("ru")).unwrap(),
            serde_json::json!({"$regex": "^ru"})
        );
    }

    #[test]
    fn test_string_operator_rejected_on_int() {
        let f = FieldDef::new("age", FieldType::int());
        assert!(matches!(
            f.prepare_query_value(Some("contains"), &Value::from("1")),
            Err(DocmapError::InvalidQuery(_))
        ));
    }
}

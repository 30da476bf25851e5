//! Document schemas.
//!
//! A [`Schema`] is the immutable, compiled description of a document type: its
//! ordered fields, primary key, collection and inheritance identity. Schemas are
//! assembled once by [`SchemaBuilder::build`] and shared through `Arc`.
//!
//! Polymorphic schemas (`allow_inheritance`) are identified by their class name,
//! the dot-joined ancestor chain (e.g. `Animal.Mammal.Dog`), which is stored in
//! the `_cls` field of every document.

use std::collections::HashMap;
use std::sync::Arc;

use docmap_core::{DocmapError, DocmapResult};

use crate::fields::{FieldDef, FieldType};

/// The on-wire name of the primary key.
pub const ID_FIELD: &str = "_id";

/// The on-wire name of the class discriminator.
pub const CLS_FIELD: &str = "_cls";

/// One resolved segment of a field path.
#[derive(Debug, Clone, Copy)]
pub enum LookupPart<'a> {
    /// A declared field.
    Field(&'a FieldDef),
    /// A segment inside a list or dict with no descriptor of its own
    /// (an index, a key, or the positional operator).
    Raw(&'a str),
    /// A field of a dynamic document, or anything below one.
    Dynamic(&'a str),
}

impl LookupPart<'_> {
    /// The on-wire name of this segment.
    pub fn db_name(&self) -> &str {
        match self {
            Self::Field(field) => &field.db_field,
            Self::Raw(s) | Self::Dynamic(s) => s,
        }
    }

    /// The descriptor, if this segment is a declared field.
    pub const fn field(&self) -> Option<&FieldDef> {
        match self {
            Self::Field(field) => Some(field),
            _ => None,
        }
    }
}

/// The compiled description of a document type.
#[derive(Debug)]
pub struct Schema {
    class_name: String,
    name: String,
    fields: Vec<FieldDef>,
    by_name: HashMap<String, usize>,
    by_db_field: HashMap<String, usize>,
    pk: Option<String>,
    collection: Option<String>,
    allow_inheritance: bool,
    dynamic: bool,
    embedded: bool,
    is_abstract: bool,
    ordering: Vec<String>,
    shard_key: Vec<String>,
}

impl Schema {
    /// The dot-joined ancestor chain, e.g. `Animal.Dog`.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The short name, e.g. `Dog`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fields, inherited fields first.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Looks up a field by attribute name. `pk` names the primary key.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        let name = if name == "pk" {
            self.pk.as_deref()?
        } else {
            name
        };
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Looks up a field by on-wire name.
    pub fn field_by_db(&self, db_field: &str) -> Option<&FieldDef> {
        self.by_db_field.get(db_field).map(|&i| &self.fields[i])
    }

    /// The primary key field, if the schema has one.
    pub fn pk_field(&self) -> Option<&FieldDef> {
        self.pk.as_deref().and_then(|name| self.field(name))
    }

    /// The attribute name of the primary key.
    pub fn pk_name(&self) -> Option<&str> {
        self.pk.as_deref()
    }

    /// The collection documents of this schema are stored in.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Whether documents carry a `_cls` discriminator.
    pub const fn allow_inheritance(&self) -> bool {
        self.allow_inheritance
    }

    /// Whether undeclared fields are accepted and persisted.
    pub const fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Whether this is an embedded document schema.
    pub const fn is_embedded(&self) -> bool {
        self.embedded
    }

    /// Whether this schema only exists to be inherited from.
    pub const fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Default ordering keys (`[+|-]field.path`).
    pub fn ordering(&self) -> &[String] {
        &self.ordering
    }

    /// Attribute names of the shard key fields.
    pub fn shard_key(&self) -> &[String] {
        &self.shard_key
    }

    /// Returns `true` if `self` is `other` or a descendant of it.
    pub fn is_same_or_subclass_of(&self, other: &Self) -> bool {
        self.class_name == other.class_name
            || self
                .class_name
                .strip_prefix(other.class_name.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }

    /// The on-wire name of the attribute `name` (`pk` included).
    pub fn db_field_for(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.db_field.as_str())
    }

    /// Resolves a split field path against the schema.
    ///
    /// Attribute names and on-wire names are both accepted for declared fields.
    /// Segments below a list or dict without a descriptor of their own become
    /// [`LookupPart::Raw`]. Traversal through a reference field is refused.
    pub fn lookup_field<'a, S: AsRef<str>>(&'a self, parts: &'a [S]) -> DocmapResult<Vec<LookupPart<'a>>> {
        let mut resolved = Vec::with_capacity(parts.len());
        let mut current: Option<&FieldDef> = None;
        let mut dynamic = false;

        for part in parts {
            let part = part.as_ref();
            if dynamic {
                resolved.push(LookupPart::Dynamic(part));
                continue;
            }
            match current {
                None => {
                    if let Some(field) = self.field(part).or_else(|| self.field_by_db(part)) {
                        resolved.push(LookupPart::Field(field));
                        current = Some(field);
                    } else if self.dynamic {
                        resolved.push(LookupPart::Dynamic(part));
                        dynamic = true;
                    } else {
                        return Err(DocmapError::LookupError(format!(
                            "Cannot resolve field \"{part}\" on {}",
                            self.name
                        )));
                    }
                }
                Some(field) => {
                    if field.is_reference() {
                        let path: Vec<&str> = parts.iter().map(AsRef::as_ref).collect();
                        return Err(DocmapError::LookupError(format!(
                            "Cannot perform join in mongoDB: {}",
                            path.join("__")
                        )));
                    }
                    if let Some(member) = field.lookup_member(part) {
                        resolved.push(LookupPart::Field(member));
                        current = Some(member);
                    } else if accepts_dynamic_members(field) {
                        resolved.push(LookupPart::Dynamic(part));
                        dynamic = true;
                    } else if field.is_complex() {
                        resolved.push(LookupPart::Raw(part));
                    } else {
                        return Err(DocmapError::LookupError(format!(
                            "Cannot resolve subfield or operator {part} on the field {}",
                            field.name
                        )));
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Translates a dotted attribute path to its dotted on-wire form.
    pub fn translate_path(&self, path: &str) -> DocmapResult<String> {
        let parts: Vec<&str> = path.split('.').collect();
        let resolved = self.lookup_field(&parts)?;
        Ok(resolved
            .iter()
            .map(LookupPart::db_name)
            .collect::<Vec<_>>()
            .join("."))
    }
}

fn accepts_dynamic_members(field: &FieldDef) -> bool {
    let target = field.item_field().unwrap_or(field);
    match &target.field_type {
        FieldType::Dynamic => true,
        FieldType::Embedded(schema) => schema.is_dynamic(),
        _ => false,
    }
}

/// Derives the default collection name from a class name (`BlogPost` → `blog_post`).
pub fn default_collection_name(class_name: &str) -> String {
    let short = class_name.rsplit('.').next().unwrap_or(class_name);
    let mut out = String::with_capacity(short.len() + 4);
    for (i, ch) in short.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Assembles a [`Schema`] from a flat field list and an optional parent.
///
/// # Examples
///
/// ```
/// use docmap_odm::fields::{FieldDef, FieldType};
/// use docmap_odm::schema::SchemaBuilder;
///
/// let person = SchemaBuilder::document("Person")
///     .field(FieldDef::new("name", FieldType::string()).required())
///     .field(FieldDef::new("age", FieldType::int()).db_field("a"))
///     .build()
///     .unwrap();
///
/// assert_eq!(person.collection(), Some("person"));
/// assert_eq!(person.db_field_for("pk"), Some("_id"));
/// assert_eq!(person.translate_path("age").unwrap(), "a");
/// ```
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    parent: Option<Arc<Schema>>,
    fields: Vec<FieldDef>,
    collection: Option<String>,
    allow_inheritance: Option<bool>,
    dynamic: bool,
    embedded: bool,
    is_abstract: bool,
    ordering: Vec<String>,
    shard_key: Vec<String>,
}

impl SchemaBuilder {
    fn new(name: impl Into<String>, embedded: bool) -> Self {
        Self {
            name: name.into(),
            parent: None,
            fields: Vec::new(),
            collection: None,
            allow_inheritance: None,
            dynamic: false,
            embedded,
            is_abstract: false,
            ordering: Vec::new(),
            shard_key: Vec::new(),
        }
    }

    /// Starts a top-level document schema.
    pub fn document(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    /// Starts an embedded document schema.
    pub fn embedded(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// Inherits from `parent`.
    #[must_use]
    pub fn inherit(mut self, parent: &Arc<Schema>) -> Self {
        self.embedded = parent.is_embedded();
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds several fields.
    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Overrides the collection name.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Enables or disables `_cls` polymorphism.
    #[must_use]
    pub const fn allow_inheritance(mut self, allow: bool) -> Self {
        self.allow_inheritance = Some(allow);
        self
    }

    /// Accepts and persists undeclared fields.
    #[must_use]
    pub const fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Marks the schema abstract.
    #[must_use]
    pub const fn abstract_schema(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Sets the default ordering.
    #[must_use]
    pub fn ordering<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ordering = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the shard key (attribute names).
    #[must_use]
    pub fn shard_key<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shard_key = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Compiles the schema.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when the parent may not be subclassed, when
    /// two fields share a name or on-wire name, when more than one primary key
    /// is declared, or when a shard key names an unknown field.
    pub fn build(self) -> DocmapResult<Arc<Schema>> {
        let Self {
            name,
            parent,
            fields: own_fields,
            collection,
            allow_inheritance,
            dynamic,
            embedded,
            is_abstract,
            ordering,
            shard_key,
        } = self;

        let mut fields: Vec<FieldDef> = Vec::new();
        let (class_name, inherited) = match &parent {
            Some(parent) => {
                if !parent.allow_inheritance && !parent.is_abstract {
                    return Err(DocmapError::ConfigurationError(format!(
                        "Document {} may not be subclassed; set allow_inheritance to enable it",
                        parent.name
                    )));
                }
                fields.extend(parent.fields.iter().cloned());
                let class_name = if parent.is_abstract && !parent.allow_inheritance {
                    name.clone()
                } else {
                    format!("{}.{name}", parent.class_name)
                };
                (class_name, Some(Arc::clone(parent)))
            }
            None => (name.clone(), None),
        };

        for field in own_fields {
            if fields.iter().any(|f| f.name == field.name) {
                return Err(DocmapError::ConfigurationError(format!(
                    "Field '{}' is declared twice on {name}",
                    field.name
                )));
            }
            fields.push(field);
        }

        let allow_inheritance = allow_inheritance
            .or_else(|| inherited.as_ref().map(|p| p.allow_inheritance))
            .unwrap_or(false);
        let dynamic = dynamic || inherited.as_ref().is_some_and(|p| p.dynamic);

        // Primary key: declared, inherited, or an automatic `id`.
        let mut pk = None;
        for field in &mut fields {
            if field.primary_key {
                if pk.is_some() {
                    return Err(DocmapError::ConfigurationError(format!(
                        "Cannot override primary key field on {name}"
                    )));
                }
                field.db_field = ID_FIELD.to_string();
                pk = Some(field.name.clone());
            }
        }
        if pk.is_none() && !embedded && !is_abstract {
            fields.insert(
                0,
                FieldDef::new("id", FieldType::ObjectId)
                    .db_field(ID_FIELD)
                    .primary_key(),
            );
            pk = Some("id".to_string());
        }

        let mut by_name = HashMap::new();
        let mut by_db_field = HashMap::new();
        for (i, field) in fields.iter().enumerate() {
            if !field.primary_key && (field.db_field == ID_FIELD || field.db_field == CLS_FIELD) {
                return Err(DocmapError::ConfigurationError(format!(
                    "Field '{}' on {name} uses the reserved name {}",
                    field.name, field.db_field
                )));
            }
            by_name.insert(field.name.clone(), i);
            if by_db_field.insert(field.db_field.clone(), i).is_some() {
                return Err(DocmapError::ConfigurationError(format!(
                    "Field '{}' on {name} reuses the db field '{}'",
                    field.name, field.db_field
                )));
            }
        }

        let collection = if embedded {
            None
        } else {
            collection
                .or_else(|| {
                    inherited
                        .as_ref()
                        .filter(|p| !p.is_abstract)
                        .and_then(|p| p.collection.clone())
                })
                .or_else(|| Some(default_collection_name(&name)))
        };

        let ordering = if ordering.is_empty() {
            inherited.as_ref().map(|p| p.ordering.clone()).unwrap_or_default()
        } else {
            ordering
        };
        let shard_key = if shard_key.is_empty() {
            inherited.as_ref().map(|p| p.shard_key.clone()).unwrap_or_default()
        } else {
            shard_key
        };
        if let Some(missing) = shard_key.iter().find(|k| !by_name.contains_key(*k)) {
            return Err(DocmapError::ConfigurationError(format!(
                "Shard key '{missing}' is not a field of {name}"
            )));
        }

        Ok(Arc::new(Schema {
            class_name,
            name,
            fields,
            by_name,
            by_db_field,
            pk,
            collection,
            allow_inheritance,
            dynamic,
            embedded,
            is_abstract,
            ordering,
            shard_key,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Arc<Schema> {
        SchemaBuilder::embedded("Address")
            .field(FieldDef::new("city", FieldType::string()).db_field("c"))
            .build()
            .unwrap()
    }

    fn person() -> Arc<Schema> {
        SchemaBuilder::document("Person")
            .field(FieldDef::new("name", FieldType::string()))
            .field(FieldDef::new("age", FieldType::int()).db_field("a"))
            .field(FieldDef::new("address", FieldType::Embedded(address())))
            .field(FieldDef::new(
                "addresses",
                FieldType::list(FieldType::Embedded(address())),
            ))
            .field(FieldDef::new("best_friend", FieldType::reference("Person")))
            .field(FieldDef::new("scores", FieldType::dict_of(FieldType::int())))
            .build()
            .unwrap()
    }

    #[test]
    fn test_auto_primary_key() {
        let schema = person();
        let pk = schema.pk_field().unwrap();
        assert_eq!(pk.name, "id");
        assert_eq!(pk.db_field, "_id");
        assert_eq!(schema.fields()[0].name, "id");
        assert_eq!(schema.collection(), Some("person"));
    }

    #[test]
    fn test_declared_primary_key() {
        let schema = SchemaBuilder::document("Country")
            .field(FieldDef::new("code", FieldType::string()).primary_key())
            .build()
            .unwrap();
        assert_eq!(schema.pk_name(), Some("code"));
        assert_eq!(schema.db_field_for("code"), Some("_id"));
        assert!(schema.field("id").is_none());
    }

    #[test]
    fn test_embedded_has_no_pk_or_collection() {
        let schema = address();
        assert!(schema.pk_field().is_none());
        assert!(schema.collection().is_none());
        assert!(schema.is_embedded());
    }

    #[test]
    fn test_inheritance_chain() {
        let animal = SchemaBuilder::document("Animal")
            .allow_inheritance(true)
            .field(FieldDef::new("name", FieldType::string()))
            .build()
            .unwrap();
        let mammal = SchemaBuilder::document("Mammal").inherit(&animal).build().unwrap();
        let dog = SchemaBuilder::document("Dog")
            .inherit(&mammal)
            .field(FieldDef::new("breed", FieldType::string()))
            .build()
            .unwrap();
        assert_eq!(dog.class_name(), "Animal.Mammal.Dog");
        assert_eq!(dog.name(), "Dog");
        assert_eq!(dog.collection(), Some("animal"));
        assert!(dog.allow_inheritance());
        assert!(dog.field("name").is_some());
        assert!(dog.is_same_or_subclass_of(&animal));
        assert!(!animal.is_same_or_subclass_of(&dog));
    }

    #[test]
    fn test_subclassing_requires_inheritance() {
        let closed = SchemaBuilder::document("Closed").build().unwrap();
        let result = SchemaBuilder::document("Open").inherit(&closed).build();
        assert!(matches!(result, Err(DocmapError::ConfigurationError(_))));
    }

    #[test]
    fn test_duplicate_db_field_rejected() {
        let result = SchemaBuilder::document("Dup")
            .field(FieldDef::new("a", FieldType::int()).db_field("x"))
            .field(FieldDef::new("b", FieldType::int()).db_field("x"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_lookup_translates_db_names() {
        let schema = person();
        assert_eq!(schema.translate_path("age").unwrap(), "a");
        assert_eq!(schema.translate_path("pk").unwrap(), "_id");
        assert_eq!(schema.translate_path("address.city").unwrap(), "address.c");
        assert_eq!(schema.translate_path("addresses.city").unwrap(), "addresses.c");
        assert_eq!(schema.translate_path("addresses.2.city").unwrap(), "addresses.2.c");
        assert_eq!(schema.translate_path("scores.math").unwrap(), "scores.math");
    }

    #[test]
    fn test_lookup_refuses_reference_traversal() {
        let schema = person();
        let err = schema.lookup_field(&["best_friend", "name"]).unwrap_err();
        assert!(err.to_string().contains("Cannot perform join"));
    }

    #[test]
    fn test_lookup_unknown_field() {
        let schema = person();
        assert!(matches!(
            schema.lookup_field(&["nope"]),
            Err(DocmapError::LookupError(_))
        ));
        assert!(schema.lookup_field(&["age", "x"]).is_err());
    }

    #[test]
    fn test_dynamic_lookup() {
        let schema = SchemaBuilder::document("Loose")
            .dynamic()
            .build()
            .unwrap();
        let parts = schema.lookup_field(&["anything", "below"]).unwrap();
        assert!(matches!(parts[0], LookupPart::Dynamic("anything")));
        assert!(matches!(parts[1], LookupPart::Dynamic("below")));
    }

    #[test]
    fn test_default_collection_name() {
        assert_eq!(default_collection_name("BlogPost"), "blog_post");
        assert_eq!(default_collection_name("Animal.Dog"), "dog");
        assert_eq!(default_collection_name("person"), "person");
    }

    #[test]
    fn test_shard_key_must_exist() {
        let result = SchemaBuilder::document("Sharded").shard_key(["region"]).build();
        assert!(result.is_err());
    }
}

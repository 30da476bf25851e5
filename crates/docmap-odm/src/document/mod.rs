//! Document instances.
//!
//! A [`Document`] is one instance of a [`Schema`]: its field values, its
//! dynamic-field bucket, and the set of field paths changed since it was last
//! loaded or saved. Change tracking drives [`Document::delta`], which computes
//! the minimal `$set` / `$unset` update needed to persist the instance.
//!
//! Field values are reached through the schema accessor table by attribute
//! name; `pk` is an alias for the primary key. Lists, dicts and embedded
//! documents are mutated in place through [`Document::list_mut`],
//! [`Document::dict_mut`] and [`Document::embedded_mut`], which bind the
//! container to this document so the mutation is recorded.

pub mod containers;
mod delta;

use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use docmap_core::{DocmapError, DocmapResult, ValidationError};
use indexmap::IndexMap;

use crate::fields::{FieldDef, FieldType};
use crate::registry;
use crate::schema::{Schema, CLS_FIELD};
use crate::value::{DocRef, Json, Value, WireDoc};

use self::containers::{ChangeTracker, OwnerHandle, TrackedDict, TrackedList};

/// One instance of a document schema.
///
/// # Examples
///
/// ```
/// use docmap_odm::document::Document;
/// use docmap_odm::fields::{FieldDef, FieldType};
/// use docmap_odm::schema::SchemaBuilder;
/// use docmap_odm::value::Value;
///
/// let schema = SchemaBuilder::document("Person")
///     .field(FieldDef::new("name", FieldType::string()))
///     .field(FieldDef::new("age", FieldType::int()).db_field("a"))
///     .build()
///     .unwrap();
///
/// let mut person = Document::new(&schema, [("name", Value::from("Ada"))]);
/// person.set("age", 36_i64).unwrap();
/// assert_eq!(person.get("age"), Some(&Value::Int(36)));
/// assert_eq!(person.get_changed_fields(), vec!["a"]);
/// ```
pub struct Document {
    schema: Arc<Schema>,
    data: IndexMap<String, Value>,
    dynamic: IndexMap<String, Value>,
    extra: IndexMap<String, Json>,
    tracker: Rc<ChangeTracker>,
    owner: RefCell<Option<OwnerHandle>>,
    initialised: bool,
    created: bool,
    loaded_fields: Option<BTreeSet<String>>,
}

impl Document {
    /// Creates a new, unsaved instance.
    ///
    /// Every declared field starts at a fresh copy of its default. Keyword
    /// values then override the defaults; unknown keys go to the dynamic bucket
    /// on dynamic schemas and are kept as opaque extra data otherwise.
    pub fn new<I, K, V>(schema: &Arc<Schema>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut doc = Self::empty(schema);
        for field in schema.fields() {
            doc.data.insert(field.name.clone(), field.default_value());
        }
        for (key, value) in values {
            let key = key.into();
            let value = value.into();
            if let Some(field) = schema.field(&key) {
                doc.data.insert(field.name.clone(), value);
            } else if schema.is_dynamic() {
                doc.dynamic.insert(key, value);
            } else {
                doc.extra.insert(key, value.to_json());
            }
        }
        doc.created = true;
        doc.initialised = true;
        doc
    }

    fn empty(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            data: IndexMap::new(),
            dynamic: IndexMap::new(),
            extra: IndexMap::new(),
            tracker: Rc::new(ChangeTracker::new()),
            owner: RefCell::new(None),
            initialised: false,
            created: false,
            loaded_fields: None,
        }
    }

    /// The schema of this instance (the concrete subclass for polymorphic loads).
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns `true` until the instance has been persisted or was loaded.
    pub const fn is_created(&self) -> bool {
        self.created
    }

    /// Returns `true` once construction has completed.
    pub const fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// The fields loaded through a projection, if one was applied.
    pub const fn loaded_fields(&self) -> Option<&BTreeSet<String>> {
        self.loaded_fields.as_ref()
    }

    pub(crate) fn set_loaded_fields(&mut self, fields: Option<BTreeSet<String>>) {
        self.loaded_fields = fields;
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.created = false;
    }

    /// The path of this embedded document below its owner, once it has one.
    pub fn owner_path(&self) -> Option<String> {
        self.owner
            .borrow()
            .as_ref()
            .filter(|owner| owner.is_attached())
            .map(|owner| owner.path().to_string())
    }

    /// Hands an ownerless embedded document its owner.
    pub(crate) fn backfill_owner(&self, owner: OwnerHandle) {
        let mut slot = self.owner.borrow_mut();
        if slot.as_ref().map_or(true, |o| !o.is_attached()) {
            *slot = Some(owner);
        }
    }

    fn attach_owner(&self, owner: OwnerHandle) {
        *self.owner.borrow_mut() = Some(owner);
    }

    fn detach_owner(&self) {
        *self.owner.borrow_mut() = None;
    }

    // ── field access ──

    /// Returns the value of a declared or dynamic field. `pk` names the
    /// primary key.
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(field) = self.schema.field(name) {
            let value = self.data.get(&field.name)?;
            if let Value::Embedded(doc) = value {
                doc.backfill_owner(OwnerHandle::new(&self.tracker, field.db_field.clone()));
            }
            return Some(value);
        }
        let value = self.dynamic.get(name)?;
        if let Value::Embedded(doc) = value {
            doc.backfill_owner(OwnerHandle::new(&self.tracker, name));
        }
        Some(value)
    }

    /// Returns the primary key, if set.
    pub fn pk(&self) -> Option<&Value> {
        self.get("pk").filter(|v| !v.is_null())
    }

    /// Returns opaque data kept for an unknown key.
    pub fn extra(&self, key: &str) -> Option<&Json> {
        self.extra.get(key)
    }

    /// Iterates over the declared fields and their values, in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldDef, &Value)> + '_ {
        self.schema
            .fields()
            .iter()
            .filter_map(|field| self.data.get(&field.name).map(|v| (field, v)))
    }

    /// Names of the dynamic fields, in insertion order.
    pub fn dynamic_fields(&self) -> impl Iterator<Item = &String> + '_ {
        self.dynamic.keys()
    }

    /// Assigns a field.
    ///
    /// The field is marked changed only if the new value differs from the
    /// current one. A replaced container or embedded document is detached
    /// from this instance.
    ///
    /// # Errors
    ///
    /// Returns `OperationError` when changing the primary key or a shard key
    /// of a persisted document, and `LookupError` for an unknown field on a
    /// non-dynamic schema.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> DocmapResult<()> {
        let value = value.into();
        let schema = Arc::clone(&self.schema);

        if let Some(field) = schema.field(name) {
            let current = self.data.get(&field.name).unwrap_or(&Value::Null);
            if *current == value {
                return Ok(());
            }
            let immutable =
                field.primary_key || schema.shard_key().iter().any(|k| *k == field.name);
            if immutable && !self.created && !current.is_null() {
                return Err(DocmapError::OperationError(format!(
                    "Changing the value of the field '{}' of a saved {} is not allowed",
                    field.name,
                    schema.name()
                )));
            }
            let path = field.db_field.clone();
            let old = self.data.insert(field.name.clone(), value);
            self.adopt(&field.name, &path, false);
            if let Some(old) = old {
                detach(old);
            }
            self.tracker.mark(&path);
            return Ok(());
        }

        if !schema.is_dynamic() {
            return Err(DocmapError::LookupError(format!(
                "The field '{name}' does not exist on the document '{}'",
                schema.name()
            )));
        }
        if self.dynamic.get(name) == Some(&value) {
            return Ok(());
        }
        let old = self.dynamic.insert(name.to_string(), value);
        self.adopt(name, name, true);
        if let Some(old) = old {
            detach(old);
        }
        self.tracker.mark(name);
        Ok(())
    }

    /// Removes a field's value, leaving null behind, and returns it detached.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        let (slot, path) = if let Some(field) = self.schema.field(name) {
            (self.data.get_mut(&field.name)?, field.db_field.clone())
        } else {
            (self.dynamic.get_mut(name)?, name.to_string())
        };
        let old = std::mem::take(slot);
        if old.is_null() {
            return None;
        }
        self.tracker.mark(&path);
        Some(detach(old))
    }

    /// Gives an embedded document stored under `key` this instance as owner.
    fn adopt(&self, key: &str, path: &str, dynamic: bool) {
        let bucket = if dynamic { &self.dynamic } else { &self.data };
        if let Some(Value::Embedded(doc)) = bucket.get(key) {
            doc.attach_owner(OwnerHandle::new(&self.tracker, path));
        }
    }

    /// Locates the slot of a declared or dynamic field for in-place mutation.
    fn slot_mut(&mut self, name: &str) -> DocmapResult<(&mut Value, OwnerHandle, Option<&FieldDef>)> {
        let Self {
            schema,
            data,
            dynamic,
            tracker,
            ..
        } = self;
        let schema: &Schema = schema;
        if let Some(field) = schema.field(name) {
            let handle = OwnerHandle::new(tracker, field.db_field.clone());
            let slot = data.entry(field.name.clone()).or_default();
            return Ok((slot, handle, Some(field)));
        }
        match dynamic.get_mut(name) {
            Some(slot) => Ok((slot, OwnerHandle::new(tracker, name), None)),
            None => Err(DocmapError::LookupError(format!(
                "The field '{name}' does not exist on the document '{}'",
                schema.name()
            ))),
        }
    }

    /// Mutable access to a list field, bound to this instance.
    ///
    /// A null list field is initialised to an empty list first.
    pub fn list_mut(&mut self, name: &str) -> DocmapResult<&mut TrackedList> {
        let (slot, handle, field) = self.slot_mut(name)?;
        if slot.is_null() && field.is_some_and(|f| matches!(f.field_type, FieldType::List(_))) {
            *slot = Value::List(TrackedList::new());
        }
        match slot {
            Value::List(list) => {
                list.bind(handle);
                Ok(list)
            }
            _ => Err(DocmapError::OperationError(format!(
                "The field '{name}' does not hold a list"
            ))),
        }
    }

    /// Mutable access to a dict field, bound to this instance.
    pub fn dict_mut(&mut self, name: &str) -> DocmapResult<&mut TrackedDict> {
        let (slot, handle, field) = self.slot_mut(name)?;
        if slot.is_null() && field.is_some_and(|f| matches!(f.field_type, FieldType::Dict(_))) {
            *slot = Value::Dict(TrackedDict::new());
        }
        match slot {
            Value::Dict(dict) => {
                dict.bind(handle);
                Ok(dict)
            }
            _ => Err(DocmapError::OperationError(format!(
                "The field '{name}' does not hold a dict"
            ))),
        }
    }

    /// Mutable access to an embedded document field.
    ///
    /// The embedded document records its own changes; they surface through
    /// [`Document::get_changed_fields`] prefixed with the field's path.
    pub fn embedded_mut(&mut self, name: &str) -> DocmapResult<&mut Self> {
        let (slot, handle, _) = self.slot_mut(name)?;
        match slot {
            Value::Embedded(doc) => {
                doc.attach_owner(handle);
                Ok(doc)
            }
            _ => Err(DocmapError::OperationError(format!(
                "The field '{name}' does not hold an embedded document"
            ))),
        }
    }

    // ── change tracking ──

    /// Records `path` as changed. The leading segment may be an attribute
    /// name; it is translated to its on-wire name.
    pub fn mark_changed(&self, path: &str) {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let head = self.schema.db_field_for(head).unwrap_or(head);
        match rest {
            Some(rest) => self.tracker.mark(&format!("{head}.{rest}")),
            None => self.tracker.mark(head),
        }
    }

    /// The changes recorded on this instance only, in recording order.
    pub fn own_changed_fields(&self) -> Vec<String> {
        self.tracker.changed()
    }

    /// Every changed path of this instance and of the embedded documents it
    /// owns, as on-wire dotted paths. Reference fields are not followed.
    pub fn get_changed_fields(&self) -> Vec<String> {
        let collected = ChangeTracker::new();
        let mut visited = HashSet::new();
        self.collect_changed("", &collected, &mut visited);
        collected.changed()
    }

    fn collect_changed(
        &self,
        prefix: &str,
        out: &ChangeTracker,
        visited: &mut HashSet<*const ChangeTracker>,
    ) {
        if !visited.insert(Rc::as_ptr(&self.tracker)) {
            return;
        }
        for path in self.tracker.changed() {
            out.mark(&format!("{prefix}{path}"));
        }
        for field in self.schema.fields() {
            if field.holds_references() {
                continue;
            }
            if let Some(value) = self.data.get(&field.name) {
                let key = format!("{prefix}{}", field.db_field);
                collect_value_changes(value, &key, out, visited);
            }
        }
        for (name, value) in &self.dynamic {
            collect_value_changes(value, &format!("{prefix}{name}"), out, visited);
        }
    }

    /// Forgets every recorded change, including those of owned embedded documents.
    pub fn clear_changes(&self) {
        self.tracker.clear();
        for value in self.data.values().chain(self.dynamic.values()) {
            clear_value_changes(value);
        }
    }

    // ── wire conversion ──

    /// Serializes to wire form. Null values are omitted; polymorphic schemas
    /// add the `_cls` discriminator.
    pub fn to_wire(&self) -> WireDoc {
        let mut wire = WireDoc::new();
        for field in self.schema.fields() {
            if let Some(value) = self.data.get(&field.name) {
                let json = field.to_wire(value);
                if !json.is_null() {
                    wire.insert(field.db_field.clone(), json);
                }
            }
        }
        for (name, value) in &self.dynamic {
            let json = value.to_json();
            if !json.is_null() {
                wire.insert(name.clone(), json);
            }
        }
        for (key, json) in &self.extra {
            if !wire.contains_key(key) {
                wire.insert(key.clone(), json.clone());
            }
        }
        if self.schema.allow_inheritance() {
            wire.insert(
                CLS_FIELD.into(),
                Json::String(self.schema.class_name().to_string()),
            );
        }
        wire
    }

    /// Builds an instance from a stored wire document.
    ///
    /// The concrete schema is resolved through `_cls` when present. The result
    /// is not `created` and has no recorded changes.
    ///
    /// # Errors
    ///
    /// Returns `LookupError` when `_cls` names a class that is not registered
    /// or is not `schema` or one of its subclasses.
    pub fn from_wire(schema: &Arc<Schema>, wire: &WireDoc) -> DocmapResult<Self> {
        let concrete = match wire.get(CLS_FIELD).and_then(Json::as_str) {
            Some(cls) if cls != schema.class_name() => registry::resolve(cls)
                .filter(|found| found.is_same_or_subclass_of(schema))
                .ok_or_else(|| {
                    DocmapError::LookupError(format!(
                        "Unknown class '{cls}' for a {} document",
                        schema.name()
                    ))
                })?,
            _ => Arc::clone(schema),
        };
        Ok(Self::build_from_wire(&concrete, wire))
    }

    /// Builds an embedded instance; an unknown `_cls` falls back to `schema`.
    pub(crate) fn from_embedded_wire(schema: &Arc<Schema>, wire: &WireDoc) -> Self {
        let concrete = wire
            .get(CLS_FIELD)
            .and_then(Json::as_str)
            .filter(|cls| *cls != schema.class_name())
            .and_then(registry::resolve)
            .filter(|found| found.is_same_or_subclass_of(schema))
            .unwrap_or_else(|| Arc::clone(schema));
        Self::build_from_wire(&concrete, wire)
    }

    fn build_from_wire(schema: &Arc<Schema>, wire: &WireDoc) -> Self {
        let mut doc = Self::empty(schema);
        for field in schema.fields() {
            let value = wire
                .get(&field.db_field)
                .map_or_else(|| field.default_value(), |json| field.to_native(json));
            doc.data.insert(field.name.clone(), value);
        }
        for (key, json) in wire {
            if key == CLS_FIELD || schema.field_by_db(key).is_some() {
                continue;
            }
            if schema.is_dynamic() {
                doc.dynamic.insert(key.clone(), Value::from_json(json));
            } else {
                doc.extra.insert(key.clone(), json.clone());
            }
        }
        doc.initialised = true;
        doc
    }

    /// The reference marker pointing at this instance, once it has a primary key.
    pub fn to_marker(&self) -> Option<DocRef> {
        if self.schema.is_embedded() {
            return None;
        }
        let pk_field = self.schema.pk_field()?;
        let pk = self.pk()?;
        let collection = self.schema.collection()?;
        Some(DocRef::generic(
            self.schema.class_name(),
            collection,
            pk_field.to_wire(pk),
        ))
    }

    // ── validation ──

    /// Validates every field, collecting all failures into one error keyed by
    /// field name.
    ///
    /// Required fields excluded by a projection are not reported missing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::default();
        for field in self.schema.fields() {
            let value = self.data.get(&field.name).unwrap_or(&Value::Null);
            if value.is_null() {
                let loaded = self
                    .loaded_fields
                    .as_ref()
                    .map_or(true, |fields| fields.contains(&field.name));
                if field.required && loaded {
                    errors.add_field_error(
                        field.name.clone(),
                        ValidationError::new("Field is required", "required"),
                    );
                }
                continue;
            }
            if let Err(err) = field.validate(value) {
                errors.merge_prefixed(&field.name, err);
            }
        }
        for (name, value) in &self.dynamic {
            if let Value::Embedded(doc) = value {
                if let Err(err) = doc.validate() {
                    errors.merge_prefixed(name, err);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    // ── crate-internal access ──

    /// Visits every stored value with its descriptor (`None` for dynamic fields).
    pub(crate) fn for_each_value(&self, mut f: impl FnMut(Option<&FieldDef>, &Value)) {
        for field in self.schema.fields() {
            if let Some(value) = self.data.get(&field.name) {
                f(Some(field), value);
            }
        }
        for value in self.dynamic.values() {
            f(None, value);
        }
    }

    /// Untracked mutable visit of every stored value. Used to swap reference
    /// markers for resolved instances without recording a change.
    pub(crate) fn for_each_value_mut(&mut self, mut f: impl FnMut(Option<&FieldDef>, &mut Value)) {
        let schema = Arc::clone(&self.schema);
        for field in schema.fields() {
            if let Some(value) = self.data.get_mut(&field.name) {
                f(Some(field), value);
            }
        }
        for value in self.dynamic.values_mut() {
            f(None, value);
        }
    }

    /// Replaces this instance's contents with a freshly loaded copy. Existing
    /// containers are discarded along with their bindings.
    pub(crate) fn replace_with(&mut self, fresh: Self) {
        self.schema = fresh.schema;
        self.data = fresh.data;
        self.dynamic = fresh.dynamic;
        self.extra = fresh.extra;
        self.loaded_fields = fresh.loaded_fields;
        self.tracker.clear();
        self.created = false;
        self.initialised = true;
    }
}

/// Drops the owner binding of a value leaving a document.
fn detach(mut value: Value) -> Value {
    match &mut value {
        Value::List(list) => list.detach(),
        Value::Dict(dict) => dict.detach(),
        Value::Embedded(doc) => doc.detach_owner(),
        _ => {}
    }
    value
}

fn collect_value_changes(
    value: &Value,
    key: &str,
    out: &ChangeTracker,
    visited: &mut HashSet<*const ChangeTracker>,
) {
    match value {
        Value::Embedded(doc) => doc.collect_changed(&format!("{key}."), out, visited),
        Value::List(list) => {
            for (i, item) in list.iter().enumerate() {
                collect_value_changes(item, &format!("{key}.{i}"), out, visited);
            }
        }
        Value::Dict(dict) => {
            for (k, item) in dict.iter() {
                collect_value_changes(item, &format!("{key}.{k}"), out, visited);
            }
        }
        _ => {}
    }
}

fn clear_value_changes(value: &Value) {
    match value {
        Value::Embedded(doc) => doc.clear_changes(),
        Value::List(list) => list.iter().for_each(clear_value_changes),
        Value::Dict(dict) => dict.iter().for_each(|(_, v)| clear_value_changes(v)),
        _ => {}
    }
}

impl Clone for Document {
    /// Copies the data and the recorded changes. The copy has no owner and its
    /// containers are detached.
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            data: self.data.clone(),
            dynamic: self.dynamic.clone(),
            extra: self.extra.clone(),
            tracker: Rc::new(ChangeTracker::with_changes(self.tracker.changed())),
            owner: RefCell::new(None),
            initialised: self.initialised,
            created: self.created,
            loaded_fields: self.loaded_fields.clone(),
        }
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.schema.class_name() == other.schema.class_name()
            && self.data == other.data
            && self.dynamic == other.dynamic
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.schema.name());
        for (name, value) in self.data.iter().chain(self.dynamic.iter()) {
            s.field(name, value);
        }
        s.finish()
    }
}

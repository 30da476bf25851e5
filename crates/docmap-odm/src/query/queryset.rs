//! QuerySet and Manager for building and executing document queries.
//!
//! The [`QuerySet`] represents a lazy query over one schema's collection. It
//! only talks to the driver when a terminal method is called (`next()`,
//! `count()`, `get()`, `update()`, ...). The [`Manager`] is the entry point for
//! creating querysets on a schema.
//!
//! Chaining methods take `&self` and return a fresh queryset carrying the same
//! configuration but no cursor and no cached results. Iteration pulls
//! documents from a driver cursor into a result cache; [`QuerySet::rewind`]
//! drops both so the next pull re-queries.
//!
//! # Examples
//!
//! ```no_run
//! # async fn demo(manager: docmap_odm::query::Manager) -> docmap_core::DocmapResult<()> {
//! use docmap_odm::query::Q;
//!
//! let mut adults = manager
//!     .filter(Q::kw("age__gte", 18_i64))
//!     .order_by(&["-age"])?
//!     .limit(10);
//! while let Some(person) = adults.next().await? {
//!     println!("{:?}", person.borrow().get("name"));
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;

use docmap_core::{DocmapError, DocmapResult};
use indexmap::IndexMap;

use super::compiler::{OrderBy, QueryCompiler};
use super::lookups::Q;
use super::projection::{FieldValue, ProjectionMode, QueryFieldList};
use super::update::translate_update;
use crate::dereference::DeReference;
use crate::document::Document;
use crate::driver::{Cursor, Database, FindOptions};
use crate::registry;
use crate::schema::{Schema, CLS_FIELD, ID_FIELD};
use crate::value::{id_key, shared, DocumentRef, Json, Value, WireDoc};

/// The entry point for schema-level query operations.
///
/// The `Manager` holds no query state; it hands out fresh querysets.
#[derive(Clone, Debug)]
pub struct Manager {
    schema: Arc<Schema>,
    db: Database,
}

impl Manager {
    /// Creates a manager for `schema` backed by `db`.
    pub fn new(schema: &Arc<Schema>, db: &Database) -> Self {
        Self {
            schema: Arc::clone(schema),
            db: db.clone(),
        }
    }

    /// The managed schema.
    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns a queryset over every document of the schema.
    pub fn all(&self) -> QuerySet {
        QuerySet::new(&self.schema, &self.db)
    }

    /// Returns a queryset with the given filter applied.
    pub fn filter(&self, q: Q) -> QuerySet {
        self.all().filter(q)
    }

    /// Returns a queryset that matches nothing.
    pub fn none(&self) -> QuerySet {
        self.all().none()
    }
}

/// A lazy, chainable document query.
pub struct QuerySet {
    schema: Arc<Schema>,
    db: Database,
    query: Q,
    loaded_fields: QueryFieldList,
    ordering: Option<Vec<OrderBy>>,
    skip: u64,
    limit: Option<u64>,
    none: bool,
    select_related: Option<usize>,
    auto_dereference: bool,

    cursor: Option<Box<dyn Cursor>>,
    cache: Vec<DocumentRef>,
    exhausted: bool,
    dereferenced: bool,
    position: usize,
}

impl Clone for QuerySet {
    /// Copies the configuration only; the clone starts unevaluated.
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            db: self.db.clone(),
            query: self.query.clone(),
            loaded_fields: self.loaded_fields.clone(),
            ordering: self.ordering.clone(),
            skip: self.skip,
            limit: self.limit,
            none: self.none,
            select_related: self.select_related,
            auto_dereference: self.auto_dereference,
            cursor: None,
            cache: Vec::new(),
            exhausted: false,
            dereferenced: false,
            position: 0,
        }
    }
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("schema", &self.schema.class_name())
            .field("query", &self.query)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("none", &self.none)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl QuerySet {
    /// Creates an unfiltered queryset.
    pub fn new(schema: &Arc<Schema>, db: &Database) -> Self {
        let loaded_fields = if schema.allow_inheritance() {
            QueryFieldList::with_always_include([CLS_FIELD])
        } else {
            QueryFieldList::default()
        };
        Self {
            schema: Arc::clone(schema),
            db: db.clone(),
            query: Q::empty(),
            loaded_fields,
            ordering: None,
            skip: 0,
            limit: None,
            none: false,
            select_related: None,
            auto_dereference: db.options().auto_dereference,
            cursor: None,
            cache: Vec::new(),
            exhausted: false,
            dereferenced: false,
            position: 0,
        }
    }

    // ── accessors ──

    /// The queried schema.
    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The accumulated filter.
    pub const fn query(&self) -> &Q {
        &self.query
    }

    /// The accumulated projection.
    pub const fn loaded_fields(&self) -> &QueryFieldList {
        &self.loaded_fields
    }

    /// The configured skip.
    pub const fn skip_count(&self) -> u64 {
        self.skip
    }

    /// The configured limit; `Some(0)` always yields nothing.
    pub const fn limit_count(&self) -> Option<u64> {
        self.limit
    }

    // ── chaining ──

    /// ANDs `q` onto the current filter.
    #[must_use]
    pub fn filter(&self, q: Q) -> Self {
        let mut qs = self.clone();
        qs.query = qs.query & q;
        qs
    }

    /// ANDs keyword conditions onto the current filter.
    #[must_use]
    pub fn filter_kw<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.filter(Q::new(pairs))
    }

    /// Sets the sort order from `[+|-]attr.path` keys. An empty list clears it.
    ///
    /// # Errors
    ///
    /// Returns `LookupError` for an unknown field.
    pub fn order_by<S: AsRef<str>>(&self, keys: &[S]) -> DocmapResult<Self> {
        let ordering = QueryCompiler::new(&self.schema).compile_sort(keys)?;
        let mut qs = self.clone();
        qs.ordering = Some(ordering);
        Ok(qs)
    }

    /// Loads only the given fields (plus the primary key).
    ///
    /// # Errors
    ///
    /// Returns `LookupError` for an unknown field.
    pub fn only<S: AsRef<str>>(&self, fields: &[S]) -> DocmapResult<Self> {
        let mut qs = self.clone();
        let paths = self.db_paths(fields)?;
        qs.loaded_fields
            .add(paths, FieldValue::Mode(ProjectionMode::Only), true);
        Ok(qs)
    }

    /// Skips loading the given fields.
    ///
    /// # Errors
    ///
    /// Returns `LookupError` for an unknown field.
    pub fn exclude<S: AsRef<str>>(&self, fields: &[S]) -> DocmapResult<Self> {
        let mut qs = self.clone();
        let paths = self.db_paths(fields)?;
        qs.loaded_fields
            .add(paths, FieldValue::Mode(ProjectionMode::Exclude), false);
        Ok(qs)
    }

    /// Adjusts the projection field by field.
    ///
    /// A value of `1`/`true` includes a field and `0`/`false` excludes it. Keys
    /// prefixed with `slice__` or `elemMatch__` attach the corresponding
    /// projection operator, e.g. `("slice__comments", 5)` or
    /// `("slice__comments", [10, 5])`.
    ///
    /// # Errors
    ///
    /// Returns `LookupError` for an unknown field and `InvalidQuery` for a
    /// value that is neither a flag nor an operator operand.
    pub fn fields<I, K>(&self, specs: I) -> DocmapResult<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut cleaned: Vec<(String, FieldValue)> = Vec::new();
        for (key, value) in specs {
            let key = key.as_ref();
            let mut parts: Vec<&str> = key.split("__").collect();
            let head = parts[0];
            let spec = match head {
                "slice" | "elemMatch" | "elem_match" if parts.len() > 1 => {
                    let op = match parts.remove(0) {
                        "slice" => "$slice",
                        _ => "$elemMatch",
                    };
                    let mut doc = WireDoc::new();
                    doc.insert(op.into(), value.to_json());
                    FieldValue::Operator(Json::Object(doc))
                }
                _ => match value {
                    Value::Int(1) | Value::Bool(true) => FieldValue::Mode(ProjectionMode::Only),
                    Value::Int(0) | Value::Bool(false) => {
                        FieldValue::Mode(ProjectionMode::Exclude)
                    }
                    other => {
                        return Err(DocmapError::InvalidQuery(format!(
                            "invalid projection value for '{key}': {other}"
                        )))
                    }
                },
            };
            cleaned.push((parts.join("."), spec));
        }
        // Exclusions first, then inclusions, then operators.
        cleaned.sort_by_key(|(_, spec)| match spec {
            FieldValue::Mode(ProjectionMode::Exclude) => 0,
            FieldValue::Mode(ProjectionMode::Only) => 1,
            FieldValue::Operator(_) => 2,
        });

        let mut qs = self.clone();
        let mut start = 0;
        while start < cleaned.len() {
            let value = cleaned[start].1.clone();
            let end = cleaned[start..]
                .iter()
                .position(|(_, spec)| *spec != value)
                .map_or(cleaned.len(), |offset| start + offset);
            let names: Vec<&str> = cleaned[start..end].iter().map(|(k, _)| k.as_str()).collect();
            let paths = self.db_paths(&names)?;
            qs.loaded_fields.add(paths, value, false);
            start = end;
        }
        Ok(qs)
    }

    /// Drops every projection, loading whole documents again.
    #[must_use]
    pub fn all_fields(&self) -> Self {
        let mut qs = self.clone();
        qs.loaded_fields.reset();
        qs
    }

    /// Returns at most `n` documents. `limit(0)` returns nothing at all.
    #[must_use]
    pub fn limit(&self, n: u64) -> Self {
        let mut qs = self.clone();
        qs.limit = Some(n);
        qs
    }

    /// Skips the first `n` documents.
    #[must_use]
    pub fn skip(&self, n: u64) -> Self {
        let mut qs = self.clone();
        qs.skip = n;
        qs
    }

    /// Restricts results to the `range` of positions.
    #[must_use]
    pub fn slice(&self, range: Range<u64>) -> Self {
        let mut qs = self.clone();
        qs.skip = range.start;
        qs.limit = Some(range.end.saturating_sub(range.start));
        qs
    }

    /// Returns a queryset that never matches anything.
    #[must_use]
    pub fn none(&self) -> Self {
        let mut qs = self.clone();
        qs.none = true;
        qs
    }

    /// Resolves references in results, following up to `depth` fetch rounds.
    #[must_use]
    pub fn select_related(&self, depth: usize) -> Self {
        let mut qs = self.clone();
        qs.select_related = Some(depth);
        qs
    }

    /// Leaves every reference unresolved, even when the database resolves by default.
    #[must_use]
    pub fn no_dereference(&self) -> Self {
        let mut qs = self.clone();
        qs.auto_dereference = false;
        qs.select_related = None;
        qs
    }

    // ── compilation ──

    fn collection(&self) -> DocmapResult<String> {
        self.schema.collection().map(String::from).ok_or_else(|| {
            DocmapError::OperationError(format!(
                "{} has no collection to query",
                self.schema.class_name()
            ))
        })
    }

    fn db_paths<S: AsRef<str>>(&self, fields: &[S]) -> DocmapResult<BTreeSet<String>> {
        fields
            .iter()
            .map(|field| self.schema.translate_path(field.as_ref()))
            .collect()
    }

    /// The `_cls` scope of a polymorphic schema.
    fn class_scope(&self) -> Option<Json> {
        if !self.schema.allow_inheritance() {
            return None;
        }
        let mut classes = registry::subclasses(self.schema.class_name());
        if classes.len() == 1 {
            return classes.pop().map(Json::String);
        }
        let mut scope = WireDoc::new();
        scope.insert(
            "$in".into(),
            Json::Array(classes.into_iter().map(Json::String).collect()),
        );
        Some(Json::Object(scope))
    }

    /// Compiles the filter document sent to the driver.
    ///
    /// # Errors
    ///
    /// Returns the compiler's `LookupError` / `InvalidQuery`.
    pub fn compiled_filter(&self) -> DocmapResult<WireDoc> {
        let mut filter = QueryCompiler::new(&self.schema).compile_filter(&self.query)?;
        if let Some(scope) = self.class_scope() {
            let mut cls = WireDoc::new();
            cls.insert(CLS_FIELD.into(), scope);
            if filter.contains_key(CLS_FIELD) {
                let mut wrapped = WireDoc::new();
                wrapped.insert(
                    "$and".into(),
                    Json::Array(vec![Json::Object(cls), Json::Object(filter)]),
                );
                filter = wrapped;
            } else {
                filter.extend(cls);
            }
        }
        Ok(filter)
    }

    /// The `(path, direction)` sort sent to the driver.
    ///
    /// # Errors
    ///
    /// Returns `LookupError` if the schema's default ordering names an unknown field.
    pub fn compiled_sort(&self) -> DocmapResult<Vec<(String, i32)>> {
        let ordering = match &self.ordering {
            Some(ordering) => ordering.clone(),
            None => QueryCompiler::new(&self.schema).compile_sort(self.schema.ordering())?,
        };
        Ok(ordering
            .iter()
            .map(|order| (order.path.clone(), order.direction()))
            .collect())
    }

    fn find_options(&self) -> DocmapResult<FindOptions> {
        Ok(FindOptions {
            filter: self.compiled_filter()?,
            projection: self.loaded_fields.as_projection(),
            sort: self.compiled_sort()?,
            skip: self.skip,
            limit: self.limit,
            batch_size: self.db.options().batch_size,
        })
    }

    const fn is_empty_result(&self) -> bool {
        self.none || matches!(self.limit, Some(0))
    }

    fn dereference_depth(&self) -> Option<usize> {
        self.select_related.or_else(|| {
            self.auto_dereference
                .then_some(self.db.options().max_depth)
        })
    }

    /// Attribute names loaded under the projection, for documents of `schema`.
    fn loaded_names(&self, schema: &Schema) -> Option<BTreeSet<String>> {
        if self.loaded_fields.is_empty() {
            return None;
        }
        let named: BTreeSet<String> = self
            .loaded_fields
            .fields()
            .iter()
            .filter_map(|path| path.split('.').next())
            .filter_map(|head| schema.field_by_db(head))
            .map(|field| field.name.clone())
            .collect();
        let names = match self.loaded_fields.mode() {
            ProjectionMode::Only => {
                let mut names = named;
                names.extend(schema.pk_name().map(String::from));
                names
            }
            ProjectionMode::Exclude => schema
                .fields()
                .iter()
                .map(|field| field.name.clone())
                .filter(|name| !named.contains(name))
                .collect(),
        };
        Some(names)
    }

    // ── iteration ──

    /// Returns the next document, or `None` once the results are exhausted.
    ///
    /// # Errors
    ///
    /// Returns compilation errors, driver errors, and `LookupError` for a
    /// stored `_cls` outside this schema's hierarchy.
    pub async fn next(&mut self) -> DocmapResult<Option<DocumentRef>> {
        if self.is_empty_result() {
            return Ok(None);
        }
        if self.dereference_depth().is_some() && !self.dereferenced {
            self.materialize().await?;
        }
        if let Some(doc) = self.cache.get(self.position) {
            let doc = Rc::clone(doc);
            self.position += 1;
            return Ok(Some(doc));
        }
        let pulled = self.pull().await?;
        if pulled.is_some() {
            self.position += 1;
        }
        Ok(pulled)
    }

    /// Materializes every result and returns the cache.
    ///
    /// # Errors
    ///
    /// As for [`QuerySet::next`].
    pub async fn fetch_all(&mut self) -> DocmapResult<Vec<DocumentRef>> {
        if self.is_empty_result() {
            return Ok(Vec::new());
        }
        self.materialize().await?;
        Ok(self.cache.clone())
    }

    /// Alias of [`QuerySet::fetch_all`].
    ///
    /// # Errors
    ///
    /// As for [`QuerySet::next`].
    pub async fn all(&mut self) -> DocmapResult<Vec<DocumentRef>> {
        self.fetch_all().await
    }

    /// Resets iteration; the next pull re-queries the driver.
    pub fn rewind(&mut self) {
        self.cursor = None;
        self.cache.clear();
        self.exhausted = false;
        self.dereferenced = false;
        self.position = 0;
    }

    async fn materialize(&mut self) -> DocmapResult<()> {
        while self.pull().await?.is_some() {}
        if let Some(depth) = self.dereference_depth() {
            if !self.dereferenced {
                DeReference::new(&self.db, depth)
                    .resolve_documents(&self.cache)
                    .await?;
                self.dereferenced = true;
            }
        }
        Ok(())
    }

    /// Pulls one raw document off the cursor into the cache.
    async fn pull(&mut self) -> DocmapResult<Option<DocumentRef>> {
        if self.exhausted {
            return Ok(None);
        }
        let collection = self.collection()?;
        if self.cursor.is_none() {
            let options = self.find_options()?;
            tracing::debug!(
                collection = %collection,
                filter = %Json::Object(options.filter.clone()),
                skip = options.skip,
                limit = ?options.limit,
                "query compiled"
            );
            let cursor = self.db.find(&collection, options).await?;
            tracing::trace!(collection = %collection, "cursor opened");
            self.cursor = Some(cursor);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        match self.db.next_doc(&collection, cursor).await? {
            Some(wire) => {
                let mut doc = Document::from_wire(&self.schema, &wire)?;
                let loaded = self.loaded_names(doc.schema());
                doc.set_loaded_fields(loaded);
                let doc = shared(doc);
                self.cache.push(Rc::clone(&doc));
                Ok(Some(doc))
            }
            None => {
                self.cursor = None;
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    // ── retrieval ──

    /// Counts matching documents on the server.
    ///
    /// With `with_limit_and_skip`, the configured skip and limit apply.
    ///
    /// # Errors
    ///
    /// Returns compilation and driver errors.
    pub async fn count(&self, with_limit_and_skip: bool) -> DocmapResult<u64> {
        if self.none || (with_limit_and_skip && self.limit == Some(0)) {
            return Ok(0);
        }
        let collection = self.collection()?;
        let filter = self.compiled_filter()?;
        let (skip, limit) = if with_limit_and_skip {
            (self.skip, self.limit)
        } else {
            (0, None)
        };
        self.db.count(&collection, &filter, skip, limit).await
    }

    /// Returns the single document matching `q`.
    ///
    /// # Errors
    ///
    /// Returns `DoesNotExist` when nothing matches and `MultipleObjectsReturned`
    /// when more than one document does.
    pub async fn get(&self, q: Q) -> DocmapResult<DocumentRef> {
        let mut qs = self.filter(q).limit(2);
        let Some(doc) = qs.next().await? else {
            return Err(DocmapError::does_not_exist(self.schema.class_name()));
        };
        if qs.next().await?.is_some() {
            return Err(DocmapError::MultipleObjectsReturned {
                schema: self.schema.class_name().to_string(),
                count: 2,
            });
        }
        Ok(doc)
    }

    /// Like [`QuerySet::get`], with `Ok(None)` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns `MultipleObjectsReturned` and any other failure of `get`.
    pub async fn get_opt(&self, q: Q) -> DocmapResult<Option<DocumentRef>> {
        match self.get(q).await {
            Ok(doc) => Ok(Some(doc)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Returns the first document, if any.
    ///
    /// # Errors
    ///
    /// As for [`QuerySet::next`].
    pub async fn first(&self) -> DocmapResult<Option<DocumentRef>> {
        let mut qs = self.limit(1);
        qs.next().await
    }

    /// Returns the document with primary key `id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` when the queryset is already filtered.
    pub async fn with_id(&self, id: impl Into<Value>) -> DocmapResult<Option<DocumentRef>> {
        if !self.query.is_empty() {
            return Err(DocmapError::InvalidQuery(
                "Cannot use a filter whilst using with_id".into(),
            ));
        }
        self.filter(Q::kw("pk", id)).first().await
    }

    /// Fetches the documents with the given primary keys, keyed by id.
    ///
    /// # Errors
    ///
    /// As for [`QuerySet::next`].
    pub async fn in_bulk(&self, ids: &[Value]) -> DocmapResult<IndexMap<String, DocumentRef>> {
        let mut qs = self.filter(Q::kw("pk__in", Value::list(ids.iter().cloned())));
        let docs = qs.fetch_all().await?;
        let mut by_id = IndexMap::with_capacity(docs.len());
        for doc in docs {
            let key = {
                let borrowed = doc.borrow();
                borrowed.to_marker().map(|marker| id_key(&marker.id))
            };
            if let Some(key) = key {
                by_id.insert(key, doc);
            }
        }
        Ok(by_id)
    }

    // ── writes ──

    async fn perform_update(
        &self,
        spec: &[(String, Value)],
        upsert: bool,
        multi: bool,
    ) -> DocmapResult<crate::driver::WriteResult> {
        if spec.is_empty() && !upsert {
            return Err(DocmapError::OperationError(
                "No update parameters, would remove data".into(),
            ));
        }
        let collection = self.collection()?;
        let filter = self.compiled_filter()?;
        let mut update = translate_update(&self.schema, spec)?;
        if upsert && filter.contains_key(CLS_FIELD) {
            let cls = Json::String(self.schema.class_name().to_string());
            match update.get_mut("$set") {
                Some(Json::Object(set)) => {
                    set.insert(CLS_FIELD.into(), cls);
                }
                _ => {
                    let mut set = WireDoc::new();
                    set.insert(CLS_FIELD.into(), cls);
                    update.insert("$set".into(), Json::Object(set));
                }
            }
        }
        tracing::debug!(
            collection = %collection,
            update = %Json::Object(update.clone()),
            upsert,
            multi,
            "update compiled"
        );
        self.db
            .update(&collection, &filter, &update, upsert, multi)
            .await
    }

    /// Applies an update to every matching document; returns how many changed.
    ///
    /// Keys have the form `operator__field__path` (`set`, `unset`, `inc`, `dec`,
    /// `push`, `add_to_set`, ...); a key without an operator means `set`.
    ///
    /// # Errors
    ///
    /// Returns `OperationError` for an empty spec, translation errors, and
    /// mapped driver errors.
    pub async fn update<I, K, V>(&self, spec: I) -> DocmapResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let spec = collect_spec(spec);
        Ok(self.perform_update(&spec, false, true).await?.modified)
    }

    /// Applies an update to the first matching document.
    ///
    /// # Errors
    ///
    /// As for [`QuerySet::update`].
    pub async fn update_one<I, K, V>(&self, spec: I) -> DocmapResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let spec = collect_spec(spec);
        Ok(self.perform_update(&spec, false, false).await?.modified)
    }

    /// Updates the first matching document, inserting one if none matches,
    /// and returns it.
    ///
    /// # Errors
    ///
    /// As for [`QuerySet::update`], plus `DoesNotExist` if the document cannot
    /// be read back.
    pub async fn upsert_one<I, K, V>(&self, spec: I) -> DocmapResult<DocumentRef>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let spec = collect_spec(spec);
        let result = self.perform_update(&spec, true, false).await?;
        let found = match result.upserted_id {
            Some(id) => {
                let fresh = Self::new(&self.schema, &self.db);
                fresh.with_id(Value::from_json(&id)).await?
            }
            None => self.first().await?,
        };
        found.ok_or_else(|| DocmapError::does_not_exist(self.schema.class_name()))
    }

    /// Deletes every matching document; returns how many went.
    ///
    /// With a skip or limit in place, only the documents in that window are deleted.
    ///
    /// # Errors
    ///
    /// Returns compilation and driver errors.
    pub async fn delete(&self) -> DocmapResult<u64> {
        if self.is_empty_result() {
            return Ok(0);
        }
        let collection = self.collection()?;
        let filter = if self.skip > 0 || self.limit.is_some() {
            let mut window = self.only(&["pk"])?;
            let ids: Vec<Json> = window
                .fetch_all()
                .await?
                .iter()
                .filter_map(|doc| doc.borrow().to_marker().map(|marker| marker.id))
                .collect();
            let mut in_ids = WireDoc::new();
            in_ids.insert("$in".into(), Json::Array(ids));
            let mut filter = WireDoc::new();
            filter.insert(ID_FIELD.into(), Json::Object(in_ids));
            filter
        } else {
            self.compiled_filter()?
        };
        let removed = self.db.remove(&collection, &filter, true).await?;
        tracing::debug!(collection = %collection, removed, "documents deleted");
        Ok(removed)
    }

    /// The distinct values of `field` among matching documents.
    ///
    /// Values are converted through the field's native conversion; list fields
    /// yield their items.
    ///
    /// # Errors
    ///
    /// Returns `LookupError` for an unknown field, plus driver errors.
    pub async fn distinct(&self, field: &str) -> DocmapResult<Vec<Value>> {
        if self.is_empty_result() {
            return Ok(Vec::new());
        }
        let collection = self.collection()?;
        let parts: Vec<&str> = field.split('.').collect();
        let resolved = self.schema.lookup_field(&parts)?;
        let path = resolved
            .iter()
            .map(|part| part.db_name())
            .collect::<Vec<_>>()
            .join(".");
        let descriptor = resolved
            .last()
            .and_then(|part| part.field())
            .map(|field| field.item_field().unwrap_or(field).clone());
        let filter = self.compiled_filter()?;
        let values = self.db.distinct(&collection, &path, &filter).await?;
        Ok(values
            .iter()
            .map(|json| {
                descriptor
                    .as_ref()
                    .map_or_else(|| Value::from_json(json), |field| field.to_native(json))
            })
            .collect())
    }
}

fn collect_spec<I, K, V>(spec: I) -> Vec<(String, Value)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    spec.into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

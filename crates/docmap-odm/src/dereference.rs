//! Batched reference resolution.
//!
//! [`DeReference`] replaces reference markers inside documents (or a single
//! value) with shared, live instances. Each round collects the markers not
//! yet resolved, fetches them with one `find_by_ids` per collection (the
//! collections are fetched concurrently), and the next round scans the newly
//! fetched documents. Every instance goes into an identity map keyed by
//! `(collection, id)`, so a document referenced twice, or referenced back
//! from a cycle, resolves to the same `Rc`.
//!
//! Markers that cannot be resolved (missing documents, unregistered
//! collections) are left in place.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use docmap_core::{DocmapError, DocmapResult};
use tokio::task::JoinSet;

use crate::document::Document;
use crate::driver::{run_with_deadline, Database};
use crate::fields::FieldDef;
use crate::registry;
use crate::schema::{Schema, CLS_FIELD, ID_FIELD};
use crate::value::{id_key, shared, DocRef, DocumentRef, Json, ResolvedRef, Value, WireDoc};

type ObjectMap = HashMap<(String, String), DocumentRef>;

/// Ids to fetch from one collection.
#[derive(Default)]
struct FetchGroup {
    schema: Option<Arc<Schema>>,
    ids: Vec<Json>,
    seen: HashSet<String>,
}

/// Resolves references across a batch of documents.
pub struct DeReference {
    db: Database,
    max_depth: usize,
    object_map: ObjectMap,
    fetches: usize,
    rounds: usize,
}

impl DeReference {
    /// Creates a resolver performing at most `max_depth` fetch rounds.
    pub fn new(db: &Database, max_depth: usize) -> Self {
        Self {
            db: db.clone(),
            max_depth,
            object_map: HashMap::new(),
            fetches: 0,
            rounds: 0,
        }
    }

    /// Number of `find_by_ids` calls issued so far.
    pub const fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Number of fetch rounds performed so far.
    pub const fn rounds(&self) -> usize {
        self.rounds
    }

    /// Resolves references held by `docs` in place.
    ///
    /// The documents themselves seed the identity map, so a reference to one
    /// of them reuses that instance.
    ///
    /// # Errors
    ///
    /// Returns mapped driver errors; rows whose `_cls` names an unknown class
    /// fail with `LookupError`.
    pub async fn resolve_documents(&mut self, docs: &[DocumentRef]) -> DocmapResult<()> {
        for doc in docs {
            let marker = doc.borrow().to_marker();
            if let Some(marker) = marker {
                self.object_map.entry(marker.key()).or_insert_with(|| Rc::clone(doc));
            }
        }
        let mut found = BTreeMap::new();
        for doc in docs {
            self.scan_document(&doc.borrow(), 0, &mut found);
        }
        self.run_rounds(found).await?;
        let mut attach = Attach::new(&self.object_map);
        for doc in docs {
            attach.root(doc);
        }
        attach.run();
        Ok(())
    }

    /// Resolves references inside a single value in place.
    ///
    /// # Errors
    ///
    /// As for [`DeReference::resolve_documents`].
    pub async fn resolve_value(&mut self, value: &mut Value) -> DocmapResult<()> {
        let mut found = BTreeMap::new();
        self.scan_value(None, value, 0, &mut found);
        self.run_rounds(found).await?;
        let mut attach = Attach::new(&self.object_map);
        attach.value(value, 0);
        attach.run();
        Ok(())
    }

    /// Fetches round after round until nothing new is referenced or the depth
    /// is spent. Fetched documents land in the identity map.
    async fn run_rounds(&mut self, mut found: BTreeMap<String, FetchGroup>) -> DocmapResult<()> {
        while self.rounds < self.max_depth && !found.is_empty() {
            self.rounds += 1;
            let fetched = self.fetch_objects(found).await?;
            tracing::debug!(
                round = self.rounds,
                fetched = fetched.len(),
                fetches = self.fetches,
                "dereference round"
            );
            found = BTreeMap::new();
            for doc in &fetched {
                self.scan_document(&doc.borrow(), 0, &mut found);
            }
        }
        Ok(())
    }

    fn scan_document(&self, doc: &Document, depth: usize, found: &mut BTreeMap<String, FetchGroup>) {
        doc.for_each_value(|field, value| self.scan_value(field, value, depth, found));
    }

    fn scan_value(
        &self,
        field: Option<&FieldDef>,
        value: &Value,
        depth: usize,
        found: &mut BTreeMap<String, FetchGroup>,
    ) {
        match value {
            Value::Reference(marker) => self.collect(field, marker, found),
            Value::List(list) if depth <= self.max_depth => {
                let item_field = field.and_then(FieldDef::item_field);
                for item in list.iter() {
                    self.scan_value(item_field, item, depth + 1, found);
                }
            }
            Value::Dict(dict) if depth <= self.max_depth => {
                let item_field = field.and_then(FieldDef::item_field);
                for (_, item) in dict.iter() {
                    self.scan_value(item_field, item, depth + 1, found);
                }
            }
            Value::Embedded(doc) if depth <= self.max_depth => {
                self.scan_document(doc, depth + 1, found);
            }
            _ => {}
        }
    }

    fn collect(
        &self,
        field: Option<&FieldDef>,
        marker: &DocRef,
        found: &mut BTreeMap<String, FetchGroup>,
    ) {
        let (collection, key) = marker.key();
        if self.object_map.contains_key(&(collection.clone(), key.clone())) {
            return;
        }
        let group = found.entry(collection).or_default();
        if group.schema.is_none() {
            group.schema = marker
                .class_name
                .as_deref()
                .or_else(|| field.and_then(FieldDef::reference_target))
                .and_then(registry::resolve);
        }
        if group.seen.insert(key) {
            group.ids.push(marker.id.clone());
        }
    }

    /// Fetches every group concurrently and adds the results to the identity map.
    async fn fetch_objects(
        &mut self,
        found: BTreeMap<String, FetchGroup>,
    ) -> DocmapResult<Vec<DocumentRef>> {
        let timeout = self.db.options().timeout;
        let mut schemas = HashMap::new();
        let mut tasks = JoinSet::new();
        for (collection, group) in found {
            schemas.insert(collection.clone(), group.schema);
            let driver = self.db.driver();
            let ids = group.ids;
            self.fetches += 1;
            tasks.spawn(async move {
                let rows = run_with_deadline(
                    timeout,
                    "find_by_ids",
                    &collection,
                    driver.find_by_ids(&collection, &ids),
                )
                .await;
                (collection, rows)
            });
        }

        let mut fetched = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (collection, rows) = joined.map_err(|err| {
                DocmapError::OperationError(format!("dereference fetch failed: {err}"))
            })?;
            let hint = schemas.get(&collection).cloned().flatten();
            for row in rows? {
                let Some(doc) = build_row(&collection, hint.as_ref(), &row)? else {
                    continue;
                };
                let Some(id) = row.get(ID_FIELD) else {
                    continue;
                };
                let key = (collection.clone(), id_key(id));
                if self.object_map.contains_key(&key) {
                    continue;
                }
                let doc = shared(doc);
                self.object_map.insert(key, Rc::clone(&doc));
                fetched.push(doc);
            }
        }
        Ok(fetched)
    }
}

/// Builds a fetched row, or `None` when no schema can be determined for it.
fn build_row(
    collection: &str,
    hint: Option<&Arc<Schema>>,
    row: &WireDoc,
) -> DocmapResult<Option<Document>> {
    let schema = match row.get(CLS_FIELD).and_then(Json::as_str) {
        Some(cls) => registry::resolve(cls),
        None => hint
            .cloned()
            .or_else(|| registry::schema_for_collection(collection)),
    };
    let Some(schema) = schema else {
        tracing::debug!(collection, "no schema for fetched row; reference left unresolved");
        return Ok(None);
    };
    Document::from_wire(&schema, row).map(Some)
}

/// Swaps markers found in the identity map for resolved instances, without
/// recording changes.
///
/// Documents are visited breadth-first from the caller's documents, which sit
/// at level 0. A reference owns its target only when the target lies one level
/// deeper; references to the same or a shallower level are back-edges. Owning
/// edges therefore always point away from the caller's documents and can never
/// close a cycle.
struct Attach<'a> {
    objects: &'a ObjectMap,
    levels: HashMap<(String, String), usize>,
    queue: VecDeque<(DocumentRef, usize)>,
}

impl<'a> Attach<'a> {
    fn new(objects: &'a ObjectMap) -> Self {
        Self {
            objects,
            levels: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    fn root(&mut self, doc: &DocumentRef) {
        let marker = doc.borrow().to_marker();
        if let Some(marker) = marker {
            self.levels.entry(marker.key()).or_insert(0);
        }
        self.queue.push_back((Rc::clone(doc), 0));
    }

    fn run(&mut self) {
        while let Some((doc, level)) = self.queue.pop_front() {
            doc.borrow_mut()
                .for_each_value_mut(|_, value| self.value(value, level));
        }
    }

    fn value(&mut self, value: &mut Value, level: usize) {
        match value {
            Value::Reference(marker) => {
                let key = marker.key();
                let objects = self.objects;
                let Some(target) = objects.get(&key) else {
                    return;
                };
                let owning = match self.levels.get(&key) {
                    Some(&target_level) => target_level > level,
                    None => {
                        self.levels.insert(key, level + 1);
                        self.queue.push_back((Rc::clone(target), level + 1));
                        true
                    }
                };
                let resolved = if owning {
                    ResolvedRef::owned(marker.clone(), Rc::clone(target))
                } else {
                    ResolvedRef::back_edge(marker.clone(), target)
                };
                *value = Value::Document(resolved);
            }
            Value::List(list) => {
                for item in list.items_mut_untracked().iter_mut() {
                    self.value(item, level);
                }
            }
            Value::Dict(dict) => {
                for item in dict.items_mut_untracked().values_mut() {
                    self.value(item, level);
                }
            }
            Value::Embedded(doc) => doc.for_each_value_mut(|_, item| self.value(item, level)),
            _ => {}
        }
    }
}

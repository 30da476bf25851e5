//! In-memory storage driver for tests.
//!
//! Provides [`MemoryDriver`], a [`Driver`] that keeps collections in memory
//! and evaluates the native filter and update vocabulary itself. It counts
//! every call per [`OpKind`] for use with
//! [`assert_num_ops`](crate::assert_ops::assert_num_ops), enforces unique
//! indexes, and can inject latency or a one-shot failure.
//!
//! ## Example
//!
//! ```rust,no_run
//! use docmap_test::memory_driver::{MemoryDriver, OpKind};
//! use serde_json::json;
//!
//! async fn example() {
//!     let driver = MemoryDriver::new();
//!     driver.seed("people", [json!({"_id": "p1", "name": "Ada"})]);
//!     let db = driver.database();
//!     let found = db.find_by_ids("people", &[json!("p1")]).await.unwrap();
//!     assert_eq!(found.len(), 1);
//!     assert_eq!(driver.op_count(OpKind::FindByIds), 1);
//! }
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use docmap_odm::driver::{
    Cursor, Database, DatabaseOptions, Driver, DriverError, DriverResult, FindOptions, WriteResult,
};
use docmap_odm::value::{Json, WireDoc};

use crate::matcher::{matches, project, sort_documents, values_at};
use crate::updater::{apply_update, set_path};

/// The driver operations that are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    /// `find`
    Find,
    /// `find_by_ids`
    FindByIds,
    /// `count`
    Count,
    /// `update`
    Update,
    /// `insert`
    Insert,
    /// `remove`
    Remove,
    /// `distinct`
    Distinct,
}

#[derive(Debug, Default)]
struct Store {
    collections: HashMap<String, Vec<WireDoc>>,
    unique_indexes: HashMap<String, Vec<Vec<String>>>,
}

impl Store {
    fn docs(&self, collection: &str) -> &[WireDoc] {
        self.collections.get(collection).map_or(&[], Vec::as_slice)
    }

    fn docs_mut(&mut self, collection: &str) -> &mut Vec<WireDoc> {
        self.collections.entry(collection.to_string()).or_default()
    }

    fn matching(&self, collection: &str, filter: &WireDoc) -> Vec<WireDoc> {
        self.docs(collection)
            .iter()
            .filter(|doc| matches(doc, filter))
            .cloned()
            .collect()
    }

    /// Rejects `candidate` if it collides with a document other than the one
    /// at `skip` on `_id` or on any unique index.
    fn check_unique(
        &self,
        collection: &str,
        candidate: &WireDoc,
        skip: Option<usize>,
    ) -> DriverResult<()> {
        let mut indexes = vec![vec!["_id".to_string()]];
        if let Some(declared) = self.unique_indexes.get(collection) {
            indexes.extend(declared.iter().cloned());
        }
        for keys in &indexes {
            let wanted = index_key(candidate, keys);
            if wanted.iter().all(Json::is_null) {
                continue;
            }
            let clash = self
                .docs(collection)
                .iter()
                .enumerate()
                .any(|(i, other)| Some(i) != skip && index_key(other, keys) == wanted);
            if clash {
                return Err(DriverError::duplicate_key(format!(
                    "E11000 duplicate key error collection: {collection} index: {}_1 dup key: {}",
                    keys.join("_1_"),
                    Json::Array(wanted)
                )));
            }
        }
        Ok(())
    }
}

fn index_key(doc: &WireDoc, keys: &[String]) -> Vec<Json> {
    keys.iter()
        .map(|key| values_at(doc, key).first().map_or(Json::Null, |v| (*v).clone()))
        .collect()
}

fn new_id() -> Json {
    Json::String(uuid::Uuid::new_v4().to_string())
}

/// Seeds an upserted document from the equality parts of a filter.
fn seed_from_filter(filter: &WireDoc) -> WireDoc {
    let mut doc = WireDoc::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        let value = match condition.as_object() {
            Some(ops) if ops.keys().any(|k| k.starts_with('$')) => match ops.get("$eq") {
                Some(value) => value.clone(),
                None => continue,
            },
            _ => condition.clone(),
        };
        // A seed path that cannot be created is simply left out.
        let _ = set_path(&mut doc, key, value);
    }
    doc
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory document store. Clones share the same data and counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    store: Arc<Mutex<Store>>,
    counts: Arc<Mutex<BTreeMap<OpKind, usize>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    failure: Arc<Mutex<Option<DriverError>>>,
}

impl MemoryDriver {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Database`] over this driver with default options.
    pub fn database(&self) -> Database {
        Database::new(Arc::new(self.clone()))
    }

    /// A [`Database`] over this driver with explicit options.
    pub fn database_with(&self, options: DatabaseOptions) -> Database {
        Database::with_options(Arc::new(self.clone()), options)
    }

    /// Inserts raw documents without counting or index checks.
    ///
    /// Non-object values are ignored.
    pub fn seed(&self, collection: &str, docs: impl IntoIterator<Item = Json>) {
        let mut store = lock(&self.store);
        let target = store.docs_mut(collection);
        for doc in docs {
            if let Json::Object(mut doc) = doc {
                doc.entry("_id").or_insert_with(new_id);
                target.push(doc);
            }
        }
    }

    /// A snapshot of a collection in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<WireDoc> {
        lock(&self.store).docs(collection).to_vec()
    }

    /// The stored document with the given `_id`, if any.
    pub fn stored(&self, collection: &str, id: impl Into<Json>) -> Option<WireDoc> {
        let id = id.into();
        let store = lock(&self.store);
        let found = store
            .docs(collection)
            .iter()
            .find(|doc| doc.get("_id") == Some(&id))
            .cloned();
        found
    }

    /// Number of calls of one kind since the last reset.
    pub fn op_count(&self, kind: OpKind) -> usize {
        lock(&self.counts).get(&kind).copied().unwrap_or(0)
    }

    /// Number of calls of every kind since the last reset.
    pub fn total_ops(&self) -> usize {
        lock(&self.counts).values().sum()
    }

    /// Resets all operation counters.
    pub fn reset_counts(&self) {
        lock(&self.counts).clear();
    }

    /// Delays every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: DriverError) {
        *lock(&self.failure) = Some(error);
    }

    /// Declares a unique index over `keys`.
    pub fn create_unique_index(&self, collection: &str, keys: &[&str]) {
        let keys: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
        let mut store = lock(&self.store);
        let indexes = store
            .unique_indexes
            .entry(collection.to_string())
            .or_default();
        if !indexes.contains(&keys) {
            indexes.push(keys);
        }
    }

    /// Counts the call, sleeps for the configured latency and surfaces any
    /// injected failure.
    async fn begin(&self, kind: OpKind) -> DriverResult<()> {
        *lock(&self.counts).entry(kind).or_insert(0) += 1;
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = lock(&self.failure).take();
        failure.map_or(Ok(()), Err)
    }
}

/// A cursor over a snapshot taken when `find` ran.
struct MemoryCursor {
    docs: VecDeque<WireDoc>,
}

#[async_trait::async_trait]
impl Cursor for MemoryCursor {
    async fn next_doc(&mut self) -> DriverResult<Option<WireDoc>> {
        Ok(self.docs.pop_front())
    }
}

fn window<T>(items: Vec<T>, skip: u64, limit: Option<u64>) -> impl Iterator<Item = T> {
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    let limit = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
    items.into_iter().skip(skip).take(limit)
}

#[async_trait::async_trait]
impl Driver for MemoryDriver {
    async fn find(&self, collection: &str, options: FindOptions) -> DriverResult<Box<dyn Cursor>> {
        self.begin(OpKind::Find).await?;
        let mut docs = lock(&self.store).matching(collection, &options.filter);
        sort_documents(&mut docs, &options.sort);
        let docs = window(docs, options.skip, options.limit)
            .map(|doc| match &options.projection {
                Some(projection) => project(&doc, projection),
                None => doc,
            })
            .collect();
        Ok(Box::new(MemoryCursor { docs }))
    }

    async fn find_by_ids(&self, collection: &str, ids: &[Json]) -> DriverResult<Vec<WireDoc>> {
        self.begin(OpKind::FindByIds).await?;
        let store = lock(&self.store);
        Ok(store
            .docs(collection)
            .iter()
            .filter(|doc| doc.get("_id").is_some_and(|id| ids.contains(id)))
            .cloned()
            .collect())
    }

    async fn count(
        &self,
        collection: &str,
        filter: &WireDoc,
        skip: u64,
        limit: Option<u64>,
    ) -> DriverResult<u64> {
        self.begin(OpKind::Count).await?;
        let docs = lock(&self.store).matching(collection, filter);
        Ok(window(docs, skip, limit).count() as u64)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &WireDoc,
        update: &WireDoc,
        upsert: bool,
        multi: bool,
    ) -> DriverResult<WriteResult> {
        self.begin(OpKind::Update).await?;
        let mut store = lock(&self.store);
        let positions: Vec<usize> = store
            .docs(collection)
            .iter()
            .enumerate()
            .filter(|(_, doc)| matches(doc, filter))
            .map(|(i, _)| i)
            .take(if multi { usize::MAX } else { 1 })
            .collect();

        if positions.is_empty() {
            if !upsert {
                return Ok(WriteResult::default());
            }
            let mut doc = seed_from_filter(filter);
            apply_update(&mut doc, update, filter, true)?;
            let id = doc.entry("_id").or_insert_with(new_id).clone();
            store.check_unique(collection, &doc, None)?;
            store.docs_mut(collection).push(doc);
            return Ok(WriteResult {
                matched: 0,
                modified: 0,
                upserted_id: Some(id),
            });
        }

        let mut result = WriteResult {
            matched: positions.len() as u64,
            ..WriteResult::default()
        };
        for index in positions {
            let mut next = store.docs(collection)[index].clone();
            apply_update(&mut next, update, filter, false)?;
            if next == store.docs(collection)[index] {
                continue;
            }
            store.check_unique(collection, &next, Some(index))?;
            store.docs_mut(collection)[index] = next;
            result.modified += 1;
        }
        Ok(result)
    }

    async fn insert(&self, collection: &str, docs: Vec<WireDoc>) -> DriverResult<Vec<Json>> {
        self.begin(OpKind::Insert).await?;
        let mut store = lock(&self.store);
        let mut ids = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = doc.entry("_id").or_insert_with(new_id).clone();
            store.check_unique(collection, &doc, None)?;
            store.docs_mut(collection).push(doc);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn remove(&self, collection: &str, filter: &WireDoc, multi: bool) -> DriverResult<u64> {
        self.begin(OpKind::Remove).await?;
        let mut store = lock(&self.store);
        let docs = store.docs_mut(collection);
        let before = docs.len();
        if multi {
            docs.retain(|doc| !matches(doc, filter));
        } else if let Some(index) = docs.iter().position(|doc| matches(doc, filter)) {
            docs.remove(index);
        }
        Ok((before - docs.len()) as u64)
    }

    async fn distinct(&self, collection: &str, key: &str, filter: &WireDoc) -> DriverResult<Vec<Json>> {
        self.begin(OpKind::Distinct).await?;
        let store = lock(&self.store);
        let mut out: Vec<Json> = Vec::new();
        for doc in store.docs(collection).iter().filter(|doc| matches(doc, filter)) {
            for value in values_at(doc, key) {
                let flattened: Vec<&Json> = match value {
                    Json::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for item in flattened {
                    if !out.contains(item) {
                        out.push(item.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn ensure_index(
        &self,
        collection: &str,
        keys: &[(String, i32)],
        unique: bool,
    ) -> DriverResult<()> {
        if unique {
            let keys: Vec<&str> = keys.iter().map(|(k, _)| k.as_str()).collect();
            self.create_unique_index(collection, &keys);
        }
        Ok(())
    }
}

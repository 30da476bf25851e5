//! Storage driver trait and the database handle.
//!
//! This module defines the [`Driver`] trait, the minimal async interface the
//! mapper needs from a document store, and [`Database`], the handle that
//! querysets, persistence and dereferencing go through. `Database` applies
//! the per-operation deadline, opens a tracing span per call and maps driver
//! failures to [`DocmapError`] so raw driver errors never leak.
//!
//! Drivers are `Send + Sync` and shared through `Arc`; documents built from
//! their results are not.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use docmap_core::logging::operation_span;
use docmap_core::{DocmapError, DocmapResult, Settings};
use tracing::Instrument;

use crate::schema::Schema;
use crate::value::{Json, WireDoc};

/// The kind of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// A unique index rejected the write.
    DuplicateKey,
    /// The write was not acknowledged as requested.
    WriteConcern,
    /// Anything else.
    Other,
}

/// A failure reported by a storage driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    /// What went wrong.
    pub kind: DriverErrorKind,
    /// The driver's message.
    pub message: String,
}

impl DriverError {
    /// Creates a driver error.
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A duplicate-key failure.
    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::DuplicateKey, message)
    }

    /// A generic failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Other, message)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DriverError {}

impl From<DriverError> for DocmapError {
    fn from(err: DriverError) -> Self {
        match err.kind {
            DriverErrorKind::DuplicateKey => Self::NotUnique(err.message),
            DriverErrorKind::WriteConcern | DriverErrorKind::Other => {
                Self::OperationError(err.message)
            }
        }
    }
}

/// Result alias for driver calls.
pub type DriverResult<T> = Result<T, DriverError>;

/// Options for a `find` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// The native filter document.
    pub filter: WireDoc,
    /// The projection, or `None` for whole documents.
    pub projection: Option<WireDoc>,
    /// `(path, 1 | -1)` pairs in priority order.
    pub sort: Vec<(String, i32)>,
    /// Documents to skip.
    pub skip: u64,
    /// Maximum documents to return. `None` means no limit.
    pub limit: Option<u64>,
    /// Hint for how many documents to fetch per round trip.
    pub batch_size: u32,
}

/// The outcome of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    /// Documents matching the filter.
    pub matched: u64,
    /// Documents actually modified.
    pub modified: u64,
    /// The id of an upserted document.
    pub upserted_id: Option<Json>,
}

/// A forward-only cursor over raw documents.
#[async_trait::async_trait]
pub trait Cursor: Send {
    /// Returns the next document, or `None` when exhausted.
    async fn next_doc(&mut self) -> DriverResult<Option<WireDoc>>;
}

/// Minimal async interface to a document store.
///
/// Collections are addressed by name. Filters, updates, projections and sorts
/// use the native operator vocabulary (`$gt`, `$set`, `$slice`, ...).
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Opens a cursor over the documents matching `options.filter`.
    async fn find(&self, collection: &str, options: FindOptions) -> DriverResult<Box<dyn Cursor>>;

    /// Fetches the documents whose `_id` is in `ids`, in no particular order.
    async fn find_by_ids(&self, collection: &str, ids: &[Json]) -> DriverResult<Vec<WireDoc>>;

    /// Counts matching documents, honouring `skip` and `limit` when given.
    async fn count(
        &self,
        collection: &str,
        filter: &WireDoc,
        skip: u64,
        limit: Option<u64>,
    ) -> DriverResult<u64>;

    /// Applies an update document to the first or all matching documents.
    async fn update(
        &self,
        collection: &str,
        filter: &WireDoc,
        update: &WireDoc,
        upsert: bool,
        multi: bool,
    ) -> DriverResult<WriteResult>;

    /// Inserts documents and returns their ids.
    async fn insert(&self, collection: &str, docs: Vec<WireDoc>) -> DriverResult<Vec<Json>>;

    /// Removes the first or all matching documents and returns how many went.
    async fn remove(&self, collection: &str, filter: &WireDoc, multi: bool) -> DriverResult<u64>;

    /// Returns the distinct values of `key` among matching documents.
    async fn distinct(&self, collection: &str, key: &str, filter: &WireDoc)
        -> DriverResult<Vec<Json>>;

    /// Ensures an index over `keys` exists. Stores without indexes ignore this.
    async fn ensure_index(
        &self,
        _collection: &str,
        _keys: &[(String, i32)],
        _unique: bool,
    ) -> DriverResult<()> {
        Ok(())
    }
}

/// Per-database behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Deadline applied to every driver call.
    pub timeout: Option<Duration>,
    /// Fetch rounds allowed when dereferencing.
    pub max_depth: usize,
    /// Whether querysets dereference their results by default.
    pub auto_dereference: bool,
    /// Cursor batch size hint.
    pub batch_size: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_depth: 1,
            auto_dereference: false,
            batch_size: 100,
        }
    }
}

impl DatabaseOptions {
    /// Reads the options from mapper settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.operation_timeout_ms.map(Duration::from_millis),
            max_depth: settings.dereference_max_depth,
            auto_dereference: settings.auto_dereference,
            batch_size: settings.batch_size,
        }
    }
}

/// A driver plus its options. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    driver: Arc<dyn Driver>,
    options: DatabaseOptions,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Wraps a driver with default options.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_options(driver, DatabaseOptions::default())
    }

    /// Wraps a driver with explicit options.
    pub fn with_options(driver: Arc<dyn Driver>, options: DatabaseOptions) -> Self {
        Self { driver, options }
    }

    /// Wraps a driver configured from settings.
    pub fn from_settings(driver: Arc<dyn Driver>, settings: &Settings) -> Self {
        Self::with_options(driver, DatabaseOptions::from_settings(settings))
    }

    /// The options in effect.
    pub const fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// The underlying driver.
    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.driver)
    }

    /// Runs one driver call under the deadline and inside an operation span.
    async fn run<T, F>(&self, op: &str, collection: &str, call: F) -> DocmapResult<T>
    where
        F: Future<Output = DriverResult<T>>,
    {
        run_with_deadline(self.options.timeout, op, collection, call).await
    }

    /// Opens a cursor.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the deadline passes and the mapped driver error otherwise.
    pub async fn find(&self, collection: &str, options: FindOptions) -> DocmapResult<Box<dyn Cursor>> {
        self.run("find", collection, self.driver.find(collection, options))
            .await
    }

    /// Pulls the next document from a cursor under the deadline.
    ///
    /// # Errors
    ///
    /// As for [`Database::find`].
    pub async fn next_doc(
        &self,
        collection: &str,
        cursor: &mut Box<dyn Cursor>,
    ) -> DocmapResult<Option<WireDoc>> {
        self.run("next", collection, cursor.next_doc()).await
    }

    /// Fetches documents by id.
    ///
    /// # Errors
    ///
    /// As for [`Database::find`].
    pub async fn find_by_ids(&self, collection: &str, ids: &[Json]) -> DocmapResult<Vec<WireDoc>> {
        self.run("find_by_ids", collection, self.driver.find_by_ids(collection, ids))
            .await
    }

    /// Counts documents.
    ///
    /// # Errors
    ///
    /// As for [`Database::find`].
    pub async fn count(
        &self,
        collection: &str,
        filter: &WireDoc,
        skip: u64,
        limit: Option<u64>,
    ) -> DocmapResult<u64> {
        self.run(
            "count",
            collection,
            self.driver.count(collection, filter, skip, limit),
        )
        .await
    }

    /// Applies an update.
    ///
    /// # Errors
    ///
    /// As for [`Database::find`]; a duplicate key becomes `NotUnique`.
    pub async fn update(
        &self,
        collection: &str,
        filter: &WireDoc,
        update: &WireDoc,
        upsert: bool,
        multi: bool,
    ) -> DocmapResult<WriteResult> {
        self.run(
            "update",
            collection,
            self.driver.update(collection, filter, update, upsert, multi),
        )
        .await
    }

    /// Inserts documents.
    ///
    /// # Errors
    ///
    /// As for [`Database::update`].
    pub async fn insert(&self, collection: &str, docs: Vec<WireDoc>) -> DocmapResult<Vec<Json>> {
        self.run("insert", collection, self.driver.insert(collection, docs))
            .await
    }

    /// Removes documents.
    ///
    /// # Errors
    ///
    /// As for [`Database::find`].
    pub async fn remove(&self, collection: &str, filter: &WireDoc, multi: bool) -> DocmapResult<u64> {
        self.run("remove", collection, self.driver.remove(collection, filter, multi))
            .await
    }

    /// Lists distinct values.
    ///
    /// # Errors
    ///
    /// As for [`Database::find`].
    pub async fn distinct(
        &self,
        collection: &str,
        key: &str,
        filter: &WireDoc,
    ) -> DocmapResult<Vec<Json>> {
        self.run(
            "distinct",
            collection,
            self.driver.distinct(collection, key, filter),
        )
        .await
    }

    /// Creates the indexes a schema declares: one unique index per unique field.
    ///
    /// # Errors
    ///
    /// As for [`Database::find`].
    pub async fn ensure_indexes(&self, schema: &Schema) -> DocmapResult<()> {
        let Some(collection) = schema.collection() else {
            return Ok(());
        };
        for field in schema.fields().iter().filter(|f| f.unique && !f.primary_key) {
            let keys = vec![(field.db_field.clone(), 1)];
            self.run(
                "ensure_index",
                collection,
                self.driver.ensure_index(collection, &keys, true),
            )
            .await?;
        }
        Ok(())
    }
}

/// Awaits a driver call with an optional deadline, mapping its failure.
///
/// Used directly by code that cannot hold a [`Database`] across a spawned task.
pub(crate) async fn run_with_deadline<T, F>(
    timeout: Option<Duration>,
    op: &str,
    collection: &str,
    call: F,
) -> DocmapResult<T>
where
    F: Future<Output = DriverResult<T>>,
{
    let span = operation_span(op, collection);
    let outcome = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(DocmapError::from),
                Err(_) => {
                    tracing::debug!(?limit, "driver call timed out");
                    Err(DocmapError::Timeout(format!(
                        "{op} on '{collection}' exceeded {}ms",
                        limit.as_millis()
                    )))
                }
            },
            None => call.await.map_err(DocmapError::from),
        }
    }
    .instrument(span)
    .await;
    if let Err(err) = &outcome {
        tracing::debug!(op, collection, error = %err, "driver call failed");
    }
    outcome
}

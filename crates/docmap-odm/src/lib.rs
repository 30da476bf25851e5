//! # docmap-odm
//!
//! Object-document mapper for docmap. Provides [`Schema`](schema::Schema)
//! definitions, change-tracked [`Document`](document::Document) instances,
//! [`QuerySet`](query::QuerySet) for building and executing queries,
//! [`Manager`](query::Manager) for schema-level operations, and batched
//! reference resolution.
//!
//! ## Architecture
//!
//! A document is a schema plus a map of native [`Value`](value::Value)s.
//! Containers inside it record mutations against their owner, so saving a
//! loaded document sends only the minimal `$set` / `$unset` delta. Queries are
//! lazy: a [`QuerySet`](query::QuerySet) accumulates a [`Q`](query::Q) tree
//! and only compiles it into a native filter when a terminal method runs.
//! Storage is reached through the async [`Driver`](driver::Driver) trait.
//!
//! ## Module Overview
//!
//! - [`value`] - Native values, wire types and reference markers
//! - [`fields`] - Field definitions ([`FieldDef`](fields::FieldDef)) and types
//! - [`schema`] - Immutable schemas and the schema builder
//! - [`registry`] - Class-name and collection registry
//! - [`document`] - Document instances, change tracking and deltas
//! - [`query`] - Q objects, compilation, projections and querysets
//! - [`driver`] - The storage driver trait and database handle
//! - [`dereference`] - Batched reference resolution
//! - [`persistence`] - Save, delete and reload

// These clippy lints are intentionally allowed for the mapper crate:
// - struct_excessive_bools: FieldDef and Document carry several flags
// - too_many_lines: the query compiler is a long operator match
// - cast_precision_loss: i64-to-f64 casts are acceptable for numeric fields
// - result_large_err: DocmapError is the workspace error type and is used consistently
// - doc_markdown: backtick requirements for documentation items are too strict
// - needless_pass_by_value: some signatures take owned values for ergonomics
// - return_self_not_must_use: builder pattern methods are self-documenting
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::match_same_arms)]
// future_not_send: documents are deliberately !Send, so are the futures holding them
#![allow(clippy::future_not_send)]
// significant_drop_tightening: false positives with RefCell guards
#![allow(clippy::significant_drop_tightening)]

pub mod dereference;
pub mod document;
pub mod driver;
pub mod fields;
pub mod persistence;
pub mod query;
pub mod registry;
pub mod schema;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use dereference::DeReference;
pub use document::containers::{ChangeTracker, OwnerHandle, TrackedDict, TrackedList};
pub use document::Document;
pub use driver::{
    Cursor, Database, DatabaseOptions, Driver, DriverError, DriverErrorKind, DriverResult,
    FindOptions, WriteResult,
};
pub use fields::{FieldDef, FieldType};
pub use persistence::{delete_shared, reload_shared, save_shared, SaveOptions};
pub use query::{Manager, OrderBy, QuerySet, Q};
pub use schema::{LookupPart, Schema, SchemaBuilder};
pub use value::{shared, DocRef, DocumentRef, Json, ResolvedRef, Value, WireDoc};

//! # docmap
//!
//! An object-document mapper for schemaless document databases.
//!
//! This is the meta-crate that re-exports the sub-crates for convenient access.
//! Depend on `docmap` to get the whole mapper, or on `docmap-core` and
//! `docmap-odm` directly for finer-grained control. Enable the `testing`
//! feature for the in-memory driver.
//!
//! ```rust,no_run
//! use docmap::prelude::*;
//!
//! # async fn demo(db: Database) -> DocmapResult<()> {
//! let person = SchemaBuilder::document("Person")
//!     .field(FieldDef::new("name", FieldType::string()).required())
//!     .field(FieldDef::new("age", FieldType::int()))
//!     .build()?;
//! docmap::odm::registry::register(&person);
//!
//! let mut ada = Document::new(&person, [("name", Value::from("Ada")), ("age", Value::from(36))]);
//! ada.save(&db).await?;
//!
//! let adults = Manager::new(&person, &db)
//!     .filter(Q::kw("age__gte", 18))
//!     .order_by(&["-age"])?
//!     .fetch_all()
//!     .await?;
//! # let _ = adults;
//! # Ok(())
//! # }
//! ```

/// Settings, logging setup and the error taxonomy.
pub use docmap_core as core;

/// Schemas, documents, querysets, the driver seam and dereferencing.
pub use docmap_odm as odm;

/// In-memory driver and op-count assertions.
#[cfg(feature = "testing")]
pub use docmap_test as test;

// Third-party re-exports
pub use async_trait;
pub use serde_json;
pub use tokio;
pub use tracing;

/// The types most programs need, in one import.
pub mod prelude {
    pub use docmap_core::{DocmapError, DocmapResult, Settings, ValidationError};
    pub use docmap_odm::{
        save_shared, Database, DatabaseOptions, DeReference, Document, DocumentRef, Driver,
        FieldDef, FieldType, Manager, QuerySet, SaveOptions, Schema, SchemaBuilder, Value, Q,
    };
}

//! Query building, compilation, and execution.
//!
//! This module contains the complete query pipeline:
//!
//! - [`lookups`] - Q objects for composable filters
//! - [`compiler`] - Lowering of Q trees and sort keys to native documents
//! - [`update`] - Lowering of `operator__field` update keywords
//! - [`projection`] - `only` / `exclude` / slice projections
//! - [`queryset`] - QuerySet and Manager for lazy query execution

pub mod compiler;
pub mod lookups;
pub mod projection;
pub mod queryset;
pub mod update;

pub use compiler::{simplify, OrderBy, QueryCompiler};
pub use lookups::Q;
pub use projection::{FieldValue, ProjectionMode, QueryFieldList};
pub use queryset::{Manager, QuerySet};
pub use update::translate_update;

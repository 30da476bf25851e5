//! Field definitions and types.
//!
//! This module provides the [`FieldDef`] struct and [`FieldType`] enum that
//! describe document fields, their on-wire names, and their conversion,
//! validation and query-preparation rules.

pub mod types;

pub use types::{FieldDef, FieldDefault, FieldType, STRING_OPERATORS};

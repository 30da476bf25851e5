//! # docmap-core
//!
//! Core types, settings, and error types for the docmap object-document mapper.
//! This crate has no dependency on the mapper itself and provides the foundation
//! shared by every other crate in the workspace.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Mapper settings and connection configuration
//! - [`settings_loader`] - Loading settings from TOML/JSON and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{DocmapError, DocmapResult, ValidationError};
pub use settings::{ConnectionSettings, Settings};

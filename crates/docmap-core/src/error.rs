//! Core error types for docmap.
//!
//! This module provides the error enum [`DocmapError`] covering validation,
//! field lookup, single-result retrieval, write operations, driver failures and
//! configuration problems, plus the aggregated [`ValidationError`].

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Represents a validation error with optional field-level errors.
///
/// Validation errors can be either simple (a single message) or compound
/// (containing per-field error lists). Document validation never stops at the
/// first failing field; every failure is collected into one compound error.
///
/// # Examples
///
/// ```
/// use docmap_core::error::ValidationError;
///
/// // Simple validation error
/// let err = ValidationError::new("Field is required", "required");
///
/// // Field-level validation errors
/// let mut errors = ValidationError::default();
/// errors.add_field_error("email", ValidationError::new("Invalid email address", "invalid"));
/// assert!(!errors.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    /// The primary error message.
    pub message: String,
    /// A short code identifying the type of validation failure (e.g. "required", "invalid").
    pub code: String,
    /// Per-field validation errors, keyed by field name (dotted for nested documents).
    pub field_errors: BTreeMap<String, Vec<Self>>,
}

impl ValidationError {
    /// Creates a new `ValidationError` with a message and code.
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            field_errors: BTreeMap::new(),
        }
    }

    /// Creates a `ValidationError` containing per-field errors.
    pub fn with_field_errors(field_errors: BTreeMap<String, Vec<Self>>) -> Self {
        Self {
            message: String::new(),
            code: String::new(),
            field_errors,
        }
    }

    /// Records an error against a field.
    pub fn add_field_error(&mut self, field: impl Into<String>, error: Self) {
        self.field_errors.entry(field.into()).or_default().push(error);
    }

    /// Folds another compound error in, prefixing its field names with `prefix.`.
    ///
    /// Simple errors are recorded directly under `prefix`.
    pub fn merge_prefixed(&mut self, prefix: &str, other: Self) {
        if !other.message.is_empty() {
            self.add_field_error(
                prefix,
                Self::new(other.message.clone(), other.code.clone()),
            );
        }
        for (field, errors) in other.field_errors {
            let key = format!("{prefix}.{field}");
            self.field_errors.entry(key).or_default().extend(errors);
        }
    }

    /// Returns `true` when no message and no field errors are recorded.
    pub fn is_empty(&self) -> bool {
        self.message.is_empty() && self.field_errors.is_empty()
    }

    /// Returns the errors recorded for `field`, if any.
    pub fn errors_for(&self, field: &str) -> Option<&[Self]> {
        self.field_errors.get(field).map(Vec::as_slice)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            write!(f, "{}", self.message)?;
        } else if !self.field_errors.is_empty() {
            let mut first = true;
            for (field, errors) in &self.field_errors {
                for error in errors {
                    if !first {
                        write!(f, "; ")?;
                    }
                    write!(f, "{field}: {error}")?;
                    first = false;
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// The primary error type for docmap.
///
/// Single-result retrieval failures carry the schema name, so callers can tell
/// `Person` not-found apart from `Post` not-found while still matching every
/// not-found case through [`DocmapError::is_not_found`].
#[derive(Error, Debug)]
pub enum DocmapError {
    // ── Validation ───────────────────────────────────────────────────

    /// One or more fields failed validation.
    #[error("Validation error: {0}")]
    ValidationError(ValidationError),

    // ── Queries ──────────────────────────────────────────────────────

    /// A dotted field path could not be resolved against a schema, or the
    /// path tried to traverse a reference field.
    #[error("Lookup error: {0}")]
    LookupError(String),

    /// A query or update keyword was malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A single-result query matched nothing.
    #[error("{schema} matching query does not exist")]
    DoesNotExist {
        /// Class name of the schema that was queried.
        schema: String,
    },

    /// A single-result query matched more than one document.
    #[error("get() returned more than one {schema} ({count} or more items)")]
    MultipleObjectsReturned {
        /// Class name of the schema that was queried.
        schema: String,
        /// Number of documents seen before giving up.
        count: usize,
    },

    // ── Writes ───────────────────────────────────────────────────────

    /// An invalid update specification, immutable field mutation, or failed write.
    #[error("Operation error: {0}")]
    OperationError(String),

    /// A unique constraint was violated by a write.
    #[error("Tried to save duplicate unique keys: {0}")]
    NotUnique(String),

    // ── Driver ───────────────────────────────────────────────────────

    /// A driver call exceeded its configured deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The storage driver failed for a reason with no dedicated variant.
    #[error("Driver error: {0}")]
    DriverError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// A wire document could not be converted to or from its native form.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DocmapError {
    /// Builds the not-found error for `schema`.
    pub fn does_not_exist(schema: impl Into<String>) -> Self {
        Self::DoesNotExist {
            schema: schema.into(),
        }
    }

    /// Returns `true` for any schema's not-found error.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::DoesNotExist { .. })
    }

    /// Returns `true` for any schema's multiple-results error.
    pub const fn is_multiple(&self) -> bool {
        matches!(self, Self::MultipleObjectsReturned { .. })
    }

    /// Returns `true` if this is the not-found error of exactly `schema`.
    pub fn is_does_not_exist_for(&self, schema: &str) -> bool {
        matches!(self, Self::DoesNotExist { schema: s } if s == schema)
    }

    /// Returns `true` if this is the multiple-results error of exactly `schema`.
    pub fn is_multiple_for(&self, schema: &str) -> bool {
        matches!(self, Self::MultipleObjectsReturned { schema: s, .. } if s == schema)
    }
}

impl From<ValidationError> for DocmapError {
    fn from(err: ValidationError) -> Self {
        Self::ValidationError(err)
    }
}

impl From<serde_json::Error> for DocmapError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// A convenience type alias for `Result<T, DocmapError>`.
pub type DocmapResult<T> = Result<T, DocmapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_simple() {
        let err = ValidationError::new("Field is required", "required");
        assert_eq!(err.to_string(), "Field is required");
    }

    #[test]
    fn test_validation_error_display_field_errors() {
        let mut err = ValidationError::default();
        err.add_field_error("email", ValidationError::new("Invalid email.", "invalid"));
        assert!(err.to_string().contains("email: Invalid email."));
    }

    #[test]
    fn test_validation_error_aggregates_fields() {
        let mut err = ValidationError::default();
        err.add_field_error("name", ValidationError::new("Field is required", "required"));
        err.add_field_error("age", ValidationError::new("Value too small", "min_value"));
        assert_eq!(err.field_errors.len(), 2);
        assert!(err.errors_for("age").is_some());
    }

    #[test]
    fn test_merge_prefixed() {
        let mut inner = ValidationError::default();
        inner.add_field_error("city", ValidationError::new("Field is required", "required"));

        let mut outer = ValidationError::default();
        outer.merge_prefixed("address", inner);
        assert!(outer.errors_for("address.city").is_some());
    }

    #[test]
    fn test_merge_prefixed_simple_error() {
        let mut outer = ValidationError::default();
        outer.merge_prefixed("tags.1", ValidationError::new("Too long", "max_length"));
        assert_eq!(outer.errors_for("tags.1").unwrap()[0].code, "max_length");
    }

    #[test]
    fn test_per_schema_identity() {
        let err = DocmapError::does_not_exist("Person");
        assert!(err.is_not_found());
        assert!(err.is_does_not_exist_for("Person"));
        assert!(!err.is_does_not_exist_for("Post"));
        assert_eq!(err.to_string(), "Person matching query does not exist");
    }

    #[test]
    fn test_multiple_results_identity() {
        let err = DocmapError::MultipleObjectsReturned {
            schema: "Post".into(),
            count: 2,
        };
        assert!(err.is_multiple());
        assert!(err.is_multiple_for("Post"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: DocmapError = io_err.into();
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_validation_error_conversion() {
        let err: DocmapError = ValidationError::new("bad", "invalid").into();
        assert!(matches!(err, DocmapError::ValidationError(_)));
    }
}

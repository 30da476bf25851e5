//! Field projections.
//!
//! A [`QueryFieldList`] accumulates the `only` / `exclude` / slice requests made
//! on a queryset and renders them as a driver projection document. Successive
//! requests combine with [`QueryFieldList::add`]:
//!
//! - `only` after `only` unions the field sets,
//! - `exclude` after `exclude` unions the excluded sets,
//! - `exclude` after `only` subtracts from the loaded set,
//! - `only` after `exclude` loads the requested fields not excluded,
//! - slices attach to their field without changing the mode.
//!
//! Fields in the always-include set (the `_cls` discriminator of polymorphic
//! schemas) are added to every non-empty `only` set and removed from every
//! exclusion.

use std::collections::{BTreeMap, BTreeSet};

use crate::value::{Json, WireDoc};

/// Whether listed fields are loaded or skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionMode {
    /// Load only the listed fields.
    #[default]
    Only,
    /// Load everything but the listed fields.
    Exclude,
}

impl ProjectionMode {
    const fn as_flag(self) -> i64 {
        match self {
            Self::Only => 1,
            Self::Exclude => 0,
        }
    }
}

/// The value attached to a group of requested fields.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Plain include or exclude.
    Mode(ProjectionMode),
    /// A projection operator document, e.g. `{"$slice": 5}`.
    Operator(Json),
}

/// The accumulated projection of a queryset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryFieldList {
    fields: BTreeSet<String>,
    mode: ProjectionMode,
    always_include: BTreeSet<String>,
    /// Always-include paths the caller named in an `exclude`.
    excluded_always: BTreeSet<String>,
    id_mode: Option<ProjectionMode>,
    only_called: bool,
    slice: BTreeMap<String, Json>,
}

impl QueryFieldList {
    /// An empty projection (load everything) that always includes `always_include`.
    pub fn with_always_include<I, S>(always_include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            always_include: always_include.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Returns `true` when no field set is in effect.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The current mode.
    pub const fn mode(&self) -> ProjectionMode {
        self.mode
    }

    /// The on-wire paths currently listed.
    pub const fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    /// The always-included paths.
    pub const fn always_include(&self) -> &BTreeSet<String> {
        &self.always_include
    }

    /// Combines a new request into the projection.
    pub fn add(&mut self, fields: BTreeSet<String>, value: FieldValue, only_called: bool) {
        if value == FieldValue::Mode(ProjectionMode::Exclude) {
            self.excluded_always
                .extend(fields.intersection(&self.always_include).cloned());
        }
        match value {
            FieldValue::Operator(op) => {
                for field in &fields {
                    self.slice.insert(field.clone(), op.clone());
                }
                if self.fields.is_empty() {
                    self.fields = fields.clone();
                }
            }
            FieldValue::Mode(mode) if self.fields.is_empty() => {
                self.fields = fields.clone();
                self.mode = mode;
                self.slice.clear();
                self.note_id(&fields, mode);
            }
            FieldValue::Mode(mode) => {
                match (self.mode, mode) {
                    (ProjectionMode::Only, ProjectionMode::Only) => {
                        self.clean_slice();
                        if self.only_called {
                            self.fields.extend(fields.iter().cloned());
                        } else {
                            self.fields = fields.clone();
                        }
                    }
                    (ProjectionMode::Exclude, ProjectionMode::Exclude) => {
                        self.fields.extend(fields.iter().cloned());
                        self.clean_slice();
                    }
                    (ProjectionMode::Only, ProjectionMode::Exclude) => {
                        self.fields.retain(|f| !fields.contains(f));
                        self.clean_slice();
                    }
                    (ProjectionMode::Exclude, ProjectionMode::Only) => {
                        self.mode = ProjectionMode::Only;
                        self.fields = fields.difference(&self.fields).cloned().collect();
                        self.clean_slice();
                    }
                }
                self.note_id(&fields, mode);
            }
        }

        if !self.always_include.is_empty() {
            if self.mode == ProjectionMode::Only && !self.fields.is_empty() {
                let sliced_only = self.slice.keys().eq(self.fields.iter());
                if !sliced_only {
                    self.fields
                        .extend(self.always_include.difference(&self.excluded_always).cloned());
                }
            } else {
                let always = &self.always_include;
                let excluded = &self.excluded_always;
                self.fields
                    .retain(|f| !always.contains(f) || excluded.contains(f));
            }
        }
        if only_called {
            self.only_called = true;
        }
    }

    fn note_id(&mut self, fields: &BTreeSet<String>, mode: ProjectionMode) {
        if fields.contains("_id") {
            self.id_mode = Some(mode);
        }
    }

    fn clean_slice(&mut self) {
        let fields = &self.fields;
        self.slice.retain(|field, _| fields.contains(field));
    }

    /// Drops every request, keeping the always-include set.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.slice.clear();
        self.excluded_always.clear();
        self.mode = ProjectionMode::Only;
        self.id_mode = None;
        self.only_called = false;
    }

    /// Renders the driver projection, or `None` to load whole documents.
    pub fn as_projection(&self) -> Option<WireDoc> {
        if self.is_empty() {
            return None;
        }
        let mut doc = WireDoc::new();
        for field in &self.fields {
            doc.insert(field.clone(), Json::from(self.mode.as_flag()));
        }
        for (field, op) in &self.slice {
            doc.insert(field.clone(), op.clone());
        }
        if let Some(mode) = self.id_mode {
            doc.insert("_id".into(), Json::from(mode.as_flag()));
        }
        Some(doc)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn set(fields: &[&str]) -> BTreeSet<String> {
        fields.iter().map(|f| (*f).to_string()).collect()
    }

    fn only(list: &mut QueryFieldList, fields: &[&str]) {
        list.add(set(fields), FieldValue::Mode(ProjectionMode::Only), true);
    }

    fn exclude(list: &mut QueryFieldList, fields: &[&str]) {
        list.add(set(fields), FieldValue::Mode(ProjectionMode::Exclude), false);
    }

    #[test]
    fn test_successive_only_calls_union() {
        let mut chained = QueryFieldList::default();
        only(&mut chained, &["a"]);
        only(&mut chained, &["b"]);
        let mut single = QueryFieldList::default();
        only(&mut single, &["a", "b"]);
        assert_eq!(chained.as_projection(), single.as_projection());
        assert_eq!(
            Json::Object(chained.as_projection().unwrap()),
            json!({"a": 1, "b": 1})
        );
    }

    #[test]
    fn test_only_then_exclude_same_field_is_empty() {
        let mut list = QueryFieldList::default();
        only(&mut list, &["a"]);
        exclude(&mut list, &["a"]);
        assert!(list.is_empty());
        assert!(list.as_projection().is_none());
    }

    #[test]
    fn test_exclude_then_only() {
        let mut list = QueryFieldList::default();
        exclude(&mut list, &["a"]);
        exclude(&mut list, &["b"]);
        assert_eq!(Json::Object(list.as_projection().unwrap()), json!({"a": 0, "b": 0}));
        only(&mut list, &["b", "c"]);
        assert_eq!(list.mode(), ProjectionMode::Only);
        assert_eq!(list.fields(), &set(&["c"]));
    }

    #[test]
    fn test_always_include() {
        let mut list = QueryFieldList::with_always_include(["_cls"]);
        only(&mut list, &["name"]);
        assert_eq!(
            Json::Object(list.as_projection().unwrap()),
            json!({"name": 1, "_cls": 1})
        );

        let mut implicit = QueryFieldList::with_always_include(["_cls"]);
        exclude(&mut implicit, &["name"]);
        assert_eq!(Json::Object(implicit.as_projection().unwrap()), json!({"name": 0}));
    }

    #[test]
    fn test_explicitly_excluded_cls_is_dropped() {
        let mut excluded = QueryFieldList::with_always_include(["_cls"]);
        exclude(&mut excluded, &["name", "_cls"]);
        assert_eq!(
            Json::Object(excluded.as_projection().unwrap()),
            json!({"name": 0, "_cls": 0})
        );
        exclude(&mut excluded, &["age"]);
        assert!(excluded.fields().contains("_cls"));

        let mut narrowed = QueryFieldList::with_always_include(["_cls"]);
        only(&mut narrowed, &["name", "age"]);
        exclude(&mut narrowed, &["age", "_cls"]);
        assert_eq!(
            Json::Object(narrowed.as_projection().unwrap()),
            json!({"name": 1})
        );
    }

    #[test]
    fn test_slice() {
        let mut list = QueryFieldList::default();
        list.add(set(&["comments"]), FieldValue::Operator(json!({"$slice": 5})), false);
        assert_eq!(
            Json::Object(list.as_projection().unwrap()),
            json!({"comments": {"$slice": 5}})
        );
        only(&mut list, &["title"]);
        assert!(!list.as_projection().unwrap().contains_key("comments"));
    }

    #[test]
    fn test_id_mode() {
        let mut list = QueryFieldList::default();
        only(&mut list, &["name"]);
        exclude(&mut list, &["_id"]);
        assert_eq!(
            Json::Object(list.as_projection().unwrap()),
            json!({"name": 1, "_id": 0})
        );
    }

    #[test]
    fn test_reset() {
        let mut list = QueryFieldList::with_always_include(["_cls"]);
        only(&mut list, &["a"]);
        list.reset();
        assert!(list.is_empty());
        assert_eq!(list.always_include(), &set(&["_cls"]));
    }
}

//! Change-tracking containers.
//!
//! [`TrackedList`] and [`TrackedDict`] wrap the list and mapping values held by
//! a document. Every mutating operation performs the mutation, then records the
//! container's path (or the touched element's path) on the owning document's
//! [`ChangeTracker`], then returns the normal result.
//!
//! A container refers to its owner through an [`OwnerHandle`], a weak pointer
//! plus a field path. The handle never keeps the owner alive. Once the owner is
//! gone, or the container has been detached (taken out of the document, or
//! cloned), recording a change is a no-op.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use docmap_core::{DocmapError, DocmapResult};
use indexmap::IndexMap;

use crate::document::Document;
use crate::value::Value;

/// The ordered set of changed field paths of one document.
///
/// Paths use on-wire (db field) names. Recording a path already covered by a
/// recorded ancestor is a no-op; recording an ancestor drops its recorded
/// descendants.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    changed: RefCell<Vec<String>>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_changes(changes: Vec<String>) -> Self {
        Self {
            changed: RefCell::new(changes),
        }
    }

    /// Records `key` as changed.
    pub fn mark(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let mut changed = self.changed.borrow_mut();
        if changed.iter().any(|c| c == key) {
            return;
        }
        let levels: Vec<&str> = key.split('.').collect();
        for idx in 1..levels.len() {
            let ancestor = levels[..idx].join(".");
            if changed.iter().any(|c| *c == ancestor) {
                return;
            }
        }
        let prefix = format!("{key}.");
        changed.retain(|c| !c.starts_with(&prefix));
        changed.push(key.to_string());
    }

    /// Returns the recorded paths, in recording order.
    pub fn changed(&self) -> Vec<String> {
        self.changed.borrow().clone()
    }

    /// Returns `true` if exactly `key` is recorded.
    pub fn contains(&self, key: &str) -> bool {
        self.changed.borrow().iter().any(|c| c == key)
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.changed.borrow().is_empty()
    }

    /// Forgets every recorded path.
    pub fn clear(&self) {
        self.changed.borrow_mut().clear();
    }
}

/// A non-owning reference from a container (or embedded document) to the
/// document that owns it, plus the owner-relative path of the value.
#[derive(Clone)]
pub struct OwnerHandle {
    tracker: Weak<ChangeTracker>,
    path: String,
}

impl OwnerHandle {
    pub(crate) fn new(tracker: &Rc<ChangeTracker>, path: impl Into<String>) -> Self {
        Self {
            tracker: Rc::downgrade(tracker),
            path: path.into(),
        }
    }

    /// The path of the owned value, relative to the owner.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns `true` while the owner is alive.
    pub fn is_attached(&self) -> bool {
        self.tracker.strong_count() > 0
    }

    /// Returns a handle for an element below this one.
    pub(crate) fn child(&self, segment: &str) -> Self {
        Self {
            tracker: self.tracker.clone(),
            path: format!("{}.{segment}", self.path),
        }
    }

    /// Records this handle's path on the owner, if the owner is still alive.
    pub(crate) fn mark(&self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.mark(&self.path);
        }
    }

    pub(crate) fn mark_child(&self, segment: &str) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.mark(&format!("{}.{segment}", self.path));
        }
    }
}

impl fmt::Debug for OwnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerHandle")
            .field("path", &self.path)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Hands an ownerless embedded document an owner handle.
fn backfill(value: &Value, owner: Option<&OwnerHandle>, segment: &str) {
    if let (Value::Embedded(doc), Some(owner)) = (value, owner) {
        doc.backfill_owner(owner.child(segment));
    }
}

// ── TrackedList ────────────────────────────────────────────────────────

/// A list value whose mutations are reported to the owning document.
///
/// # Examples
///
/// ```
/// use docmap_odm::document::containers::TrackedList;
/// use docmap_odm::value::Value;
///
/// let mut list: TrackedList = vec![Value::from(1_i64)].into();
/// list.push(Value::from(2_i64));
/// assert_eq!(list.len(), 2);
/// ```
#[derive(Default)]
pub struct TrackedList {
    items: Vec<Value>,
    owner: Option<OwnerHandle>,
}

impl TrackedList {
    /// Creates an empty, detached list.
    pub fn new() -> Self {
        Self::default()
    }

    /// The owner handle, if bound.
    pub fn owner(&self) -> Option<&OwnerHandle> {
        self.owner.as_ref()
    }

    pub(crate) fn bind(&mut self, owner: OwnerHandle) {
        self.owner = Some(owner);
    }

    pub(crate) fn detach(&mut self) {
        self.owner = None;
    }

    fn mark(&self) {
        if let Some(owner) = &self.owner {
            owner.mark();
        }
    }

    fn mark_index(&self, index: usize) {
        if let Some(owner) = &self.owner {
            owner.mark_child(&index.to_string());
        }
    }

    // ── reads ──

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the list has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        let value = self.items.get(index)?;
        backfill(value, self.owner.as_ref(), &index.to_string());
        Some(value)
    }

    /// Iterates over the items.
    pub fn iter(&self) -> impl Iterator<Item = &Value> + '_ {
        self.items.iter().enumerate().map(move |(i, v)| {
            backfill(v, self.owner.as_ref(), &i.to_string());
            v
        })
    }

    /// Returns `true` if an equal item is present.
    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains(value)
    }

    /// Consumes the list, returning the plain items.
    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }

    // ── mutations ──

    /// Replaces the item at `index`, returning the previous one.
    pub fn set(&mut self, index: usize, value: Value) -> DocmapResult<Value> {
        let slot = self.items.get_mut(index).ok_or_else(|| {
            DocmapError::OperationError(format!("list assignment index {index} out of range"))
        })?;
        let old = std::mem::replace(slot, value);
        self.mark_index(index);
        Ok(old)
    }

    /// Removes and returns the item at `index`.
    pub fn remove(&mut self, index: usize) -> DocmapResult<Value> {
        if index >= self.items.len() {
            return Err(DocmapError::OperationError(format!(
                "list index {index} out of range"
            )));
        }
        let old = self.items.remove(index);
        self.mark();
        Ok(old)
    }

    /// Appends an item.
    pub fn push(&mut self, value: impl Into<Value>) {
        self.items.push(value.into());
        self.mark();
    }

    /// Appends every item of `values`.
    pub fn extend<I: IntoIterator<Item = Value>>(&mut self, values: I) {
        self.items.extend(values);
        self.mark();
    }

    /// Inserts an item at `index` (clamped to the list length).
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) {
        let index = index.min(self.items.len());
        self.items.insert(index, value.into());
        self.mark();
    }

    /// Removes and returns the last item.
    pub fn pop(&mut self) -> Option<Value> {
        let value = self.items.pop()?;
        self.mark();
        Some(value)
    }

    /// Removes the first item equal to `value`. Returns `true` if one was found.
    pub fn remove_value(&mut self, value: &Value) -> bool {
        let Some(pos) = self.items.iter().position(|v| v == value) else {
            return false;
        };
        self.items.remove(pos);
        self.mark();
        true
    }

    /// Sorts the items with a comparator.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.items.sort_by(compare);
        self.mark();
    }

    /// Reverses the items in place.
    pub fn reverse(&mut self) {
        self.items.reverse();
        self.mark();
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        self.items.clear();
        self.mark();
    }

    // ── nested access ──

    /// Mutable access to a nested list at `index`, bound to `path.index`.
    pub fn list_at_mut(&mut self, index: usize) -> Option<&mut TrackedList> {
        let child = self.owner.as_ref().map(|o| o.child(&index.to_string()));
        match self.items.get_mut(index)? {
            Value::List(list) => {
                if let Some(child) = child {
                    list.bind(child);
                }
                Some(list)
            }
            _ => None,
        }
    }

    /// Mutable access to a nested dict at `index`, bound to `path.index`.
    pub fn dict_at_mut(&mut self, index: usize) -> Option<&mut TrackedDict> {
        let child = self.owner.as_ref().map(|o| o.child(&index.to_string()));
        match self.items.get_mut(index)? {
            Value::Dict(dict) => {
                if let Some(child) = child {
                    dict.bind(child);
                }
                Some(dict)
            }
            _ => None,
        }
    }

    /// Mutable access to an embedded document at `index`.
    ///
    /// The document records its own changes; the owner collects them through
    /// [`Document::get_changed_fields`].
    pub fn embedded_at_mut(&mut self, index: usize) -> Option<&mut Document> {
        let child = self.owner.as_ref().map(|o| o.child(&index.to_string()));
        match self.items.get_mut(index)? {
            Value::Embedded(doc) => {
                if let Some(child) = child {
                    doc.backfill_owner(child);
                }
                Some(doc)
            }
            _ => None,
        }
    }

    /// Untracked mutable access, for reference resolution and bookkeeping.
    pub(crate) fn items_mut_untracked(&mut self) -> &mut Vec<Value> {
        &mut self.items
    }
}

impl Clone for TrackedList {
    /// Clones the items. The clone is detached from any owner.
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            owner: None,
        }
    }
}

impl PartialEq for TrackedList {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl fmt::Debug for TrackedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl From<Vec<Value>> for TrackedList {
    fn from(items: Vec<Value>) -> Self {
        Self { items, owner: None }
    }
}

impl FromIterator<Value> for TrackedList {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

// ── TrackedDict ────────────────────────────────────────────────────────

/// A string-keyed mapping whose mutations are reported to the owning document.
#[derive(Default)]
pub struct TrackedDict {
    items: IndexMap<String, Value>,
    owner: Option<OwnerHandle>,
}

impl TrackedDict {
    /// Creates an empty, detached dict.
    pub fn new() -> Self {
        Self::default()
    }

    /// The owner handle, if bound.
    pub fn owner(&self) -> Option<&OwnerHandle> {
        self.owner.as_ref()
    }

    pub(crate) fn bind(&mut self, owner: OwnerHandle) {
        self.owner = Some(owner);
    }

    pub(crate) fn detach(&mut self) {
        self.owner = None;
    }

    fn mark(&self) {
        if let Some(owner) = &self.owner {
            owner.mark();
        }
    }

    fn mark_key(&self, key: &str) {
        if let Some(owner) = &self.owner {
            owner.mark_child(key);
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the dict has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the value under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let value = self.items.get(key)?;
        backfill(value, self.owner.as_ref(), key);
        Some(value)
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> + '_ {
        self.items.iter().map(move |(k, v)| {
            backfill(v, self.owner.as_ref(), k);
            (k, v)
        })
    }

    /// Iterates over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> + '_ {
        self.items.keys()
    }

    /// Consumes the dict, returning the plain map.
    pub fn into_map(self) -> IndexMap<String, Value> {
        self.items
    }

    /// Sets `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let old = self.items.insert(key.clone(), value.into());
        self.mark_key(&key);
        old
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let old = self.items.shift_remove(key)?;
        self.mark_key(key);
        Some(old)
    }

    /// Inserts every entry of `entries`.
    pub fn update<I, K>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.items
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v)));
        self.mark();
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.items.clear();
        self.mark();
    }

    /// Removes and returns the most recently inserted entry.
    pub fn pop_item(&mut self) -> Option<(String, Value)> {
        let entry = self.items.pop()?;
        self.mark();
        Some(entry)
    }

    /// Mutable access to a nested list under `key`, bound to `path.key`.
    pub fn list_at_mut(&mut self, key: &str) -> Option<&mut TrackedList> {
        let child = self.owner.as_ref().map(|o| o.child(key));
        match self.items.get_mut(key)? {
            Value::List(list) => {
                if let Some(child) = child {
                    list.bind(child);
                }
                Some(list)
            }
            _ => None,
        }
    }

    /// Mutable access to a nested dict under `key`, bound to `path.key`.
    pub fn dict_at_mut(&mut self, key: &str) -> Option<&mut TrackedDict> {
        let child = self.owner.as_ref().map(|o| o.child(key));
        match self.items.get_mut(key)? {
            Value::Dict(dict) => {
                if let Some(child) = child {
                    dict.bind(child);
                }
                Some(dict)
            }
            _ => None,
        }
    }

    /// Mutable access to an embedded document under `key`.
    pub fn embedded_at_mut(&mut self, key: &str) -> Option<&mut Document> {
        let child = self.owner.as_ref().map(|o| o.child(key));
        match self.items.get_mut(key)? {
            Value::Embedded(doc) => {
                if let Some(child) = child {
                    doc.backfill_owner(child);
                }
                Some(doc)
            }
            _ => None,
        }
    }

    pub(crate) fn items_mut_untracked(&mut self) -> &mut IndexMap<String, Value> {
        &mut self.items
    }
}

impl Clone for TrackedDict {
    /// Clones the entries. The clone is detached from any owner.
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            owner: None,
        }
    }
}

impl PartialEq for TrackedDict {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl fmt::Debug for TrackedDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.items.iter()).finish()
    }
}

impl From<IndexMap<String, Value>> for TrackedDict {
    fn from(items: IndexMap<String, Value>) -> Self {
        Self { items, owner: None }
    }
}

impl FromIterator<(String, Value)> for TrackedDict {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<IndexMap<_, _>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound_list(tracker: &Rc<ChangeTracker>, items: Vec<Value>) -> TrackedList {
        let mut list = TrackedList::from(items);
        list.bind(OwnerHandle::new(tracker, "tags"));
        list
    }

    #[test]
    fn test_tracker_idempotent() {
        let tracker = ChangeTracker::new();
        tracker.mark("age");
        tracker.mark("age");
        assert_eq!(tracker.changed(), vec!["age"]);
    }

    #[test]
    fn test_tracker_ancestor_subsumes() {
        let tracker = ChangeTracker::new();
        tracker.mark("address.city");
        tracker.mark("address.zip");
        tracker.mark("address");
        assert_eq!(tracker.changed(), vec!["address"]);
        tracker.mark("address.street");
        assert_eq!(tracker.changed(), vec!["address"]);
    }

    #[test]
    fn test_push_marks_list_path() {
        let tracker = Rc::new(ChangeTracker::new());
        let mut list = bound_list(&tracker, vec![]);
        list.push("a");
        list.push("b");
        assert_eq!(tracker.changed(), vec!["tags"]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_set_marks_index_path() {
        let tracker = Rc::new(ChangeTracker::new());
        let mut list = bound_list(&tracker, vec![Value::from("a"), Value::from("b")]);
        let old = list.set(1, Value::from("c")).unwrap();
        assert_eq!(old, Value::from("b"));
        assert_eq!(tracker.changed(), vec!["tags.1"]);
    }

    #[test]
    fn test_set_out_of_range_is_error_and_unmarked() {
        let tracker = Rc::new(ChangeTracker::new());
        let mut list = bound_list(&tracker, vec![]);
        assert!(list.set(3, Value::Null).is_err());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_noop_mutations_do_not_mark() {
        let tracker = Rc::new(ChangeTracker::new());
        let mut list = bound_list(&tracker, vec![]);
        assert!(list.pop().is_none());
        assert!(!list.remove_value(&Value::from("x")));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_detached_container_is_silent() {
        let mut list = TrackedList::new();
        list.push(1_i64);
        assert!(list.owner().is_none());

        let tracker = Rc::new(ChangeTracker::new());
        let mut bound = bound_list(&tracker, vec![]);
        drop(tracker);
        bound.push(2_i64);
        assert!(!bound.owner().unwrap().is_attached());
    }

    #[test]
    fn test_clone_is_detached() {
        let tracker = Rc::new(ChangeTracker::new());
        let list = bound_list(&tracker, vec![Value::from(1_i64)]);
        let mut copy = list.clone();
        copy.push(2_i64);
        assert!(tracker.is_empty());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_nested_list_marks_child_path() {
        let tracker = Rc::new(ChangeTracker::new());
        let mut list = bound_list(&tracker, vec![Value::list([1_i64]), Value::list([2_i64])]);
        list.list_at_mut(1).unwrap().push(3_i64);
        assert_eq!(tracker.changed(), vec!["tags.1"]);
    }

    #[test]
    fn test_dict_key_operations() {
        let tracker = Rc::new(ChangeTracker::new());
        let mut dict = TrackedDict::new();
        dict.bind(OwnerHandle::new(&tracker, "scores"));
        dict.set("math", 5_i64);
        assert_eq!(tracker.changed(), vec!["scores.math"]);
        dict.remove("math");
        assert_eq!(tracker.changed(), vec!["scores.math"]);
        dict.clear();
        assert_eq!(tracker.changed(), vec!["scores"]);
    }

    #[test]
    fn test_sort_and_reverse() {
        let tracker = Rc::new(ChangeTracker::new());
        let mut list = bound_list(
            &tracker,
            vec![Value::from(3_i64), Value::from(1_i64), Value::from(2_i64)],
        );
        list.sort_by(|a, b| a.as_int().cmp(&b.as_int()));
        assert_eq!(list.get(0), Some(&Value::Int(1)));
        list.reverse();
        assert_eq!(list.get(0), Some(&Value::Int(3)));
        assert_eq!(tracker.changed(), vec!["tags"]);
    }
}

//! Q objects for building composable query filters.
//!
//! A [`Q`] is an immutable boolean condition tree. Leaves hold keyword
//! conditions of the form `field__path__operator = value`; inner nodes combine
//! children with AND or OR. Trees are combined with `&` and `|`, and an empty
//! `Q` is the identity of both.
//!
//! # Examples
//!
//! ```
//! use docmap_odm::query::lookups::Q;
//! use docmap_odm::value::Value;
//!
//! // name = "Alice" AND age > 25
//! let adults = Q::kw("name", "Alice") & Q::kw("age__gt", 25_i64);
//!
//! // name = "Alice" OR name = "Bob"
//! let either = Q::kw("name", "Alice") | Q::kw("name", "Bob");
//!
//! // Combining with an empty Q changes nothing.
//! assert_eq!(Q::empty() & either.clone(), either);
//! ```

use std::ops;

use crate::value::Value;

/// A composable query condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// Keyword conditions that must all hold. An empty leaf matches everything.
    Leaf(Vec<(String, Value)>),
    /// Logical AND of the children.
    And(Vec<Q>),
    /// Logical OR of the children.
    Or(Vec<Q>),
}

impl Q {
    /// Creates a leaf from keyword conditions. A repeated key keeps its last value.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut conditions: Vec<(String, Value)> = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            match conditions.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => conditions.push((key, value)),
            }
        }
        Self::Leaf(conditions)
    }

    /// Creates a leaf with a single condition.
    pub fn kw(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Leaf(vec![(key.into(), value.into())])
    }

    /// The empty condition, matching every document.
    pub const fn empty() -> Self {
        Self::Leaf(Vec::new())
    }

    /// Returns `true` if the condition matches everything.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Leaf(conditions) => conditions.is_empty(),
            Self::And(children) | Self::Or(children) => children.iter().all(Self::is_empty),
        }
    }
}

impl Default for Q {
    fn default() -> Self {
        Self::empty()
    }
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        if rhs.is_empty() {
            return self;
        }
        if self.is_empty() {
            return rhs;
        }
        match (self, rhs) {
            // Flatten nested ANDs
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        if rhs.is_empty() {
            return self;
        }
        if self.is_empty() {
            return rhs;
        }
        match (self, rhs) {
            // Flatten nested ORs
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_keeps_last_duplicate() {
        let q = Q::new([("a", 1_i64), ("b", 2), ("a", 3)]);
        assert_eq!(
            q,
            Q::Leaf(vec![("a".into(), Value::Int(3)), ("b".into(), Value::Int(2))])
        );
    }

    #[test]
    fn test_empty_is_absorptive() {
        let q = Q::kw("name", "Alice");
        assert_eq!(Q::empty() & q.clone(), q);
        assert_eq!(q.clone() & Q::empty(), q);
        assert_eq!(Q::empty() | q.clone(), q);
        assert_eq!(q.clone() | Q::empty(), q);
        assert!((Q::empty() & Q::empty()).is_empty());
    }

    #[test]
    fn test_and_flattening() {
        let combined = (Q::kw("a", 1_i64) & Q::kw("b", 2_i64)) & Q::kw("c", 3_i64);
        match &combined {
            Q::And(children) => assert_eq!(children.len(), 3),
            _ => panic!("Expected And with 3 children"),
        }
    }

    #[test]
    fn test_or_flattening() {
        let combined = Q::kw("a", 1_i64) | (Q::kw("b", 2_i64) | Q::kw("c", 3_i64));
        match &combined {
            Q::Or(children) => assert_eq!(children.len(), 3),
            _ => panic!("Expected Or with 3 children"),
        }
    }

    #[test]
    fn test_mixed_combination_nests() {
        let combined = (Q::kw("a", 1_i64) & Q::kw("b", 2_i64)) | Q::kw("c", 3_i64);
        match &combined {
            Q::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[0], Q::And(_)));
            }
            _ => panic!("Expected Or"),
        }
    }
}

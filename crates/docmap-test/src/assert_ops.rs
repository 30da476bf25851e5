//! Driver call counting assertions.
//!
//! Provides [`assert_num_ops`] which counts the driver calls made during an
//! async closure and asserts that the count matches an expected value. This is
//! how tests check that dereferencing batches one fetch per collection instead
//! of one per reference.
//!
//! ## Example
//!
//! ```rust,no_run
//! use docmap_test::assert_ops::assert_num_ops;
//! use docmap_test::memory_driver::{MemoryDriver, OpKind};
//! use serde_json::json;
//!
//! async fn example() {
//!     let driver = MemoryDriver::new();
//!     let db = driver.database();
//!     assert_num_ops(&driver, OpKind::FindByIds, 1, || async {
//!         db.find_by_ids("people", &[json!("p1"), json!("p2")]).await.unwrap();
//!     })
//!     .await;
//! }
//! ```

use std::future::Future;

use crate::memory_driver::{MemoryDriver, OpKind};

/// Asserts that exactly `expected` calls of `kind` happen during the closure.
///
/// # Panics
///
/// Panics if the count does not match `expected`.
pub async fn assert_num_ops<F, Fut>(driver: &MemoryDriver, kind: OpKind, expected: usize, f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    driver.reset_counts();
    f().await;
    let actual = driver.op_count(kind);
    assert_eq!(
        actual, expected,
        "Expected {expected} {kind:?} calls, but {actual} were made"
    );
}

/// Asserts that at most `max` driver calls of any kind happen during the
/// closure.
///
/// # Panics
///
/// Panics if more than `max` calls are made.
pub async fn assert_max_ops<F, Fut>(driver: &MemoryDriver, max: usize, f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    driver.reset_counts();
    f().await;
    let actual = driver.total_ops();
    assert!(
        actual <= max,
        "Expected at most {max} driver calls, but {actual} were made"
    );
}

#[cfg(test)]
mod tests {
    use docmap_odm::value::WireDoc;
    use docmap_odm::Driver;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_assert_num_ops_passes() {
        let driver = MemoryDriver::new();
        assert_num_ops(&driver, OpKind::Insert, 2, || async {
            driver.insert("c", vec![WireDoc::new()]).await.unwrap();
            driver.insert("c", vec![WireDoc::new()]).await.unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_assert_num_ops_zero() {
        let driver = MemoryDriver::new();
        assert_num_ops(&driver, OpKind::Find, 0, || async {}).await;
    }

    #[tokio::test]
    #[should_panic(expected = "Expected 1 FindByIds calls, but 2 were made")]
    async fn test_assert_num_ops_fails_too_many() {
        let driver = MemoryDriver::new();
        assert_num_ops(&driver, OpKind::FindByIds, 1, || async {
            driver.find_by_ids("c", &[json!(1)]).await.unwrap();
            driver.find_by_ids("c", &[json!(2)]).await.unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_counts_reset_before_closure() {
        let driver = MemoryDriver::new();
        driver.count("c", &WireDoc::new(), 0, None).await.unwrap();
        assert_max_ops(&driver, 1, || async {
            driver.count("c", &WireDoc::new(), 0, None).await.unwrap();
        })
        .await;
    }

    #[tokio::test]
    #[should_panic(expected = "Expected at most 0 driver calls, but 1 were made")]
    async fn test_assert_max_ops_fails() {
        let driver = MemoryDriver::new();
        assert_max_ops(&driver, 0, || async {
            driver.remove("c", &WireDoc::new(), true).await.unwrap();
        })
        .await;
    }
}

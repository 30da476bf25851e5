//! # docmap-test
//!
//! Testing utilities for docmap. Provides an in-memory [`Driver`] that
//! understands the native filter, update and projection vocabulary, assertion
//! helpers that count driver calls, and scoped settings overrides.
//!
//! [`Driver`]: docmap_odm::driver::Driver

// cast_possible_truncation: in-memory counts and slice bounds always fit
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::option_if_let_else)]

pub mod assert_ops;
pub mod matcher;
pub mod memory_driver;
pub mod override_settings;
pub mod updater;

pub use assert_ops::{assert_max_ops, assert_num_ops};
pub use memory_driver::{MemoryDriver, OpKind};
pub use override_settings::{get_settings, override_settings, SettingsOverride};

//! Scoped settings overrides for tests.
//!
//! Tests that need a particular timeout or dereference depth push a
//! [`SettingsOverride`] onto a thread-local stack and read it back with
//! [`get_settings`]. [`MemoryDriver::database_from_settings`]
//! turns the active settings into a [`Database`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use docmap_test::override_settings::{get_settings, override_settings, SettingsOverride};
//!
//! override_settings(SettingsOverride::new().operation_timeout_ms(Some(5)), || {
//!     assert_eq!(get_settings().operation_timeout_ms, Some(5));
//! });
//! ```

use std::cell::RefCell;

use docmap_core::Settings;
use docmap_odm::driver::Database;

use crate::memory_driver::MemoryDriver;

thread_local! {
    static SETTINGS_STACK: RefCell<Vec<Settings>> = const { RefCell::new(Vec::new()) };
}

/// Builder for the settings to push.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverride {
    settings: Settings,
}

impl SettingsOverride {
    /// Starts from [`Settings::default()`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the given settings.
    pub const fn from_settings(settings: Settings) -> Self {
        Self { settings }
    }

    /// Sets the per-operation deadline.
    #[must_use]
    pub const fn operation_timeout_ms(mut self, timeout: Option<u64>) -> Self {
        self.settings.operation_timeout_ms = timeout;
        self
    }

    /// Sets the dereference depth.
    #[must_use]
    pub const fn dereference_max_depth(mut self, depth: usize) -> Self {
        self.settings.dereference_max_depth = depth;
        self
    }

    /// Sets whether querysets dereference by default.
    #[must_use]
    pub const fn auto_dereference(mut self, enabled: bool) -> Self {
        self.settings.auto_dereference = enabled;
        self
    }

    /// Sets the cursor batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: u32) -> Self {
        self.settings.batch_size = size;
        self
    }

    /// Returns the built settings.
    pub fn build(self) -> Settings {
        self.settings
    }
}

/// Runs `f` with `overrides` active on this thread.
///
/// The override is popped afterwards, even if `f` panics.
pub fn override_settings<F, R>(overrides: SettingsOverride, f: F) -> R
where
    F: FnOnce() -> R,
{
    struct PopGuard;
    impl Drop for PopGuard {
        fn drop(&mut self) {
            SETTINGS_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }

    SETTINGS_STACK.with(|stack| stack.borrow_mut().push(overrides.build()));
    let _guard = PopGuard;
    f()
}

/// The innermost active override, or the defaults.
pub fn get_settings() -> Settings {
    SETTINGS_STACK.with(|stack| stack.borrow().last().cloned().unwrap_or_default())
}

impl MemoryDriver {
    /// A [`Database`] configured from `settings`.
    pub fn database_from_settings(&self, settings: &Settings) -> Database {
        Database::from_settings(std::sync::Arc::new(self.clone()), settings)
    }
}

//! Swappable single-slot callbacks.
//!
//! Receive handlers are wired once per channel, but the caller may replace
//! its callbacks at any time. Handlers read through the slot at dispatch
//! time, so they always see the latest callback without resubscribing.

use std::sync::{Arc, PoisonError, RwLock};

/// Shared callback invoked with a borrowed value.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct CallbackSlot<T> {
    inner: Arc<RwLock<Option<Callback<T>>>>,
}

impl<T> CallbackSlot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(None)) }
    }

    /// Replace the current callback.
    pub fn set(&self, callback: impl Fn(&T) + Send + Sync + 'static) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(callback));
    }

    pub fn clear(&self) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Invoke the current callback, if any. The lock is released before the
    /// call so a callback may replace itself.
    pub fn fire(&self, value: &T) {
        let current = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = current {
            callback(value);
        }
    }
}

impl<T> Clone for CallbackSlot<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CallbackSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSlot").field("set", &self.is_set()).finish()
    }
}

#[cfg(test)]
#[path = "callback_test.rs"]
mod tests;

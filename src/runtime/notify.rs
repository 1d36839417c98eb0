//! Worker wake-up primitive

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Generation counter plus condition variable.
///
/// A worker samples [`Notifier::generation`] before scanning its blocks and
/// then waits only if nothing bumped the generation in the meantime, so a
/// wake-up issued between the scan and the wait is never lost.
#[derive(Clone, Debug, Default)]
pub struct Notifier {
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn generation(&self) -> u64 {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self) {
        let (lock, cvar) = &*self.inner;
        let mut generation = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        cvar.notify_all();
    }

    /// Block until the generation differs from `seen` or `timeout` elapses
    pub(crate) fn wait_for_change(&self, seen: u64, timeout: Duration) {
        let (lock, cvar) = &*self.inner;
        let generation = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = cvar
            .wait_timeout_while(generation, timeout, |g| *g == seen)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

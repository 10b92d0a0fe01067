//! Cooperative cancellation (§5): a single process-local flag checked at
//! the three documented suspension points (before an HTTP request, before
//! a subprocess spawn, after a dependency wait).
//!
//! Grounded on the teacher's use of a shared `Arc<AtomicBool>`-style stop
//! signal in `client/src/push.rs`'s worker shutdown path, generalized here
//! into an explicit checkpoint so both pipelines share one mechanism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nixcache_core::error::{Error, Result};

#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Call at a suspension point; fails fast with `Cancelled` if set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let c = Cancellation::new();
        assert!(c.check().is_ok());
    }

    #[test]
    fn check_fails_after_cancel() {
        let c = Cancellation::new();
        c.cancel();
        assert!(matches!(c.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn clones_share_state() {
        let c = Cancellation::new();
        let c2 = c.clone();
        c.cancel();
        assert!(c2.is_cancelled());
    }
}

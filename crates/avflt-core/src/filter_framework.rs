//! Capability interface for the filesystem filter framework: root
//! enumeration and filter activation. Hook delivery itself (pre-open,
//! post-release) is modeled directly as method calls on
//! [`crate::dispatcher::HookDispatcher`] rather than a callback trait,
//! since the framework calls *into* the broker, not the other way around.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::RootData;
use crate::error::AvError;

pub trait FilterFramework: Send + Sync {
    /// All filter roots currently known to the framework.
    fn enumerate_roots(&self) -> Vec<Arc<RootData>>;

    /// Activates the filter. Callers must invalidate caches first (see
    /// [`crate::lifecycle::LifecycleController::on_activate`]).
    fn activate(&self) -> Result<(), AvError>;
}

/// Test/simulation double backed by a fixed root list.
pub struct FakeFilterFramework {
    roots: Vec<Arc<RootData>>,
    activated: AtomicBool,
}

impl FakeFilterFramework {
    pub fn new(roots: Vec<Arc<RootData>>) -> Self {
        Self {
            roots,
            activated: AtomicBool::new(false),
        }
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }
}

impl FilterFramework for FakeFilterFramework {
    fn enumerate_roots(&self) -> Vec<Arc<RootData>> {
        self.roots.clone()
    }

    fn activate(&self) -> Result<(), AvError> {
        self.activated.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RootData;

    #[test]
    fn activate_flips_the_flag() {
        let framework = FakeFilterFramework::new(vec![RootData::new(1)]);
        assert!(!framework.is_activated());
        framework.activate().unwrap();
        assert!(framework.is_activated());
    }

    #[test]
    fn enumerate_roots_returns_the_fixed_set() {
        let root = RootData::new(7);
        let framework = FakeFilterFramework::new(vec![Arc::clone(&root)]);
        let roots = framework.enumerate_roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, 7);
    }
}

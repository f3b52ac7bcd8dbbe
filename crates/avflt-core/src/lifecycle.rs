//! Admission-gate transitions and cache invalidation tied to broker startup,
//! shutdown, and filter activation.
//!
//! Nothing here owns state of its own: it orchestrates the request queue's
//! gate, the root table's versions, and the filter framework capability, the
//! same way a mount's lifecycle glue sequences its scheduler and its backend
//! without holding either.

use std::sync::Arc;

use tracing::debug;

use crate::context::BrokerContext;
use crate::error::AvError;
use crate::filter_framework::FilterFramework;

pub struct LifecycleController<'a, F: FilterFramework> {
    ctx: &'a BrokerContext,
    framework: &'a F,
}

impl<'a, F: FilterFramework> LifecycleController<'a, F> {
    pub fn new(ctx: &'a BrokerContext, framework: &'a F) -> Self {
        Self { ctx, framework }
    }

    pub fn start_accepting(&self) {
        self.ctx.queue.start_accepting();
    }

    /// A no-op while any agent remains registered; see
    /// [`crate::queue::RequestQueue::stop_accepting`] for why this is
    /// preserved rather than "fixed".
    pub fn stop_accepting(&self) {
        let agents_registered = !self.ctx.registry.is_empty();
        self.ctx.queue.stop_accepting(agents_registered);
    }

    /// Unconditionally closes the gate, bypassing the agents-registered
    /// check. Exposed for tests that need a deterministic drain without
    /// also tearing down every registered agent first.
    pub fn force_stop(&self) {
        self.ctx.queue.stop_accepting(false);
    }

    /// Bumps every known root's cache version, then asks the filter
    /// framework to activate. Caches are invalidated before activation so no
    /// stale verdict classified before this boot survives it.
    pub fn on_activate(&self) -> Result<(), AvError> {
        self.invalidate_all();
        self.framework.activate()
    }

    /// Enumerates all current filter roots from the framework and bumps
    /// each one's cache version, so every per-inode snapshot taken against
    /// one of those roots before this call misses on its next probe.
    pub fn invalidate_all(&self) {
        let roots = self.framework.enumerate_roots();
        for root in &roots {
            root.bump_cache_ver();
        }
        debug!(roots = roots.len(), "invalidated all filter roots");
    }

    pub fn invalidate_root(&self, root: &Arc<crate::cache::RootData>) {
        root.bump_cache_ver();
    }

    /// Releases every event still queued or backlogged, then reports how
    /// many it drained. Callers typically pair this with [`Self::force_stop`]
    /// or a natural `stop_accepting` once the last agent has departed.
    pub fn shutdown(&self) -> usize {
        self.ctx.queue.drain()
    }
}

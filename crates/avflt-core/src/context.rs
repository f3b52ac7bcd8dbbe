//! The broker's global state (`avflt_cache_enabled`, `avflt_cache_ver`,
//! `avflt_reply_timeout`, `avflt_timed_out`, the event-id allocator) plus
//! the request queue, agent registry, and root table, threaded together as
//! a single value rather than process-wide singletons. This lets tests
//! stand up distinct, isolated brokers instead of sharing global state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::cache::{InMemoryInodeDataService, InodeDataService, RootTable};
use crate::config::BrokerConfig;
use crate::queue::{IdAllocator, RequestQueue};
use crate::registry::AgentRegistry;

/// A one-shot fault injection knob for tests: forces the next
/// [`crate::event::Event`] allocation to fail with `OutOfMemory` without
/// needing to actually exhaust process memory.
#[derive(Default)]
pub struct FaultInjector {
    oom_next_alloc: AtomicBool,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_oom_once(&self) {
        self.oom_next_alloc.store(true, Ordering::Release);
    }

    pub(crate) fn take_oom(&self) -> bool {
        self.oom_next_alloc.swap(false, Ordering::AcqRel)
    }
}

/// All broker-wide mutable state, threaded to the hook dispatcher, the
/// agent I/O codec, and the lifecycle controller.
pub struct BrokerContext {
    cache_enabled: AtomicBool,
    cache_ver: AtomicU64,
    reply_timeout_ms: AtomicU64,
    timed_out: AtomicBool,
    pub ids: IdAllocator,
    pub queue: RequestQueue,
    pub registry: AgentRegistry,
    pub roots: RootTable,
    pub inodes: Box<dyn InodeDataService>,
    pub faults: FaultInjector,
}

impl BrokerContext {
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_inode_service(config, Box::new(InMemoryInodeDataService::new()))
    }

    pub fn with_inode_service(config: BrokerConfig, inodes: Box<dyn InodeDataService>) -> Self {
        Self {
            cache_enabled: AtomicBool::new(config.cache_enabled),
            cache_ver: AtomicU64::new(0),
            reply_timeout_ms: AtomicU64::new(config.reply_timeout_ms),
            timed_out: AtomicBool::new(false),
            ids: IdAllocator::new(),
            queue: RequestQueue::new(),
            registry: AgentRegistry::new(),
            roots: RootTable::new(),
            inodes,
            faults: FaultInjector::new(),
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Acquire)
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache_enabled.store(enabled, Ordering::Release);
    }

    pub fn cache_ver(&self) -> u64 {
        self.cache_ver.load(Ordering::Acquire)
    }

    /// `None` means "wait indefinitely", the `reply_timeout_ms == 0` policy.
    pub fn reply_timeout(&self) -> Option<Duration> {
        match self.reply_timeout_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn set_reply_timeout_ms(&self, timeout_ms: u64) {
        self.reply_timeout_ms.store(timeout_ms, Ordering::Release);
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub(crate) fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
        warn!("reply timeout condition set");
    }
}

//! Per-inode scan-result cache and per-root cache-version state.
//!
//! [`InodeData`] is conceptually owned by an external "inode data" service;
//! the broker only ever touches it through the narrow [`InodeDataService`]
//! trait, the same way a filesystem driver consumes an attribute cache it
//! does not itself store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::event::{InodeNo, RootId};

/// Per-root cache-control state, shared via reference counting with every
/// [`InodeData`] entry that was classified under it.
pub struct RootData {
    pub id: RootId,
    cache_enabled: AtomicBool,
    cache: AtomicBool,
    cache_ver: AtomicU64,
}

impl RootData {
    pub fn new(id: RootId) -> Arc<Self> {
        Arc::new(Self {
            id,
            cache_enabled: AtomicBool::new(true),
            cache: AtomicBool::new(true),
            cache_ver: AtomicU64::new(0),
        })
    }

    /// Whether this root uses caching at all (a property of the backing
    /// filesystem, e.g. disabled for network mounts).
    pub fn cache(&self) -> bool {
        self.cache.load(Ordering::Acquire)
    }

    pub fn set_cache(&self, enabled: bool) {
        self.cache.store(enabled, Ordering::Release);
    }

    /// Administrative toggle, independent of `cache`: probing checks
    /// `cache`, installing a new cache entry checks `cache_enabled`. This
    /// asymmetry comes straight from the source filter's `avflt_use_cache`
    /// (probe path) versus `avflt_update_cache` (install path) and is
    /// preserved rather than "fixed".
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Acquire)
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache_enabled.store(enabled, Ordering::Release);
    }

    pub fn cache_ver(&self) -> u64 {
        self.cache_ver.load(Ordering::Acquire)
    }

    /// Bumps and returns the new cache version, invalidating every entry
    /// that snapshot an older one.
    pub fn bump_cache_ver(&self) -> u64 {
        self.cache_ver.fetch_add(1, Ordering::AcqRel) + 1
    }
}

struct InodeDataInner {
    state: i32,
    inode_cache_ver: u64,
    cache_ver: u64,
    avflt_cache_ver: u64,
    root_cache_ver: u64,
    defaulted: bool,
}

/// Per-inode cache entry: last scan verdict plus the version snapshot that
/// witnessed it.
pub struct InodeData {
    inner: Mutex<InodeDataInner>,
}

impl InodeData {
    fn new() -> Self {
        Self {
            inner: Mutex::new(InodeDataInner {
                state: 0,
                inode_cache_ver: 0,
                cache_ver: 0,
                avflt_cache_ver: 0,
                root_cache_ver: 0,
                defaulted: true,
            }),
        }
    }

    /// Applies the writecount-driven invalidation rule observed on a probe:
    /// a lone non-writable opener sees the version bumped if a writer just
    /// left; a lone writable opener bumps it on close; concurrent openers
    /// always bump it.
    pub fn observe_writecount(&self, writecount: i32, probing_writable: bool, is_close: bool) {
        let mut g = self.inner.lock();
        if writecount == 1 {
            if !probing_writable {
                g.inode_cache_ver += 1;
            } else if is_close {
                g.inode_cache_ver += 1;
            }
        } else if writecount > 1 {
            g.inode_cache_ver += 1;
        }
    }

    pub fn inode_cache_ver(&self) -> u64 {
        self.inner.lock().inode_cache_ver
    }

    /// Returns the cached verdict iff the global, per-root, and per-inode
    /// version snapshots all still match current counters (the exhaustive
    /// three-way check; see the broker's cache-validity invariant).
    pub fn probe(&self, global_cache_ver: u64, root_cache_ver: u64) -> Option<i32> {
        let g = self.inner.lock();
        if g.defaulted {
            return None;
        }
        if g.avflt_cache_ver != global_cache_ver {
            return None;
        }
        if g.root_cache_ver != root_cache_ver {
            return None;
        }
        if g.cache_ver != g.inode_cache_ver {
            return None;
        }
        Some(g.state)
    }

    /// Installs a fresh verdict together with the version snapshot that
    /// witnessed it.
    pub fn install(&self, state: i32, root_cache_ver: u64, cache_ver: u64, global_cache_ver: u64) {
        let mut g = self.inner.lock();
        g.state = state;
        g.root_cache_ver = root_cache_ver;
        g.cache_ver = cache_ver;
        g.avflt_cache_ver = global_cache_ver;
        g.defaulted = false;
    }
}

impl Default for InodeData {
    fn default() -> Self {
        Self::new()
    }
}

/// External collaborator that owns per-inode cache storage, keyed by inode
/// number. The broker only ever reaches it through this trait.
pub trait InodeDataService: Send + Sync {
    fn attach(&self, inode: InodeNo) -> Arc<InodeData>;
}

/// In-memory, `DashMap`-backed implementation suitable for a single-process
/// broker instance or tests.
#[derive(Default)]
pub struct InMemoryInodeDataService {
    table: DashMap<InodeNo, Arc<InodeData>>,
}

impl InMemoryInodeDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl InodeDataService for InMemoryInodeDataService {
    fn attach(&self, inode: InodeNo) -> Arc<InodeData> {
        self.table
            .entry(inode)
            .or_insert_with(|| Arc::new(InodeData::new()))
            .clone()
    }
}

/// Registry of known filter roots, keyed by root id.
#[derive(Default)]
pub struct RootTable {
    roots: DashMap<RootId, Arc<RootData>>,
}

impl RootTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, id: RootId) -> Arc<RootData> {
        self.roots.entry(id).or_insert_with(|| RootData::new(id)).clone()
    }

    pub fn get(&self, id: RootId) -> Option<Arc<RootData>> {
        self.roots.get(&id).map(|e| e.clone())
    }

    pub fn invalidate(&self, id: RootId) {
        if let Some(root) = self.get(id) {
            root.bump_cache_ver();
        }
    }

    pub fn invalidate_all(&self) {
        for entry in &self.roots {
            entry.value().bump_cache_ver();
        }
    }

    pub fn ids(&self) -> Vec<RootId> {
        self.roots.iter().map(|e| *e.key()).collect()
    }
}

//! The unit of work: a pending scan request and its completion slot.
//!
//! An [`Event`] is always held behind `Arc<Event>`; the refcount the design
//! notes describe is simply `Arc::strong_count`. Mutable fields are
//! interior-mutable (atomics, or a small mutex for the path/result) since
//! the event is shared across the submitter, the queue, and an agent's
//! backlog simultaneously.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cache::RootData;

/// How long a blocked waiter sleeps between checks of an [`Interrupt`] flag.
///
/// A hosted process has no single primitive that can wait on "either this
/// condition variable or an externally delivered signal" the way
/// `wait_event_interruptible` can in-kernel, so interruption is polled for
/// at this granularity. Real signal delivery can still preempt a wait
/// almost immediately by calling [`Interrupt::set`], which is itself
/// wait-free; this bound only caps the *worst case* latency.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub type InodeNo = u64;
pub type RootId = u64;
/// Agents are keyed by the replying process's thread-group id, matching
/// how the original filter looks agents up by `current->tgid`.
pub type AgentId = i32;
pub type EventId = u64;

/// Kind of access that produced this event. Extensible; only Open/Close are
/// wired to a hook today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Open,
    Close,
}

impl EventKind {
    /// The wire value used in the request line's `type:` field.
    pub fn as_wire(self) -> i32 {
        match self {
            EventKind::Open => 0,
            EventKind::Close => 1,
        }
    }
}

/// Originator's open flags, restricted to the one flag the broker
/// propagates to the handle it opens on the agent's behalf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub largefile: bool,
}

#[derive(Debug)]
struct MountInner {
    root_id: RootId,
}

/// A held reference to the mount a file lives on.
#[derive(Debug, Clone)]
pub struct MountRef(Arc<MountInner>);

impl MountRef {
    pub fn new(root_id: RootId) -> Self {
        Self(Arc::new(MountInner { root_id }))
    }

    pub fn root_id(&self) -> RootId {
        self.0.root_id
    }
}

#[derive(Debug)]
struct DentryInner {
    inode: InodeNo,
}

/// A held reference to the directory entry for the file.
#[derive(Debug, Clone)]
pub struct DentryRef(Arc<DentryInner>);

impl DentryRef {
    pub fn new(inode: InodeNo) -> Self {
        Self(Arc::new(DentryInner { inode }))
    }

    pub fn inode(&self) -> InodeNo {
        self.0.inode
    }
}

/// The file-reference set carried by an event that has a live file, absent
/// for accesses with no live file (e.g. a rename).
#[derive(Debug, Clone)]
pub struct FileRef {
    pub mount: MountRef,
    pub dentry: DentryRef,
    pub flags: OpenFlags,
}

/// Identity of the task that triggered the access.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub pid: i32,
    pub tgid: i32,
    pub ppid: i32,
    pub ruid: u32,
}

/// Outcome of blocking on an event's [`Completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Interrupted,
}

/// A cooperative cancellation flag threaded into blocking waits.
///
/// There is no real POSIX signal delivery in a hosted process; an embedder
/// that wants to interrupt a blocked submitter (e.g. on shutdown) calls
/// [`Interrupt::set`] on the flag it handed to that call.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One-shot synchronization slot an event's submitter blocks on.
///
/// Exactly one of {reply matcher, timeout path, drain} may finish an event.
/// This is enforced by [`Completion::try_claim`], directly mirroring the
/// exactly-once `claim_reply` idiom used to resolve the same race in a
/// request/response scheduler: an atomic swap decides the single winner,
/// and only the winner may call [`Completion::signal`].
pub struct Completion {
    claimed: AtomicBool,
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Attempts to claim the right to finish this event. Returns `true` if
    /// the caller won the race; only the winner may call [`Self::signal`].
    pub fn try_claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    /// Marks the completion done and wakes any waiter. Must only be called
    /// by whoever won [`Self::try_claim`].
    pub fn signal(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    /// Blocks until signaled, the timeout elapses, or `interrupt` is set.
    ///
    /// `timeout: None` waits indefinitely (still interruptible), matching
    /// the broker's `reply_timeout_ms == 0` policy.
    pub fn wait(&self, timeout: Option<Duration>, interrupt: &Interrupt) -> WaitOutcome {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut done = self.done.lock();
        loop {
            if *done {
                return WaitOutcome::Completed;
            }
            if interrupt.is_set() {
                return WaitOutcome::Interrupted;
            }
            let slice = match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        drop(done);
                        if self.try_claim() {
                            return WaitOutcome::TimedOut;
                        }
                        // A finisher claimed it concurrently; it is about to
                        // (or already did) signal. Wait for that signal.
                        let mut done = self.done.lock();
                        while !*done {
                            self.cond.wait_for(&mut done, Duration::from_millis(5));
                        }
                        return WaitOutcome::Completed;
                    }
                    (dl - now).min(INTERRUPT_POLL_INTERVAL)
                }
                None => INTERRUPT_POLL_INTERVAL,
            };
            self.cond.wait_for(&mut done, slice);
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending scan request.
pub struct Event {
    id: AtomicU64,
    pub kind: EventKind,
    pub identity: Identity,
    pub path: Option<String>,
    pub file_ref: Option<FileRef>,
    cache_eligible: AtomicBool,
    pub root_ref: Option<Arc<RootData>>,
    pub root_cache_ver_snapshot: u64,
    pub inode_cache_ver_snapshot: u64,
    result: AtomicI32,
    fd: AtomicI32,
    pub completion: Completion,
}

impl Event {
    /// `id()` returns 0 until the queue assigns a real id on `pop`.
    pub fn id(&self) -> EventId {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: EventId) {
        self.id.store(id, Ordering::Release);
    }

    pub fn result(&self) -> i32 {
        self.result.load(Ordering::Acquire)
    }

    pub fn set_result(&self, result: i32) {
        self.result.store(result, Ordering::Release);
    }

    pub fn cache_eligible(&self) -> bool {
        self.cache_eligible.load(Ordering::Acquire)
    }

    pub fn set_cache_eligible(&self, eligible: bool) {
        self.cache_eligible.store(eligible, Ordering::Release);
    }

    /// -1 when no file is associated with this event.
    pub fn fd(&self) -> i32 {
        self.fd.load(Ordering::Acquire)
    }

    pub fn set_fd(&self, fd: i32) {
        self.fd.store(fd, Ordering::Release);
    }
}

/// The number of distinct holders of this event, i.e. its refcount.
pub fn refcount(event: &Arc<Event>) -> usize {
    Arc::strong_count(event)
}

pub(crate) struct NewEvent {
    pub kind: EventKind,
    pub identity: Identity,
    pub path: Option<String>,
    pub file_ref: Option<FileRef>,
    pub cache_eligible: bool,
    pub root_ref: Option<Arc<RootData>>,
    pub root_cache_ver_snapshot: u64,
    pub inode_cache_ver_snapshot: u64,
}

impl Event {
    pub(crate) fn build(fields: NewEvent) -> Arc<Event> {
        Arc::new(Event {
            id: AtomicU64::new(0),
            kind: fields.kind,
            identity: fields.identity,
            path: fields.path,
            file_ref: fields.file_ref,
            cache_eligible: AtomicBool::new(fields.cache_eligible),
            root_ref: fields.root_ref,
            root_cache_ver_snapshot: fields.root_cache_ver_snapshot,
            inode_cache_ver_snapshot: fields.inode_cache_ver_snapshot,
            result: AtomicI32::new(0),
            fd: AtomicI32::new(-1),
            completion: Completion::new(),
        })
    }
}

/// Builds a minimal event with no file reference, for tests of the queue,
/// registry, and codec that don't care about cache snapshots.
#[cfg(test)]
pub(crate) fn test_event(kind: EventKind, identity: Identity) -> Arc<Event> {
    Event::build(NewEvent {
        kind,
        identity,
        path: None,
        file_ref: None,
        cache_eligible: false,
        root_ref: None,
        root_cache_ver_snapshot: 0,
        inode_cache_ver_snapshot: 0,
    })
}

#[cfg(test)]
pub(crate) fn test_event_with_path(kind: EventKind, identity: Identity, path: &str) -> Arc<Event> {
    Event::build(NewEvent {
        kind,
        identity,
        path: Some(path.to_string()),
        file_ref: None,
        cache_eligible: false,
        root_ref: None,
        root_cache_ver_snapshot: 0,
        inode_cache_ver_snapshot: 0,
    })
}
